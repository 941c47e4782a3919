use super::ast::FuncBody;
use super::interp::{Env, Interp};
use crate::error::ScriptError;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type TableRef = Rc<RefCell<Table>>;

pub type NativeFn = Box<dyn Fn(&mut Interp<'_>, Vec<Value>) -> Result<Vec<Value>, ScriptError>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Table(TableRef),
    Function(Rc<Function>),
}

pub enum Function {
    Lua { body: Rc<FuncBody>, env: Env },
    Native { name: &'static str, func: NativeFn },
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn string(s: String) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn native(
        name: &'static str,
        func: impl Fn(&mut Interp<'_>, Vec<Value>) -> Result<Vec<Value>, ScriptError> + 'static,
    ) -> Self {
        Value::Function(Rc::new(Function::Native {
            name,
            func: Box::new(func),
        }))
    }

    pub fn table(table: Table) -> Self {
        Value::Table(Rc::new(RefCell::new(table)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Numeric value, converting numeric strings the way arithmetic does.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => parse_number(s),
            _ => None,
        }
    }

    /// String value, converting numbers the way concatenation does.
    pub fn to_str(&self) -> Option<Rc<str>> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Number(n) => Some(Rc::from(number_to_string(*n))),
            _ => None,
        }
    }

    /// Raw equality: tables and functions compare by identity.
    pub fn raw_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => f.write_str(&number_to_string(*n)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Value::Function(func) => match &**func {
                Function::Lua { body, .. } => write!(f, "function: {}", body.name),
                Function::Native { name, .. } => write!(f, "function: builtin {}", name),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            other => write!(f, "{:?}", other),
        }
    }
}

pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    let (negative, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        let n = u64::from_str_radix(hex, 16).ok()? as f64;
        return Some(if negative { -n } else { n });
    }
    let lower = t.to_ascii_lowercase();
    if lower.contains("inf") || lower.contains("nan") {
        return None;
    }
    t.parse::<f64>().ok()
}

/// Formats a number like `%.14g`.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    let exp = n.abs().log10().floor() as i32;
    if (-5..14).contains(&exp) {
        let decimals = (13 - exp).max(0) as usize;
        let s = format!("{:.*}", decimals, n);
        let s = s.trim_end_matches('0').trim_end_matches('.');
        s.to_string()
    } else {
        let s = format!("{:.13e}", n);
        let (mantissa, exponent) = s.split_once('e').unwrap_or((&s, "0"));
        let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
        let exponent: i32 = exponent.parse().unwrap_or(0);
        format!(
            "{}e{}{:02}",
            mantissa,
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Bool(bool),
    Ptr(usize),
}

fn key_of(value: &Value) -> Result<Key, ScriptError> {
    let key = match value {
        Value::Nil => return Err(ScriptError::runtime("table index is nil")),
        Value::Bool(b) => Key::Bool(*b),
        Value::Number(n) if n.is_nan() => return Err(ScriptError::runtime("table index is NaN")),
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Key::Int(*n as i64),
        Value::Number(n) => Key::Float(n.to_bits()),
        Value::Str(s) => Key::Str(s.clone()),
        Value::Table(t) => Key::Ptr(Rc::as_ptr(t) as *const () as usize),
        Value::Function(f) => Key::Ptr(Rc::as_ptr(f) as *const () as usize),
    };
    Ok(key)
}

/// A table with an array part for keys `1..=n` and an insertion-ordered hash
/// part, so that traversal order is deterministic.
#[derive(Default)]
pub struct Table {
    array: Vec<Value>,
    entries: Vec<(Value, Value)>,
    index: FxHashMap<Key, usize>,
    pub metatable: Option<TableRef>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_array(values: Vec<Value>) -> Self {
        let mut table = Self::new();
        for v in values {
            table.push(v);
        }
        table
    }

    pub fn get(&self, key: &Value) -> Value {
        match key_of(key) {
            Ok(Key::Int(i)) if i >= 1 && (i as usize) <= self.array.len() => {
                self.array[i as usize - 1].clone()
            }
            Ok(k) => self
                .index
                .get(&k)
                .map(|&i| self.entries[i].1.clone())
                .unwrap_or(Value::Nil),
            Err(_) => Value::Nil,
        }
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.get(&Value::str(key))
    }

    pub fn get_int(&self, i: i64) -> Value {
        self.get(&Value::Number(i as f64))
    }

    pub fn set(&mut self, key: Value, value: Value) -> Result<(), ScriptError> {
        let k = key_of(&key)?;
        if let Key::Int(i) = k {
            let len = self.array.len();
            if i >= 1 && (i as usize) <= len {
                self.array[i as usize - 1] = value;
                if i as usize == len {
                    while matches!(self.array.last(), Some(Value::Nil)) {
                        self.array.pop();
                    }
                }
                return Ok(());
            }
            if i as usize == len + 1 && !value.is_nil() {
                if let Some(&slot) = self.index.get(&k) {
                    self.entries[slot].1 = Value::Nil;
                    self.index.remove(&k);
                }
                self.array.push(value);
                self.migrate();
                return Ok(());
            }
        }
        match self.index.get(&k) {
            Some(&slot) => self.entries[slot].1 = value,
            None if !value.is_nil() => {
                self.index.insert(k, self.entries.len());
                self.entries.push((key, value));
            }
            None => {}
        }
        Ok(())
    }

    pub fn set_str(&mut self, key: &str, value: Value) {
        // String keys are never nil or NaN.
        let _ = self.set(Value::str(key), value);
    }

    /// Moves hash entries that now continue the array into it.
    fn migrate(&mut self) {
        loop {
            let next = Key::Int(self.array.len() as i64 + 1);
            let Some(slot) = self.index.remove(&next) else {
                return;
            };
            let value = std::mem::take(&mut self.entries[slot].1);
            if value.is_nil() {
                return;
            }
            self.array.push(value);
        }
    }

    pub fn push(&mut self, value: Value) {
        let n = self.array.len() as f64 + 1.0;
        let _ = self.set(Value::Number(n), value);
    }

    /// Border of the array part.
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.entries.iter().all(|(_, v)| v.is_nil())
    }

    pub fn insert_at(&mut self, pos: usize, value: Value) -> Result<(), ScriptError> {
        if pos == 0 || pos > self.array.len() + 1 {
            return Err(ScriptError::runtime("bad argument #2 to 'insert' (position out of bounds)"));
        }
        self.array.insert(pos - 1, value);
        self.migrate();
        Ok(())
    }

    pub fn remove_at(&mut self, pos: usize) -> Value {
        if pos == 0 || pos > self.array.len() {
            return Value::Nil;
        }
        self.array.remove(pos - 1)
    }

    pub fn array(&self) -> &[Value] {
        &self.array
    }

    pub fn array_mut(&mut self) -> &mut Vec<Value> {
        &mut self.array
    }

    /// The entry after `key` in traversal order: array part, then hash part.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, ScriptError> {
        let mut array_from = 0;
        let mut entries_from = 0;
        if !key.is_nil() {
            match key_of(key)? {
                Key::Int(i) if i >= 1 && (i as usize) <= self.array.len() => {
                    array_from = i as usize;
                }
                k => {
                    let slot = self
                        .index
                        .get(&k)
                        .ok_or_else(|| ScriptError::runtime("invalid key to 'next'"))?;
                    array_from = self.array.len();
                    entries_from = slot + 1;
                }
            }
        }
        for i in array_from..self.array.len() {
            if !self.array[i].is_nil() {
                return Ok(Some((Value::Number(i as f64 + 1.0), self.array[i].clone())));
            }
        }
        for (k, v) in self.entries.iter().skip(entries_from) {
            if !v.is_nil() {
                return Ok(Some((k.clone(), v.clone())));
            }
        }
        Ok(None)
    }

    /// All live pairs in traversal order.
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        let mut out: Vec<(Value, Value)> = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (Value::Number(i as f64 + 1.0), v.clone()))
            .collect();
        out.extend(
            self.entries
                .iter()
                .filter(|(_, v)| !v.is_nil())
                .cloned(),
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_formatting() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-2.0), "-2");
        assert_eq!(number_to_string(3.5), "3.5");
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(1e20), "1e+20");
        assert_eq!(number_to_string(f64::INFINITY), "inf");
    }

    #[test]
    fn string_to_number() {
        assert_eq!(parse_number(" 42 "), Some(42.0));
        assert_eq!(parse_number("0x1F"), Some(31.0));
        assert_eq!(parse_number("1e3"), Some(1000.0));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn array_and_hash_parts() {
        let mut t = Table::new();
        t.set(Value::Number(2.0), Value::str("b")).unwrap();
        assert_eq!(t.len(), 0);
        t.set(Value::Number(1.0), Value::str("a")).unwrap();
        assert_eq!(t.len(), 2);
        t.set_str("x", Value::Number(1.0));
        assert_eq!(t.get_str("x").to_number(), Some(1.0));
        assert!(t.get(&Value::Number(3.0)).is_nil());
    }

    #[test]
    fn nil_key_is_error() {
        let mut t = Table::new();
        assert!(t.set(Value::Nil, Value::Number(1.0)).is_err());
    }

    #[test]
    fn traversal_is_ordered() {
        let mut t = Table::from_array(vec![Value::str("a"), Value::str("b")]);
        t.set_str("z", Value::Bool(true));
        t.set_str("y", Value::Bool(true));
        let keys: Vec<String> = t.pairs().iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["1", "2", "z", "y"]);

        let (k, _) = t.next(&Value::Nil).unwrap().unwrap();
        assert_eq!(k.to_string(), "1");
        let (k, _) = t.next(&Value::str("z")).unwrap().unwrap();
        assert_eq!(k.to_string(), "y");
        assert!(t.next(&Value::str("y")).unwrap().is_none());
    }

    #[test]
    fn removing_field_during_traversal() {
        let mut t = Table::new();
        t.set_str("a", Value::Number(1.0));
        t.set_str("b", Value::Number(2.0));
        t.set_str("a", Value::Nil);
        assert!(t.next(&Value::str("a")).unwrap().is_some());
        assert_eq!(t.pairs().len(), 1);
    }

    #[test]
    fn insert_and_remove() {
        let mut t = Table::from_array(vec![Value::Number(1.0), Value::Number(3.0)]);
        t.insert_at(2, Value::Number(2.0)).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.remove_at(1).to_number(), Some(1.0));
        assert_eq!(t.get_int(1).to_number(), Some(2.0));
    }
}
