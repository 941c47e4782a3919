//! Tree-walking evaluator.
//!
//! Locals live in a persistent linked list of scopes: declaring a local pushes
//! a new cell, leaving a block simply drops the head, and closures capture the
//! list as it was when they were created.

use super::ast::{BinOp, Block, Chunk, Expr, Field, FuncBody, Name, Stmt, UnOp};
use super::host::ScriptHost;
use super::value::{number_to_string, Function, Table, TableRef, Value};
use crate::config::Limits;
use crate::error::ScriptError;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

pub struct Scope {
    name: Name,
    cell: RefCell<Value>,
    parent: Env,
}

pub type Env = Option<Rc<Scope>>;

const MAX_INDEX_CHAIN: usize = 100;

fn declare(env: &Env, name: Name, value: Value) -> Env {
    Some(Rc::new(Scope {
        name,
        cell: RefCell::new(value),
        parent: env.clone(),
    }))
}

fn lookup<'e>(env: &'e Env, name: &Name) -> Option<&'e Scope> {
    let mut current = env.as_deref();
    while let Some(scope) = current {
        if Rc::ptr_eq(&scope.name, name) || *scope.name == **name {
            return Some(scope);
        }
        current = scope.parent.as_deref();
    }
    None
}

enum Flow {
    Normal,
    Break,
    Return(Vec<Value>),
}

pub struct Interp<'h> {
    pub host: &'h mut dyn ScriptHost,
    pub globals: TableRef,
    pub string_lib: TableRef,
    /// Modules already returned by `require` in this invocation.
    pub loaded: FxHashMap<String, Value>,
    steps: u64,
    max_steps: u64,
    depth: usize,
    max_depth: usize,
    max_string: usize,
    line: usize,
}

impl<'h> Interp<'h> {
    pub fn new(host: &'h mut dyn ScriptHost, limits: &Limits) -> Self {
        Self {
            host,
            globals: Rc::new(RefCell::new(Table::new())),
            string_lib: Rc::new(RefCell::new(Table::new())),
            loaded: FxHashMap::default(),
            steps: 0,
            max_steps: limits.max_script_steps,
            depth: 0,
            max_depth: limits.max_script_depth,
            max_string: limits.max_expanded_size,
            line: 0,
        }
    }

    /// Line of the statement being executed, for error reports.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().set_str(name, value);
    }

    /// Rejects a string result of `len` bytes when it would outgrow the
    /// page's expansion budget.
    pub fn check_string_size(&self, len: usize) -> Result<(), ScriptError> {
        if len > self.max_string {
            return Err(ScriptError::runtime(format!(
                "resulting string too large ({} bytes, limit {})",
                len, self.max_string
            )));
        }
        Ok(())
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(ScriptError::StepBudget(self.max_steps));
        }
        Ok(())
    }

    /// Runs a chunk's main body and returns its results.
    pub fn run_chunk(&mut self, chunk: &Chunk) -> Result<Vec<Value>, ScriptError> {
        let main = Value::Function(Rc::new(Function::Lua {
            body: chunk.main.clone(),
            env: None,
        }));
        self.call(&main, Vec::new())
    }

    pub fn call(&mut self, func: &Value, args: Vec<Value>) -> Result<Vec<Value>, ScriptError> {
        self.tick()?;
        let Value::Function(f) = func else {
            return Err(ScriptError::runtime(format!(
                "attempt to call a {} value",
                func.type_name()
            )));
        };
        if self.depth >= self.max_depth {
            return Err(ScriptError::CallDepth(self.max_depth));
        }
        self.depth += 1;
        let result = match &**f {
            Function::Native { func, .. } => func(self, args),
            Function::Lua { body, env } => self.call_lua(body, env, args),
        };
        self.depth -= 1;
        result
    }

    fn call_lua(&mut self, body: &Rc<FuncBody>, env: &Env, args: Vec<Value>) -> Result<Vec<Value>, ScriptError> {
        let mut env = env.clone();
        let mut args = args.into_iter();
        for param in &body.params {
            env = declare(&env, param.clone(), args.next().unwrap_or_default());
        }
        let varargs: Vec<Value> = if body.is_vararg { args.collect() } else { Vec::new() };
        match self.exec_block(&body.body, env, &varargs)? {
            Flow::Return(values) => Ok(values),
            Flow::Normal | Flow::Break => Ok(Vec::new()),
        }
    }

    /// Calls and keeps only the first result.
    pub fn call1(&mut self, func: &Value, args: Vec<Value>) -> Result<Value, ScriptError> {
        Ok(self.call(func, args)?.into_iter().next().unwrap_or_default())
    }

    fn exec_block(&mut self, block: &Block, env: Env, va: &[Value]) -> Result<Flow, ScriptError> {
        Ok(self.run_block(block, env, va)?.0)
    }

    /// Executes a block and also hands back its innermost scope.
    fn run_block(&mut self, block: &Block, mut env: Env, va: &[Value]) -> Result<(Flow, Env), ScriptError> {
        for (line, stmt) in &block.stmts {
            self.line = *line;
            self.tick()?;
            match stmt {
                Stmt::Local(names, exprs) => {
                    let values = self.eval_list(exprs, &env, va)?;
                    let mut values = values.into_iter();
                    for name in names {
                        env = declare(&env, name.clone(), values.next().unwrap_or_default());
                    }
                }
                Stmt::LocalFunction(name, body) => {
                    env = declare(&env, name.clone(), Value::Nil);
                    let closure = Value::Function(Rc::new(Function::Lua {
                        body: body.clone(),
                        env: env.clone(),
                    }));
                    if let Some(scope) = env.as_deref() {
                        *scope.cell.borrow_mut() = closure;
                    }
                }
                other => {
                    let flow = self.exec(other, &env, va)?;
                    if !matches!(flow, Flow::Normal) {
                        return Ok((flow, env));
                    }
                }
            }
        }
        Ok((Flow::Normal, env))
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env, va: &[Value]) -> Result<Flow, ScriptError> {
        match stmt {
            Stmt::Local(..) | Stmt::LocalFunction(..) => Ok(Flow::Normal),
            Stmt::Assign(targets, exprs) => {
                self.assign(targets, exprs, env, va)?;
                Ok(Flow::Normal)
            }
            Stmt::Call(expr) => {
                self.eval_multi(expr, env, va)?;
                Ok(Flow::Normal)
            }
            Stmt::Do(block) => self.exec_block(block, env.clone(), va),
            Stmt::While(cond, body) => {
                while self.eval(cond, env, va)?.truthy() {
                    match self.exec_block(body, env.clone(), va)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Repeat(body, cond) => loop {
                // The condition sees the body's locals.
                let (flow, inner) = self.run_block(body, env.clone(), va)?;
                match flow {
                    Flow::Break => return Ok(Flow::Normal),
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal => {}
                }
                if self.eval(cond, &inner, va)?.truthy() {
                    return Ok(Flow::Normal);
                }
            },
            Stmt::If(arms, otherwise) => {
                for (cond, block) in arms {
                    if self.eval(cond, env, va)?.truthy() {
                        return self.exec_block(block, env.clone(), va);
                    }
                }
                match otherwise {
                    Some(block) => self.exec_block(block, env.clone(), va),
                    None => Ok(Flow::Normal),
                }
            }
            Stmt::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let start = self.for_number(start, env, va, "initial")?;
                let limit = self.for_number(limit, env, va, "limit")?;
                let step = match step {
                    Some(e) => self.for_number(e, env, va, "step")?,
                    None => 1.0,
                };
                if step == 0.0 {
                    return Err(ScriptError::runtime("'for' step is zero"));
                }
                let mut i = start;
                while (step > 0.0 && i <= limit) || (step < 0.0 && i >= limit) {
                    let scope = declare(env, var.clone(), Value::Number(i));
                    match self.exec_block(body, scope, va)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal => {}
                    }
                    i += step;
                }
                Ok(Flow::Normal)
            }
            Stmt::GenericFor { vars, exprs, body } => {
                let mut init = self.eval_list(exprs, env, va)?.into_iter();
                let func = init.next().unwrap_or_default();
                let state = init.next().unwrap_or_default();
                let mut control = init.next().unwrap_or_default();
                loop {
                    let results = self.call(&func, vec![state.clone(), control.clone()])?;
                    let first = results.first().cloned().unwrap_or_default();
                    if first.is_nil() {
                        break;
                    }
                    control = first;
                    let mut scope = env.clone();
                    let mut results = results.into_iter();
                    for name in vars {
                        scope = declare(&scope, name.clone(), results.next().unwrap_or_default());
                    }
                    match self.exec_block(body, scope, va)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(exprs) => {
                // A lone call in return position keeps all its results.
                let values = self.eval_list(exprs, env, va)?;
                Ok(Flow::Return(values))
            }
            Stmt::Break => Ok(Flow::Break),
        }
    }

    fn for_number(&mut self, expr: &Expr, env: &Env, va: &[Value], what: &str) -> Result<f64, ScriptError> {
        self.eval(expr, env, va)?
            .to_number()
            .ok_or_else(|| ScriptError::runtime(format!("'for' {} value must be a number", what)))
    }

    fn assign(&mut self, targets: &[Expr], exprs: &[Expr], env: &Env, va: &[Value]) -> Result<(), ScriptError> {
        enum Place {
            Name(Name),
            Field(Value, Value),
        }
        let mut places = Vec::with_capacity(targets.len());
        for target in targets {
            match target {
                Expr::Name(name) => places.push(Place::Name(name.clone())),
                Expr::Index(obj, key) => {
                    let obj = self.eval(obj, env, va)?;
                    let key = self.eval(key, env, va)?;
                    places.push(Place::Field(obj, key));
                }
                _ => return Err(ScriptError::runtime("cannot assign to expression")),
            }
        }
        let mut values = self.eval_list(exprs, env, va)?.into_iter();
        for place in places {
            let value = values.next().unwrap_or_default();
            match place {
                Place::Name(name) => match lookup(env, &name) {
                    Some(scope) => *scope.cell.borrow_mut() = value,
                    None => self.globals.borrow_mut().set(Value::Str(name), value)?,
                },
                Place::Field(obj, key) => self.set_index(&obj, key, value)?,
            }
        }
        Ok(())
    }

    pub fn set_index(&mut self, obj: &Value, key: Value, value: Value) -> Result<(), ScriptError> {
        match obj {
            Value::Table(t) => t.borrow_mut().set(key, value),
            other => Err(ScriptError::runtime(format!(
                "attempt to index a {} value (field '{}')",
                other.type_name(),
                key
            ))),
        }
    }

    /// Indexes with `__index` fallback; strings index the string library.
    pub fn index(&mut self, obj: &Value, key: &Value) -> Result<Value, ScriptError> {
        let mut current = obj.clone();
        for _ in 0..MAX_INDEX_CHAIN {
            match &current {
                Value::Table(t) => {
                    let (raw, meta) = {
                        let table = t.borrow();
                        (table.get(key), table.metatable.clone())
                    };
                    if !raw.is_nil() {
                        return Ok(raw);
                    }
                    let Some(meta) = meta else {
                        return Ok(Value::Nil);
                    };
                    let handler = meta.borrow().get_str("__index");
                    match handler {
                        Value::Nil => return Ok(Value::Nil),
                        Value::Function(_) => {
                            return self.call1(&handler, vec![current.clone(), key.clone()])
                        }
                        next => current = next,
                    }
                }
                Value::Str(_) => return Ok(self.string_lib.borrow().get(key)),
                other => {
                    return Err(ScriptError::runtime(format!(
                        "attempt to index a {} value (field '{}')",
                        other.type_name(),
                        key
                    )))
                }
            }
        }
        Err(ScriptError::runtime("'__index' chain too long; possible loop"))
    }

    fn eval_list(&mut self, exprs: &[Expr], env: &Env, va: &[Value]) -> Result<Vec<Value>, ScriptError> {
        let mut values = Vec::with_capacity(exprs.len());
        for (i, expr) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && expr.is_multi() {
                values.extend(self.eval_multi(expr, env, va)?);
            } else {
                values.push(self.eval(expr, env, va)?);
            }
        }
        Ok(values)
    }

    fn eval_multi(&mut self, expr: &Expr, env: &Env, va: &[Value]) -> Result<Vec<Value>, ScriptError> {
        match expr {
            Expr::Vararg => Ok(va.to_vec()),
            Expr::Call(func, args) => {
                let f = self.eval(func, env, va)?;
                let args = self.eval_list(args, env, va)?;
                if let Value::Nil = f {
                    return Err(ScriptError::runtime(format!(
                        "attempt to call a nil value ({})",
                        describe(func)
                    )));
                }
                self.call(&f, args)
            }
            Expr::Method(obj, method, args) => {
                let obj = self.eval(obj, env, va)?;
                let f = self.index(&obj, &Value::Str(method.clone()))?;
                if f.is_nil() {
                    return Err(ScriptError::runtime(format!(
                        "attempt to call a nil value (method '{}')",
                        method
                    )));
                }
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(obj);
                full.extend(self.eval_list(args, env, va)?);
                self.call(&f, full)
            }
            other => Ok(vec![self.eval(other, env, va)?]),
        }
    }

    fn eval(&mut self, expr: &Expr, env: &Env, va: &[Value]) -> Result<Value, ScriptError> {
        let value = match expr {
            Expr::Nil => Value::Nil,
            Expr::True => Value::Bool(true),
            Expr::False => Value::Bool(false),
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Vararg => va.first().cloned().unwrap_or_default(),
            Expr::Name(name) => match lookup(env, name) {
                Some(scope) => scope.cell.borrow().clone(),
                None => self.globals.borrow().get(&Value::Str(name.clone())),
            },
            Expr::Index(obj, key) => {
                let obj_value = self.eval(obj, env, va)?;
                let key = self.eval(key, env, va)?;
                if obj_value.is_nil() {
                    return Err(ScriptError::runtime(format!(
                        "attempt to index a nil value ({})",
                        describe(obj)
                    )));
                }
                self.index(&obj_value, &key)?
            }
            Expr::Call(..) | Expr::Method(..) => {
                self.eval_multi(expr, env, va)?.into_iter().next().unwrap_or_default()
            }
            Expr::Function(body) => Value::Function(Rc::new(Function::Lua {
                body: body.clone(),
                env: env.clone(),
            })),
            Expr::Paren(inner) => self.eval(inner, env, va)?,
            Expr::Table(fields) => self.construct_table(fields, env, va)?,
            Expr::Unary(op, operand) => {
                let v = self.eval(operand, env, va)?;
                self.unary(*op, v)?
            }
            Expr::Binary(BinOp::And, left, right) => {
                let l = self.eval(left, env, va)?;
                if l.truthy() {
                    self.eval(right, env, va)?
                } else {
                    l
                }
            }
            Expr::Binary(BinOp::Or, left, right) => {
                let l = self.eval(left, env, va)?;
                if l.truthy() {
                    l
                } else {
                    self.eval(right, env, va)?
                }
            }
            Expr::Binary(op, left, right) => {
                let l = self.eval(left, env, va)?;
                let r = self.eval(right, env, va)?;
                if *op == BinOp::Concat {
                    self.check_string_size(str_len(&l).saturating_add(str_len(&r)))?;
                }
                arith(*op, &l, &r)?
            }
        };
        Ok(value)
    }

    fn construct_table(&mut self, fields: &[Field], env: &Env, va: &[Value]) -> Result<Value, ScriptError> {
        let mut table = Table::new();
        let mut next_index = 1.0;
        for (i, field) in fields.iter().enumerate() {
            match field {
                Field::Positional(expr) if i + 1 == fields.len() && expr.is_multi() => {
                    for v in self.eval_multi(expr, env, va)? {
                        table.set(Value::Number(next_index), v)?;
                        next_index += 1.0;
                    }
                }
                Field::Positional(expr) => {
                    let v = self.eval(expr, env, va)?;
                    table.set(Value::Number(next_index), v)?;
                    next_index += 1.0;
                }
                Field::Named(name, expr) => {
                    let v = self.eval(expr, env, va)?;
                    table.set(Value::Str(name.clone()), v)?;
                }
                Field::Keyed(key, expr) => {
                    let k = self.eval(key, env, va)?;
                    let v = self.eval(expr, env, va)?;
                    table.set(k, v)?;
                }
            }
        }
        Ok(Value::table(table))
    }

    fn unary(&mut self, op: UnOp, v: Value) -> Result<Value, ScriptError> {
        match op {
            UnOp::Not => Ok(Value::Bool(!v.truthy())),
            UnOp::Neg => v
                .to_number()
                .map(|n| Value::Number(-n))
                .ok_or_else(|| arith_error(&v)),
            UnOp::Len => match &v {
                Value::Str(s) => Ok(Value::Number(s.len() as f64)),
                Value::Table(t) => Ok(Value::Number(t.borrow().len() as f64)),
                other => Err(ScriptError::runtime(format!(
                    "attempt to get length of a {} value",
                    other.type_name()
                ))),
            },
        }
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Name(n) => format!("global or local '{}'", n),
        Expr::Index(_, key) => match &**key {
            Expr::Str(s) => format!("field '{}'", s),
            _ => "field '?'".to_string(),
        },
        _ => "expression".to_string(),
    }
}

fn str_len(v: &Value) -> usize {
    match v {
        Value::Str(s) => s.len(),
        _ => 0,
    }
}

fn arith_error(v: &Value) -> ScriptError {
    ScriptError::runtime(format!("attempt to perform arithmetic on a {} value", v.type_name()))
}

fn numbers(l: &Value, r: &Value) -> Result<(f64, f64), ScriptError> {
    let a = l.to_number().ok_or_else(|| arith_error(l))?;
    let b = r.to_number().ok_or_else(|| arith_error(r))?;
    Ok((a, b))
}

fn compare_error(l: &Value, r: &Value) -> ScriptError {
    ScriptError::runtime(format!(
        "attempt to compare {} with {}",
        l.type_name(),
        r.type_name()
    ))
}

fn less_than(l: &Value, r: &Value) -> Result<bool, ScriptError> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(a < b),
        (Value::Str(a), Value::Str(b)) => Ok(a.as_bytes() < b.as_bytes()),
        _ => Err(compare_error(l, r)),
    }
}

fn less_equal(l: &Value, r: &Value) -> Result<bool, ScriptError> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(a <= b),
        (Value::Str(a), Value::Str(b)) => Ok(a.as_bytes() <= b.as_bytes()),
        _ => Err(compare_error(l, r)),
    }
}

pub fn arith(op: BinOp, l: &Value, r: &Value) -> Result<Value, ScriptError> {
    let value = match op {
        BinOp::Add => {
            let (a, b) = numbers(l, r)?;
            Value::Number(a + b)
        }
        BinOp::Sub => {
            let (a, b) = numbers(l, r)?;
            Value::Number(a - b)
        }
        BinOp::Mul => {
            let (a, b) = numbers(l, r)?;
            Value::Number(a * b)
        }
        BinOp::Div => {
            let (a, b) = numbers(l, r)?;
            Value::Number(a / b)
        }
        BinOp::IDiv => {
            let (a, b) = numbers(l, r)?;
            Value::Number((a / b).floor())
        }
        BinOp::Mod => {
            let (a, b) = numbers(l, r)?;
            Value::Number(a - (a / b).floor() * b)
        }
        BinOp::Pow => {
            let (a, b) = numbers(l, r)?;
            Value::Number(a.powf(b))
        }
        BinOp::Concat => match (l.to_str(), r.to_str()) {
            (Some(a), Some(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(&a);
                s.push_str(&b);
                Value::string(s)
            }
            _ => {
                let bad = if l.to_str().is_none() { l } else { r };
                return Err(ScriptError::runtime(format!(
                    "attempt to concatenate a {} value",
                    bad.type_name()
                )));
            }
        },
        BinOp::Eq => Value::Bool(l.raw_eq(r)),
        BinOp::Ne => Value::Bool(!l.raw_eq(r)),
        BinOp::Lt => Value::Bool(less_than(l, r)?),
        BinOp::Le => Value::Bool(less_equal(l, r)?),
        BinOp::Gt => Value::Bool(less_than(r, l)?),
        BinOp::Ge => Value::Bool(less_equal(r, l)?),
        BinOp::And => {
            if l.truthy() {
                r.clone()
            } else {
                l.clone()
            }
        }
        BinOp::Or => {
            if l.truthy() {
                l.clone()
            } else {
                r.clone()
            }
        }
    };
    Ok(value)
}

/// `tostring` semantics.
pub fn to_display(v: &Value) -> String {
    match v {
        Value::Number(n) => number_to_string(*n),
        other => other.to_string(),
    }
}
