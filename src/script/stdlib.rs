//! Base functions and the `string`, `mw.ustring`, `table` and `math` libraries.

use super::host::require;
use super::interp::{to_display, Interp};
use super::pattern::{self, Capture, Match};
use super::value::{Table, Value};
use crate::error::ScriptError;
use std::cell::Cell;
use std::rc::Rc;

/// Most values `unpack` may return at once.
const MAX_UNPACK: i128 = 8000;

/// Most digits allowed in a `string.format` width or precision.
const MAX_FORMAT_DIGITS: usize = 2;

fn bad_arg(n: usize, func: &str, message: &str) -> ScriptError {
    ScriptError::runtime(format!("bad argument #{} to '{}' ({})", n + 1, func, message))
}

/// String argument `n`, converting numbers.
pub fn arg_str(args: &[Value], n: usize, func: &str) -> Result<Rc<str>, ScriptError> {
    args.get(n)
        .and_then(Value::to_str)
        .ok_or_else(|| {
            let got = args.get(n).map(Value::type_name).unwrap_or("no value");
            bad_arg(n, func, &format!("string expected, got {}", got))
        })
}

pub fn arg_num(args: &[Value], n: usize, func: &str) -> Result<f64, ScriptError> {
    args.get(n).and_then(Value::to_number).ok_or_else(|| {
        let got = args.get(n).map(Value::type_name).unwrap_or("no value");
        bad_arg(n, func, &format!("number expected, got {}", got))
    })
}

fn opt_num(args: &[Value], n: usize, func: &str, default: f64) -> Result<f64, ScriptError> {
    match args.get(n) {
        None | Some(Value::Nil) => Ok(default),
        Some(_) => arg_num(args, n, func),
    }
}

fn arg_table(args: &[Value], n: usize, func: &str) -> Result<super::value::TableRef, ScriptError> {
    match args.get(n) {
        Some(Value::Table(t)) => Ok(t.clone()),
        other => Err(bad_arg(
            n,
            func,
            &format!(
                "table expected, got {}",
                other.map(Value::type_name).unwrap_or("no value")
            ),
        )),
    }
}

/// Subject text as matching units: bytes for `string`, characters for `mw.ustring`.
fn units(s: &str, unicode: bool) -> Vec<char> {
    if unicode {
        s.chars().collect()
    } else {
        s.bytes().map(|b| b as char).collect()
    }
}

fn from_units(units: &[char], unicode: bool) -> String {
    if unicode {
        units.iter().collect()
    } else {
        let bytes: Vec<u8> = units.iter().map(|&c| c as u32 as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Lua's relative-position rule: negative counts from the end.
fn start_index(pos: f64, len: usize) -> usize {
    let pos = pos as i64;
    if pos > 0 {
        pos as usize
    } else if pos == 0 {
        1
    } else if pos.unsigned_abs() > len as u64 {
        1
    } else {
        (len as i64 + pos + 1) as usize
    }
}

fn end_index(pos: f64, len: usize) -> usize {
    let pos = pos as i64;
    if pos > len as i64 {
        len
    } else if pos >= 0 {
        pos as usize
    } else if pos.unsigned_abs() > len as u64 {
        0
    } else {
        (len as i64 + pos + 1) as usize
    }
}

fn capture_value(src: &[char], capture: Capture, unicode: bool) -> Value {
    match capture {
        Capture::Span(a, b) => Value::string(from_units(&src[a..b], unicode)),
        Capture::Position(p) => Value::Number(p as f64),
    }
}

fn capture_values(src: &[char], m: &Match, unicode: bool) -> Vec<Value> {
    m.values()
        .into_iter()
        .map(|c| capture_value(src, c, unicode))
        .collect()
}

fn find_impl(args: &[Value], unicode: bool, want_captures: bool) -> Result<Vec<Value>, ScriptError> {
    let func = if want_captures { "match" } else { "find" };
    let s = arg_str(args, 0, func)?;
    let pat = arg_str(args, 1, func)?;
    let src = units(&s, unicode);
    let init = start_index(opt_num(args, 2, func, 1.0)?, src.len());
    if init > src.len() + 1 {
        return Ok(vec![Value::Nil]);
    }
    let pat_units = units(&pat, unicode);
    let plain = !want_captures && (args.get(3).is_some_and(Value::truthy) || pattern::is_plain(&pat_units));
    if plain {
        let found = if pat_units.is_empty() {
            Some(init - 1)
        } else {
            src[init - 1..]
                .windows(pat_units.len())
                .position(|w| w == pat_units.as_slice())
                .map(|p| p + init - 1)
        };
        return Ok(match found {
            Some(start) => vec![
                Value::Number(start as f64 + 1.0),
                Value::Number((start + pat_units.len()) as f64),
            ],
            None => vec![Value::Nil],
        });
    }
    let Some(m) = pattern::find(&src, &pat_units, init - 1, unicode)? else {
        return Ok(vec![Value::Nil]);
    };
    if want_captures {
        return Ok(capture_values(&src, &m, unicode));
    }
    let mut out = vec![
        Value::Number(m.start as f64 + 1.0),
        Value::Number(m.end as f64),
    ];
    out.extend(m.captures.iter().map(|&c| capture_value(&src, c, unicode)));
    Ok(out)
}

fn gmatch_impl(args: &[Value], unicode: bool) -> Result<Vec<Value>, ScriptError> {
    let s = arg_str(args, 0, "gmatch")?;
    let pat = arg_str(args, 1, "gmatch")?;
    let src = Rc::new(units(&s, unicode));
    let pat = Rc::new(units(&pat, unicode));
    let pos = Cell::new(0usize);
    let iter = Value::native("gmatch iterator", move |_, _| {
        let mut s = pos.get();
        while s <= src.len() {
            if let Some(m) = pattern::match_at(&src, &pat, s, unicode)? {
                pos.set(if m.end == s { m.end + 1 } else { m.end });
                return Ok(capture_values(&src, &m, unicode));
            }
            s += 1;
        }
        pos.set(src.len() + 1);
        Ok(vec![Value::Nil])
    });
    Ok(vec![iter])
}

fn gsub_impl(interp: &mut Interp<'_>, args: Vec<Value>, unicode: bool) -> Result<Vec<Value>, ScriptError> {
    let s = arg_str(&args, 0, "gsub")?;
    let pat = arg_str(&args, 1, "gsub")?;
    let repl = args.get(2).cloned().unwrap_or_default();
    if !matches!(repl, Value::Str(_) | Value::Number(_) | Value::Table(_) | Value::Function(_)) {
        return Err(bad_arg(2, "gsub", "string/function/table expected"));
    }
    let max = match args.get(3) {
        None | Some(Value::Nil) => usize::MAX,
        Some(_) => arg_num(&args, 3, "gsub")?.max(0.0) as usize,
    };
    let src = units(&s, unicode);
    let pat_units = units(&pat, unicode);
    let (anchored, pat_units) = match pat_units.first() {
        Some('^') => (true, pat_units[1..].to_vec()),
        _ => (false, pat_units),
    };

    let mut out: Vec<char> = Vec::with_capacity(src.len());
    let mut s = 0;
    let mut count = 0;
    while count < max {
        let found = pattern::match_at(&src, &pat_units, s, unicode)?;
        if let Some(m) = &found {
            count += 1;
            let whole = &src[m.start..m.end];
            let replacement = match &repl {
                Value::Str(_) | Value::Number(_) => {
                    let template = units(&to_display(&repl), unicode);
                    Some(expand_replacement(&template, &src, m)?)
                }
                Value::Table(t) => {
                    let key = capture_value(&src, m.values()[0], unicode);
                    let v = interp.index(&Value::Table(t.clone()), &key)?;
                    replacement_value(v, unicode)?
                }
                Value::Function(_) => {
                    let v = interp.call1(&repl, capture_values(&src, m, unicode))?;
                    replacement_value(v, unicode)?
                }
                _ => None,
            };
            match replacement {
                Some(r) => out.extend(r),
                None => out.extend_from_slice(whole),
            }
            interp.check_string_size(out.len())?;
        }
        match found {
            Some(m) if m.end > s => s = m.end,
            _ if s < src.len() => {
                out.push(src[s]);
                s += 1;
            }
            _ => break,
        }
        if anchored {
            break;
        }
    }
    if s < src.len() {
        out.extend_from_slice(&src[s..]);
    }
    Ok(vec![
        Value::string(from_units(&out, unicode)),
        Value::Number(count as f64),
    ])
}

fn replacement_value(v: Value, unicode: bool) -> Result<Option<Vec<char>>, ScriptError> {
    match v {
        Value::Nil | Value::Bool(false) => Ok(None),
        Value::Str(_) | Value::Number(_) => Ok(Some(units(&to_display(&v), unicode))),
        other => Err(ScriptError::runtime(format!(
            "invalid replacement value (a {})",
            other.type_name()
        ))),
    }
}

fn expand_replacement(template: &[char], src: &[char], m: &Match) -> Result<Vec<char>, ScriptError> {
    let mut out = Vec::with_capacity(template.len());
    let mut i = 0;
    while i < template.len() {
        let c = template[i];
        if c != '%' {
            out.push(c);
            i += 1;
            continue;
        }
        i += 1;
        let Some(&d) = template.get(i) else {
            return Err(ScriptError::runtime("invalid use of '%' in replacement string"));
        };
        i += 1;
        if d == '%' {
            out.push('%');
        } else if d == '0' {
            out.extend_from_slice(&src[m.start..m.end]);
        } else if let Some(n) = d.to_digit(10) {
            let values = m.values();
            let capture = values
                .get(n as usize - 1)
                .ok_or_else(|| ScriptError::runtime(format!("invalid capture index %{}", n)))?;
            match *capture {
                Capture::Span(a, b) => out.extend_from_slice(&src[a..b]),
                Capture::Position(p) => out.extend(p.to_string().chars()),
            }
        } else {
            return Err(ScriptError::runtime("invalid use of '%' in replacement string"));
        }
    }
    Ok(out)
}

/// `string.format`.
pub fn format(args: &[Value]) -> Result<String, ScriptError> {
    let fmt = arg_str(args, 0, "format")?;
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    let mut next_arg = 1;
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let mut flags = String::new();
        while let Some(&f) = chars.peek() {
            if "-+ #0".contains(f) {
                flags.push(f);
                chars.next();
            } else {
                break;
            }
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            width.push(d);
            chars.next();
        }
        let mut precision: Option<usize> = None;
        let mut precision_digits = 0;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                p.push(d);
                chars.next();
            }
            precision_digits = p.len();
            precision = Some(p.parse().unwrap_or(0));
        }
        if width.len() > MAX_FORMAT_DIGITS || precision_digits > MAX_FORMAT_DIGITS {
            return Err(ScriptError::runtime(
                "invalid conversion to 'format' (width or precision too long)",
            ));
        }
        let conv = chars
            .next()
            .ok_or_else(|| ScriptError::runtime("invalid conversion '%' to 'format'"))?;
        let n = next_arg;
        next_arg += 1;
        let body = match conv {
            'd' | 'i' => {
                let v = arg_num(args, n, "format")?;
                let mut s = format!("{}", v.trunc() as i64);
                if let Some(p) = precision {
                    let digits = s.trim_start_matches('-').len();
                    if digits < p {
                        let pad = "0".repeat(p - digits);
                        s = if v < 0.0 {
                            format!("-{}{}", pad, &s[1..])
                        } else {
                            format!("{}{}", pad, s)
                        };
                    }
                }
                sign(s, v, &flags)
            }
            'u' => format!("{}", arg_num(args, n, "format")?.trunc() as u64),
            'c' => {
                let v = arg_num(args, n, "format")? as u32;
                char::from_u32(v).map(String::from).unwrap_or_default()
            }
            'x' => format!("{:x}", arg_num(args, n, "format")?.trunc() as i64),
            'X' => format!("{:X}", arg_num(args, n, "format")?.trunc() as i64),
            'o' => format!("{:o}", arg_num(args, n, "format")?.trunc() as i64),
            'f' | 'F' => {
                let v = arg_num(args, n, "format")?;
                sign(format!("{:.*}", precision.unwrap_or(6), v), v, &flags)
            }
            'e' | 'E' => {
                let v = arg_num(args, n, "format")?;
                let s = format_exp(v, precision.unwrap_or(6));
                let s = if conv == 'E' { s.to_uppercase() } else { s };
                sign(s, v, &flags)
            }
            'g' | 'G' => {
                let v = arg_num(args, n, "format")?;
                let s = format_g(v, precision.unwrap_or(6));
                let s = if conv == 'G' { s.to_uppercase() } else { s };
                sign(s, v, &flags)
            }
            's' => {
                let v = args.get(n).ok_or_else(|| bad_arg(n, "format", "no value"))?;
                let s = to_display(v);
                match precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s,
                }
            }
            'q' => {
                let s = arg_str(args, n, "format")?;
                let mut q = String::from("\"");
                for ch in s.chars() {
                    match ch {
                        '"' => q.push_str("\\\""),
                        '\\' => q.push_str("\\\\"),
                        '\n' => q.push_str("\\n"),
                        '\r' => q.push_str("\\r"),
                        '\0' => q.push_str("\\0"),
                        other => q.push(other),
                    }
                }
                q.push('"');
                q
            }
            other => {
                return Err(ScriptError::runtime(format!(
                    "invalid option '%{}' to 'format'",
                    other
                )))
            }
        };
        let width: usize = width.parse().unwrap_or(0);
        let len = body.chars().count();
        if len >= width {
            out.push_str(&body);
        } else if flags.contains('-') {
            out.push_str(&body);
            out.push_str(&" ".repeat(width - len));
        } else if flags.contains('0') && !matches!(conv, 's' | 'q' | 'c') {
            let (sign_part, digits) = match body.strip_prefix('-') {
                Some(rest) => ("-", rest),
                None => ("", body.as_str()),
            };
            out.push_str(sign_part);
            out.push_str(&"0".repeat(width - len));
            out.push_str(digits);
        } else {
            out.push_str(&" ".repeat(width - len));
            out.push_str(&body);
        }
    }
    Ok(out)
}

fn sign(s: String, v: f64, flags: &str) -> String {
    if v >= 0.0 && flags.contains('+') {
        format!("+{}", s)
    } else if v >= 0.0 && flags.contains(' ') {
        format!(" {}", s)
    } else {
        s
    }
}

fn format_exp(v: f64, precision: usize) -> String {
    let s = format!("{:.*e}", precision, v);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            format!(
                "{}e{}{:02}",
                mantissa,
                if exp < 0 { '-' } else { '+' },
                exp.abs()
            )
        }
        None => s,
    }
}

fn format_g(v: f64, precision: usize) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    if !v.is_finite() {
        return super::value::number_to_string(v);
    }
    let p = precision.max(1);
    let exp = v.abs().log10().floor() as i32;
    if exp < -4 || exp >= p as i32 {
        let s = format_exp(v, p - 1);
        match s.split_once('e') {
            Some((mantissa, rest)) if mantissa.contains('.') => {
                format!("{}e{}", mantissa.trim_end_matches('0').trim_end_matches('.'), rest)
            }
            _ => s,
        }
    } else {
        let decimals = (p as i32 - 1 - exp).max(0) as usize;
        let s = format!("{:.*}", decimals, v);
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    }
}

/// Trims a character set (whitespace by default) from both ends.
pub fn trim_with(s: &str, charset: Option<&str>) -> Result<String, ScriptError> {
    match charset {
        None => Ok(s
            .trim_matches(|c: char| matches!(c, '\t' | '\r' | '\n' | '\x0c' | ' '))
            .to_string()),
        Some(cs) => {
            let pat: Vec<char> = format!("^[{}]*(.-)[{}]*$", cs, cs).chars().collect();
            let src: Vec<char> = s.chars().collect();
            match pattern::find(&src, &pat, 0, true)? {
                Some(m) => match m.values()[0] {
                    Capture::Span(a, b) => Ok(src[a..b].iter().collect()),
                    Capture::Position(_) => Ok(s.to_string()),
                },
                None => Ok(s.to_string()),
            }
        }
    }
}

/// `mw.text.split`: empty separators split into characters.
pub fn split(s: &str, pat: &str, plain: bool) -> Result<Vec<String>, ScriptError> {
    let src: Vec<char> = s.chars().collect();
    let pat: Vec<char> = pat.chars().collect();
    let plain = plain || pattern::is_plain(&pat);
    let mut pieces = Vec::new();
    let mut pos = 0;
    loop {
        let found = if plain {
            if pat.is_empty() {
                Some((pos, pos))
            } else {
                src[pos..]
                    .windows(pat.len())
                    .position(|w| w == pat.as_slice())
                    .map(|p| (pos + p, pos + p + pat.len()))
            }
        } else {
            pattern::find(&src, &pat, pos, true)?.map(|m| (m.start, m.end))
        };
        match found {
            None => {
                pieces.push(src[pos..].iter().collect());
                break;
            }
            Some((start, end)) if start == end => {
                if pos + 1 >= src.len() {
                    pieces.push(src[pos..].iter().collect());
                    break;
                }
                let cut = start.max(pos + 1);
                pieces.push(src[pos..cut].iter().collect());
                pos = cut;
            }
            Some((start, end)) => {
                pieces.push(src[pos..start].iter().collect());
                pos = end;
            }
        }
    }
    Ok(pieces)
}

/// Builds the `string` table (`unicode == false`) or `mw.ustring`.
pub fn string_table(unicode: bool) -> Table {
    let mut t = Table::new();
    t.set_str(
        "len",
        Value::native("len", move |_, args| {
            let s = arg_str(&args, 0, "len")?;
            let n = if unicode { s.chars().count() } else { s.len() };
            Ok(vec![Value::Number(n as f64)])
        }),
    );
    t.set_str(
        "sub",
        Value::native("sub", move |_, args| {
            let s = arg_str(&args, 0, "sub")?;
            let u = units(&s, unicode);
            let i = start_index(opt_num(&args, 1, "sub", 1.0)?, u.len());
            let j = end_index(opt_num(&args, 2, "sub", -1.0)?, u.len());
            if i > j || i > u.len() {
                return Ok(vec![Value::str("")]);
            }
            Ok(vec![Value::string(from_units(&u[i - 1..j], unicode))])
        }),
    );
    t.set_str(
        "upper",
        Value::native("upper", move |_, args| {
            let s = arg_str(&args, 0, "upper")?;
            Ok(vec![Value::string(if unicode {
                s.to_uppercase()
            } else {
                s.to_ascii_uppercase()
            })])
        }),
    );
    t.set_str(
        "lower",
        Value::native("lower", move |_, args| {
            let s = arg_str(&args, 0, "lower")?;
            Ok(vec![Value::string(if unicode {
                s.to_lowercase()
            } else {
                s.to_ascii_lowercase()
            })])
        }),
    );
    t.set_str(
        "rep",
        Value::native("rep", |interp, args| {
            let s = arg_str(&args, 0, "rep")?;
            let n = arg_num(&args, 1, "rep")?.max(0.0) as usize;
            let sep = match args.get(2) {
                None | Some(Value::Nil) => Rc::from(""),
                Some(_) => arg_str(&args, 2, "rep")?,
            };
            if n == 0 || (s.is_empty() && sep.is_empty()) {
                return Ok(vec![Value::str("")]);
            }
            interp.check_string_size(s.len().saturating_add(sep.len()).saturating_mul(n))?;
            let parts = vec![&*s; n];
            Ok(vec![Value::string(parts.join(&*sep))])
        }),
    );
    t.set_str(
        "reverse",
        Value::native("reverse", move |_, args| {
            let s = arg_str(&args, 0, "reverse")?;
            let mut u = units(&s, unicode);
            u.reverse();
            Ok(vec![Value::string(from_units(&u, unicode))])
        }),
    );
    let byte = Value::native("byte", move |_, args| {
        let s = arg_str(&args, 0, "byte")?;
        let u = units(&s, unicode);
        let i = start_index(opt_num(&args, 1, "byte", 1.0)?, u.len());
        let j = end_index(opt_num(&args, 2, "byte", i as f64)?, u.len());
        if i > j || i > u.len() {
            return Ok(Vec::new());
        }
        Ok(u[i - 1..j].iter().map(|&c| Value::Number(c as u32 as f64)).collect())
    });
    t.set_str("byte", byte.clone());
    if unicode {
        t.set_str("codepoint", byte);
    }
    t.set_str(
        "char",
        Value::native("char", move |_, args| {
            let mut u = Vec::with_capacity(args.len());
            for i in 0..args.len() {
                let code = arg_num(&args, i, "char")? as u32;
                let c = char::from_u32(code).ok_or_else(|| bad_arg(i, "char", "value out of range"))?;
                u.push(c);
            }
            Ok(vec![Value::string(from_units(&u, unicode))])
        }),
    );
    t.set_str(
        "find",
        Value::native("find", move |_, args| find_impl(&args, unicode, false)),
    );
    t.set_str(
        "match",
        Value::native("match", move |_, args| find_impl(&args, unicode, true)),
    );
    t.set_str(
        "gmatch",
        Value::native("gmatch", move |_, args| gmatch_impl(&args, unicode)),
    );
    t.set_str(
        "gsub",
        Value::native("gsub", move |interp, args| gsub_impl(interp, args, unicode)),
    );
    t.set_str(
        "format",
        Value::native("format", |_, args| Ok(vec![Value::string(format(&args)?)])),
    );
    t.set_str(
        "trim",
        Value::native("trim", |_, args| {
            let s = arg_str(&args, 0, "trim")?;
            Ok(vec![Value::string(trim_with(&s, None)?)])
        }),
    );
    t
}

fn table_library() -> Table {
    let mut t = Table::new();
    t.set_str(
        "insert",
        Value::native("insert", |_, args| {
            let table = arg_table(&args, 0, "insert")?;
            match args.len() {
                2 => table.borrow_mut().push(args[1].clone()),
                3 => {
                    let pos = arg_num(&args, 1, "insert")? as usize;
                    table.borrow_mut().insert_at(pos, args[2].clone())?;
                }
                _ => return Err(ScriptError::runtime("wrong number of arguments to 'insert'")),
            }
            Ok(Vec::new())
        }),
    );
    t.set_str(
        "remove",
        Value::native("remove", |_, args| {
            let table = arg_table(&args, 0, "remove")?;
            let len = table.borrow().len();
            let pos = opt_num(&args, 1, "remove", len as f64)? as usize;
            let removed = table.borrow_mut().remove_at(pos);
            Ok(vec![removed])
        }),
    );
    t.set_str(
        "concat",
        Value::native("concat", |interp, args| {
            let table = arg_table(&args, 0, "concat")?;
            let sep = match args.get(1) {
                None | Some(Value::Nil) => Rc::from(""),
                Some(_) => arg_str(&args, 1, "concat")?,
            };
            let table = table.borrow();
            let i = opt_num(&args, 2, "concat", 1.0)? as i64;
            let j = opt_num(&args, 3, "concat", table.len() as f64)? as i64;
            let mut parts = Vec::new();
            let mut total = 0usize;
            for k in i..=j {
                let v = table.get_int(k);
                let s = v.to_str().ok_or_else(|| {
                    ScriptError::runtime(format!(
                        "invalid value (at index {}) in table for 'concat'",
                        k
                    ))
                })?;
                total = total.saturating_add(s.len()).saturating_add(sep.len());
                interp.check_string_size(total)?;
                parts.push(s);
            }
            let parts: Vec<&str> = parts.iter().map(|s| &**s).collect();
            Ok(vec![Value::string(parts.join(&*sep))])
        }),
    );
    t.set_str(
        "sort",
        Value::native("sort", |interp, args| {
            let table = arg_table(&args, 0, "sort")?;
            let comp = args.get(1).cloned().unwrap_or_default();
            let items = table.borrow().array().to_vec();
            let mut less = |a: &Value, b: &Value| -> Result<bool, ScriptError> {
                if comp.is_nil() {
                    match super::interp::arith(super::ast::BinOp::Lt, a, b)? {
                        Value::Bool(lt) => Ok(lt),
                        _ => Ok(false),
                    }
                } else {
                    Ok(interp.call1(&comp, vec![a.clone(), b.clone()])?.truthy())
                }
            };
            let sorted = merge_sort(items, &mut less)?;
            *table.borrow_mut().array_mut() = sorted;
            Ok(Vec::new())
        }),
    );
    let unpack = Value::native("unpack", |_, args| {
        let table = arg_table(&args, 0, "unpack")?;
        let table = table.borrow();
        let i = opt_num(&args, 1, "unpack", 1.0)? as i64;
        let j = opt_num(&args, 2, "unpack", table.len() as f64)? as i64;
        if j as i128 - i as i128 >= MAX_UNPACK {
            return Err(ScriptError::runtime("too many results to unpack"));
        }
        Ok((i..=j).map(|k| table.get_int(k)).collect())
    });
    t.set_str("unpack", unpack);
    t
}

/// Stable merge sort with a fallible comparator.
fn merge_sort(
    mut items: Vec<Value>,
    less: &mut dyn FnMut(&Value, &Value) -> Result<bool, ScriptError>,
) -> Result<Vec<Value>, ScriptError> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(items, less)?;
    let right = merge_sort(right, less)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
        if less(r, l)? {
            merged.extend(right.next());
        } else {
            merged.extend(left.next());
        }
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

fn math_library() -> Table {
    let mut t = Table::new();
    let unary: [(&'static str, fn(f64) -> f64); 4] = [
        ("floor", f64::floor),
        ("ceil", f64::ceil),
        ("abs", f64::abs),
        ("sqrt", f64::sqrt),
    ];
    for (name, f) in unary {
        t.set_str(
            name,
            Value::native(name, move |_, args| Ok(vec![Value::Number(f(arg_num(&args, 0, name)?))])),
        );
    }
    t.set_str(
        "max",
        Value::native("max", |_, args| {
            let mut best = arg_num(&args, 0, "max")?;
            for i in 1..args.len() {
                best = best.max(arg_num(&args, i, "max")?);
            }
            Ok(vec![Value::Number(best)])
        }),
    );
    t.set_str(
        "min",
        Value::native("min", |_, args| {
            let mut best = arg_num(&args, 0, "min")?;
            for i in 1..args.len() {
                best = best.min(arg_num(&args, i, "min")?);
            }
            Ok(vec![Value::Number(best)])
        }),
    );
    t.set_str(
        "fmod",
        Value::native("fmod", |_, args| {
            let a = arg_num(&args, 0, "fmod")?;
            let b = arg_num(&args, 1, "fmod")?;
            Ok(vec![Value::Number(a % b)])
        }),
    );
    t.set_str("huge", Value::Number(f64::INFINITY));
    t.set_str("pi", Value::Number(std::f64::consts::PI));
    t
}

/// Installs base functions and libraries as globals.
pub fn install(interp: &mut Interp<'_>) {
    interp.set_global(
        "tostring",
        Value::native("tostring", |_, args| {
            Ok(vec![Value::string(to_display(&args.first().cloned().unwrap_or_default()))])
        }),
    );
    interp.set_global(
        "tonumber",
        Value::native("tonumber", |_, args| {
            let v = args.first().cloned().unwrap_or_default();
            let result = match args.get(1) {
                None | Some(Value::Nil) => v.to_number(),
                Some(_) => {
                    let base = arg_num(&args, 1, "tonumber")? as u32;
                    if !(2..=36).contains(&base) {
                        return Err(bad_arg(1, "tonumber", "base out of range"));
                    }
                    v.to_str()
                        .and_then(|s| i64::from_str_radix(s.trim(), base).ok())
                        .map(|n| n as f64)
                }
            };
            Ok(vec![result.map(Value::Number).unwrap_or_default()])
        }),
    );
    interp.set_global(
        "type",
        Value::native("type", |_, args| {
            let v = args
                .first()
                .ok_or_else(|| bad_arg(0, "type", "value expected"))?;
            Ok(vec![Value::str(v.type_name())])
        }),
    );
    interp.set_global(
        "select",
        Value::native("select", |_, args| {
            let n = args.first().cloned().unwrap_or_default();
            let rest = args.len().saturating_sub(1);
            if let Value::Str(s) = &n {
                if &**s == "#" {
                    return Ok(vec![Value::Number(rest as f64)]);
                }
            }
            let i = arg_num(&args, 0, "select")? as i64;
            let start = if i < 0 {
                let back = i.unsigned_abs();
                if back > rest as u64 {
                    return Err(bad_arg(0, "select", "index out of range"));
                }
                rest - back as usize + 1
            } else if i == 0 {
                return Err(bad_arg(0, "select", "index out of range"));
            } else {
                i as usize
            };
            Ok(args.into_iter().skip(start).collect())
        }),
    );
    interp.set_global(
        "error",
        Value::native("error", |_, args| {
            let v = args.first().cloned().unwrap_or_default();
            Err(ScriptError::Runtime(to_display(&v)))
        }),
    );
    interp.set_global(
        "assert",
        Value::native("assert", |_, args| {
            match args.first() {
                Some(v) if v.truthy() => Ok(args),
                _ => {
                    let message = args
                        .get(1)
                        .map(to_display)
                        .unwrap_or_else(|| "assertion failed!".to_string());
                    Err(ScriptError::Runtime(message))
                }
            }
        }),
    );
    interp.set_global(
        "pcall",
        Value::native("pcall", |interp, mut args| {
            if args.is_empty() {
                return Err(bad_arg(0, "pcall", "value expected"));
            }
            let func = args.remove(0);
            match interp.call(&func, args) {
                Ok(mut results) => {
                    results.insert(0, Value::Bool(true));
                    Ok(results)
                }
                // Budget and host faults are not catchable by module code.
                Err(e @ (ScriptError::UnsupportedHostCall(_)
                | ScriptError::StepBudget(_)
                | ScriptError::CallDepth(_))) => Err(e),
                Err(ScriptError::Runtime(message)) => {
                    Ok(vec![Value::Bool(false), Value::string(message)])
                }
                Err(other) => Ok(vec![Value::Bool(false), Value::string(other.to_string())]),
            }
        }),
    );
    let next = Value::native("next", |_, args| {
        let table = arg_table(&args, 0, "next")?;
        let key = args.get(1).cloned().unwrap_or_default();
        let entry = table.borrow().next(&key)?;
        Ok(match entry {
            Some((k, v)) => vec![k, v],
            None => vec![Value::Nil],
        })
    });
    interp.set_global("next", next.clone());
    interp.set_global(
        "pairs",
        Value::native("pairs", move |_, args| {
            let table = arg_table(&args, 0, "pairs")?;
            Ok(vec![next.clone(), Value::Table(table), Value::Nil])
        }),
    );
    let ipairs_iter = Value::native("ipairs iterator", |_, args| {
        let table = arg_table(&args, 0, "ipairs")?;
        let i = arg_num(&args, 1, "ipairs")? + 1.0;
        let v = table.borrow().get(&Value::Number(i));
        Ok(if v.is_nil() {
            vec![Value::Nil]
        } else {
            vec![Value::Number(i), v]
        })
    });
    interp.set_global(
        "ipairs",
        Value::native("ipairs", move |_, args| {
            let table = arg_table(&args, 0, "ipairs")?;
            Ok(vec![ipairs_iter.clone(), Value::Table(table), Value::Number(0.0)])
        }),
    );
    interp.set_global(
        "rawget",
        Value::native("rawget", |_, args| {
            let table = arg_table(&args, 0, "rawget")?;
            let key = args.get(1).cloned().unwrap_or_default();
            let v = table.borrow().get(&key);
            Ok(vec![v])
        }),
    );
    interp.set_global(
        "rawset",
        Value::native("rawset", |_, args| {
            let table = arg_table(&args, 0, "rawset")?;
            let key = args.get(1).cloned().unwrap_or_default();
            let value = args.get(2).cloned().unwrap_or_default();
            table.borrow_mut().set(key, value)?;
            Ok(vec![Value::Table(table)])
        }),
    );
    interp.set_global(
        "rawequal",
        Value::native("rawequal", |_, args| {
            let a = args.first().cloned().unwrap_or_default();
            let b = args.get(1).cloned().unwrap_or_default();
            Ok(vec![Value::Bool(a.raw_eq(&b))])
        }),
    );
    interp.set_global(
        "setmetatable",
        Value::native("setmetatable", |_, args| {
            let table = arg_table(&args, 0, "setmetatable")?;
            table.borrow_mut().metatable = match args.get(1) {
                Some(Value::Table(mt)) => Some(mt.clone()),
                None | Some(Value::Nil) => None,
                Some(_) => return Err(bad_arg(1, "setmetatable", "nil or table expected")),
            };
            Ok(vec![Value::Table(table)])
        }),
    );
    interp.set_global(
        "getmetatable",
        Value::native("getmetatable", |_, args| {
            Ok(vec![match args.first() {
                Some(Value::Table(t)) => t.borrow().metatable.clone().map(Value::Table).unwrap_or_default(),
                _ => Value::Nil,
            }])
        }),
    );
    interp.set_global(
        "require",
        Value::native("require", |interp, args| {
            let name = arg_str(&args, 0, "require")?;
            Ok(vec![require(interp, &name)?])
        }),
    );

    let string = string_table(false);
    let table = table_library();
    interp.set_global("unpack", table.get_str("unpack"));
    let string = Value::table(string);
    if let Value::Table(s) = &string {
        interp.string_lib = s.clone();
    }
    interp.set_global("string", string);
    interp.set_global("table", Value::table(table));
    interp.set_global("math", Value::table(math_library()));
    let globals = Value::Table(interp.globals.clone());
    interp.set_global("_G", globals);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(args: Vec<Value>) -> String {
        format(&args).unwrap()
    }

    #[test]
    fn format_conversions() {
        assert_eq!(f(vec![Value::str("%d items"), Value::Number(3.7)]), "3 items");
        assert_eq!(f(vec![Value::str("%5.2f|"), Value::Number(3.14159)]), " 3.14|");
        assert_eq!(f(vec![Value::str("%-4s|"), Value::str("ab")]), "ab  |");
        assert_eq!(f(vec![Value::str("%03d"), Value::Number(7.0)]), "007");
        assert_eq!(f(vec![Value::str("%x"), Value::Number(255.0)]), "ff");
        assert_eq!(f(vec![Value::str("%q"), Value::str("a\"b")]), "\"a\\\"b\"");
        assert_eq!(f(vec![Value::str("100%%")]), "100%");
        assert_eq!(f(vec![Value::str("%g"), Value::Number(0.5)]), "0.5");
        assert_eq!(f(vec![Value::str("%g"), Value::Number(1e20)]), "1e+20");
    }

    #[test]
    fn format_missing_argument_is_error() {
        assert!(format(&[Value::str("%s")]).is_err());
    }

    #[test]
    fn relative_indices() {
        assert_eq!(start_index(-2.0, 5), 4);
        assert_eq!(start_index(0.0, 5), 1);
        assert_eq!(end_index(-1.0, 5), 5);
        assert_eq!(end_index(10.0, 5), 5);
        assert_eq!(end_index(-10.0, 5), 0);
    }

    #[test]
    fn trim_and_split() {
        assert_eq!(trim_with("  a b \n", None).unwrap(), "a b");
        assert_eq!(trim_with("xxaxx", Some("x")).unwrap(), "a");
        assert_eq!(split("a,b,,c", ",", true).unwrap(), vec!["a", "b", "", "c"]);
        assert_eq!(split("a1b22c", "%d+", false).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(split("abc", "", false).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn byte_units_roundtrip_utf8() {
        let u = units("é", false);
        assert_eq!(u.len(), 2);
        assert_eq!(from_units(&u, false), "é");
    }
}
