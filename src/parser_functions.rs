//! Parser functions (`{{#if:...}}` and friends) and magic words.
//!
//! Branch arguments arrive unexpanded and are expanded only when chosen.

use crate::expand::{Expander, Frame};
use crate::models::Namespace;
use crate::preprocess::Part;
use crate::script::value::number_to_string;

const MAX_PAD_LENGTH: usize = 500;

/// Magic words that take no argument.
pub(crate) fn magic_word(exp: &Expander<'_>, name: &str) -> Option<String> {
    let title = exp.page_title().to_string();
    title_word(name, &title).or_else(|| match name {
        "!" => Some("|".to_string()),
        "=" => Some("=".to_string()),
        _ => None,
    })
}

fn title_word(name: &str, title: &str) -> Option<String> {
    let (ns, local) = Namespace::split_title(title);
    match name {
        "PAGENAME" => Some(local.to_string()),
        "FULLPAGENAME" => Some(title.trim().to_string()),
        "NAMESPACE" => Some(ns.prefix().unwrap_or("").to_string()),
        _ => None,
    }
}

/// Dispatches `{{name:first|rest...}}`. Returns `None` when `name` is not a
/// parser function, so the caller can treat the call as a template.
pub(crate) fn call(
    exp: &mut Expander<'_>,
    name: &str,
    first: &str,
    rest: &[Part],
    frame: &Frame,
) -> Option<String> {
    if let Some(word) = title_word(name, first) {
        return Some(word);
    }
    let lower = name.to_ascii_lowercase();
    let result = match lower.as_str() {
        "#if" => {
            let branch = if first.trim().is_empty() { 1 } else { 0 };
            arg(exp, rest, branch, frame)
        }
        "#ifeq" => {
            let other = match rest.first() {
                Some(part) => exp.expand_part(part, frame),
                None => String::new(),
            };
            let branch = if values_equal(first, other.trim()) { 1 } else { 2 };
            arg(exp, rest, branch, frame)
        }
        "#ifexist" => {
            let branch = if exp.page_exists(first) { 0 } else { 1 };
            arg(exp, rest, branch, frame)
        }
        "#ifexpr" => match eval_expr(first) {
            Ok(v) => arg(exp, rest, if v != 0.0 { 0 } else { 1 }, frame),
            Err(message) => expr_error(&message),
        },
        "#switch" => switch(exp, first.trim(), rest, frame),
        "#expr" => match eval_expr(first) {
            Ok(v) => format_number(v),
            Err(message) => expr_error(&message),
        },
        "#tag" => tag(exp, first.trim(), rest, frame),
        "#language" => exp
            .language_name(first.trim())
            .unwrap_or_else(|| first.trim().to_string()),
        "lc" => first.to_lowercase(),
        "uc" => first.to_uppercase(),
        "lcfirst" => map_first(first, |c| c.to_lowercase().collect()),
        "ucfirst" => map_first(first, |c| c.to_uppercase().collect()),
        "urlencode" => urlencode(first),
        "anchorencode" => anchorencode(first),
        "padleft" | "padright" => {
            let length = arg(exp, rest, 0, frame);
            let pad = arg(exp, rest, 1, frame);
            pad_string(first, &length, &pad, lower == "padleft")
        }
        "#titleparts" => {
            let count = arg(exp, rest, 0, frame);
            let start = arg(exp, rest, 1, frame);
            title_parts(first, &count, &start)
        }
        _ => return None,
    };
    Some(result)
}

fn arg(exp: &mut Expander<'_>, rest: &[Part], i: usize, frame: &Frame) -> String {
    match rest.get(i) {
        Some(part) => exp.expand_part(part, frame).trim().to_string(),
        None => String::new(),
    }
}

/// Numeric comparison when both sides are numbers, string comparison otherwise.
fn values_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a == b,
    }
}

fn switch(exp: &mut Expander<'_>, value: &str, rest: &[Part], frame: &Frame) -> String {
    let mut found = false;
    let mut default: Option<&Part> = None;
    let mut last_unnamed: Option<String> = None;
    for part in rest {
        match part.name_nodes() {
            Some(name_nodes) => {
                last_unnamed = None;
                let key = exp.expand_nodes(name_nodes, frame);
                let key = key.trim();
                if found || values_equal(key, value) {
                    return exp.expand_nodes(part.value_nodes(), frame).trim().to_string();
                }
                if key == "#default" {
                    default = Some(part);
                }
            }
            None => {
                let key = exp.expand_nodes(&part.nodes, frame).trim().to_string();
                if values_equal(&key, value) {
                    found = true;
                }
                last_unnamed = Some(key);
            }
        }
    }
    if let Some(fallback) = last_unnamed {
        return fallback;
    }
    match default {
        Some(part) => exp.expand_nodes(part.value_nodes(), frame).trim().to_string(),
        None => String::new(),
    }
}

fn tag(exp: &mut Expander<'_>, name: &str, rest: &[Part], frame: &Frame) -> String {
    let content = match rest.first() {
        Some(part) => exp.expand_part(part, frame),
        None => String::new(),
    };
    let mut out = format!("<{}", name);
    for part in rest.iter().skip(1) {
        if let Some(name_nodes) = part.name_nodes() {
            let key = exp.expand_nodes(name_nodes, frame);
            let value = exp.expand_nodes(part.value_nodes(), frame);
            let value = value.trim().trim_matches('"');
            out.push_str(&format!(" {}=\"{}\"", key.trim(), value));
        }
    }
    out.push('>');
    out.push_str(&content);
    out.push_str(&format!("</{}>", name));
    out
}

fn map_first(s: &str, f: impl Fn(char) -> String) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => {
            let mut out = f(c);
            out.push_str(chars.as_str());
            out
        }
        None => String::new(),
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.trim().bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn anchorencode(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| !matches!(c, '[' | ']' | '{' | '}' | '|'))
        .collect()
}

fn pad_string(s: &str, length: &str, pad: &str, left: bool) -> String {
    let target = length.parse::<usize>().unwrap_or(0).min(MAX_PAD_LENGTH);
    let pad = if pad.is_empty() { "0" } else { pad };
    let have = s.chars().count();
    if have >= target {
        return s.to_string();
    }
    let fill: String = pad.chars().cycle().take(target - have).collect();
    if left {
        format!("{}{}", fill, s)
    } else {
        format!("{}{}", s, fill)
    }
}

/// `{{#titleparts:a/b/c|count|first}}`; negative values count from the end.
fn title_parts(title: &str, count: &str, first: &str) -> String {
    let segments: Vec<&str> = title.trim().split('/').collect();
    let len = segments.len() as i64;
    let first: i64 = first.parse().unwrap_or(1);
    let start = match first {
        f if f > 0 => f - 1,
        0 => 0,
        f => (len + f).max(0),
    };
    let count: i64 = count.parse().unwrap_or(0);
    let end = match count {
        0 => len,
        c if c > 0 => start.saturating_add(c).min(len),
        c => (len + c).max(start),
    };
    if start >= len || start >= end {
        return String::new();
    }
    segments[start as usize..end as usize].join("/")
}

fn expr_error(message: &str) -> String {
    format!("<strong class=\"error\">Expression error: {}</strong>", message)
}

fn format_number(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    number_to_string(v)
}

#[derive(Debug, Clone, PartialEq)]
enum ExprToken {
    Num(f64),
    Op(&'static str),
    Open,
    Close,
}

fn tokenize_expr(s: &str) -> Result<Vec<ExprToken>, String> {
    const WORDS: &[&str] = &[
        "mod", "div", "round", "and", "or", "not", "floor", "ceil", "trunc", "abs", "sqrt",
    ];
    let chars: Vec<char> = s.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                let mut j = i + 1;
                if j < chars.len() && matches!(chars[j], '+' | '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| format!("unrecognized number \"{}\"", text))?;
            tokens.push(ExprToken::Num(n));
        } else if c.is_alphabetic() {
            let start = i;
            while i < chars.len() && chars[i].is_alphabetic() {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect::<String>().to_lowercase();
            if word == "pi" {
                tokens.push(ExprToken::Num(std::f64::consts::PI));
            } else if let Some(op) = WORDS.iter().find(|w| **w == word) {
                tokens.push(ExprToken::Op(op));
            } else {
                return Err(format!("unrecognized word \"{}\"", word));
            }
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let op = match two.as_str() {
                "<=" => Some("<="),
                ">=" => Some(">="),
                "<>" | "!=" => Some("!="),
                _ => None,
            };
            if let Some(op) = op {
                tokens.push(ExprToken::Op(op));
                i += 2;
                continue;
            }
            let token = match c {
                '(' => ExprToken::Open,
                ')' => ExprToken::Close,
                '+' => ExprToken::Op("+"),
                '-' | '\u{2212}' => ExprToken::Op("-"),
                '*' => ExprToken::Op("*"),
                '/' => ExprToken::Op("/"),
                '^' => ExprToken::Op("^"),
                '=' => ExprToken::Op("="),
                '<' => ExprToken::Op("<"),
                '>' => ExprToken::Op(">"),
                other => return Err(format!("unrecognized punctuation character \"{}\"", other)),
            };
            tokens.push(token);
            i += 1;
        }
    }
    Ok(tokens)
}

struct ExprParser {
    tokens: Vec<ExprToken>,
    pos: usize,
}

impl ExprParser {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(ExprToken::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn eat(&mut self, ops: &[&str]) -> Option<&'static str> {
        let op = self.peek_op().filter(|op| ops.contains(op))?;
        self.pos += 1;
        Some(op)
    }

    fn or(&mut self) -> Result<f64, String> {
        let mut v = self.and()?;
        while self.eat(&["or"]).is_some() {
            let r = self.and()?;
            v = bool_num(v != 0.0 || r != 0.0);
        }
        Ok(v)
    }

    fn and(&mut self) -> Result<f64, String> {
        let mut v = self.comparison()?;
        while self.eat(&["and"]).is_some() {
            let r = self.comparison()?;
            v = bool_num(v != 0.0 && r != 0.0);
        }
        Ok(v)
    }

    fn comparison(&mut self) -> Result<f64, String> {
        let mut v = self.additive()?;
        while let Some(op) = self.eat(&["=", "!=", "<", ">", "<=", ">="]) {
            let r = self.additive()?;
            v = bool_num(match op {
                "=" => v == r,
                "!=" => v != r,
                "<" => v < r,
                ">" => v > r,
                "<=" => v <= r,
                _ => v >= r,
            });
        }
        Ok(v)
    }

    fn additive(&mut self) -> Result<f64, String> {
        let mut v = self.multiplicative()?;
        while let Some(op) = self.eat(&["+", "-"]) {
            let r = self.multiplicative()?;
            v = if op == "+" { v + r } else { v - r };
        }
        Ok(v)
    }

    fn multiplicative(&mut self) -> Result<f64, String> {
        let mut v = self.round()?;
        while let Some(op) = self.eat(&["*", "/", "div", "mod"]) {
            let r = self.round()?;
            v = match op {
                "*" => v * r,
                "mod" => {
                    let (a, b) = (v.trunc() as i64, r.trunc() as i64);
                    if b == 0 {
                        return Err("Division by zero.".to_string());
                    }
                    a.wrapping_rem(b) as f64
                }
                _ => {
                    if r == 0.0 {
                        return Err("Division by zero.".to_string());
                    }
                    v / r
                }
            };
        }
        Ok(v)
    }

    fn round(&mut self) -> Result<f64, String> {
        let mut v = self.power()?;
        while self.eat(&["round"]).is_some() {
            let digits = self.power()?.trunc() as i32;
            let scale = 10f64.powi(digits);
            v = (v * scale).round() / scale;
        }
        Ok(v)
    }

    fn power(&mut self) -> Result<f64, String> {
        let mut v = self.unary()?;
        while self.eat(&["^"]).is_some() {
            let r = self.unary()?;
            v = v.powf(r);
        }
        Ok(v)
    }

    fn unary(&mut self) -> Result<f64, String> {
        if let Some(op) = self.eat(&["-", "+", "not", "floor", "ceil", "trunc", "abs", "sqrt"]) {
            let v = self.unary()?;
            return Ok(match op {
                "-" => -v,
                "+" => v,
                "not" => bool_num(v == 0.0),
                "floor" => v.floor(),
                "ceil" => v.ceil(),
                "trunc" => v.trunc(),
                "abs" => v.abs(),
                _ => v.sqrt(),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<f64, String> {
        match self.tokens.get(self.pos).cloned() {
            Some(ExprToken::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(ExprToken::Open) => {
                self.pos += 1;
                let v = self.or()?;
                if self.tokens.get(self.pos) != Some(&ExprToken::Close) {
                    return Err("Missing closing bracket.".to_string());
                }
                self.pos += 1;
                Ok(v)
            }
            Some(ExprToken::Close) => Err("Unexpected closing bracket.".to_string()),
            Some(ExprToken::Op(op)) => Err(format!("Unexpected {} operator.", op)),
            None => Err("Missing operand.".to_string()),
        }
    }
}

fn bool_num(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Evaluates a `#expr` expression. Empty input evaluates to zero.
fn eval_expr(s: &str) -> Result<f64, String> {
    let tokens = tokenize_expr(s)?;
    if tokens.is_empty() {
        return Ok(0.0);
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let v = parser.or()?;
    if parser.pos < parser.tokens.len() {
        return Err("Unexpected number.".to_string());
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Limits;
    use crate::expand::expand_page;
    use crate::languages::LanguageTable;
    use crate::store::PageStore;
    use std::sync::Arc;

    fn run(body: &str) -> String {
        let mut store = PageStore::new();
        store.put(Namespace::Template, "exists", "yes", false);
        store.put(Namespace::Template, "echo", "{{{1}}}", false);
        expand_page(
            &store,
            Arc::new(LanguageTable::builtin()),
            Limits::default(),
            "Appendix:Colors/red",
            body,
        )
        .text
    }

    #[test]
    fn if_chooses_branch_on_nonempty_test() {
        assert_eq!(run("{{#if: x | yes | no }}"), "yes");
        assert_eq!(run("{{#if:   | yes | no }}"), "no");
        assert_eq!(run("{{#if: | yes }}"), "");
    }

    #[test]
    fn untaken_branch_is_not_expanded() {
        let out = run("{{#if: x | ok | {{missing}} }}");
        assert_eq!(out, "ok");
    }

    #[test]
    fn ifeq_compares_numbers_and_strings() {
        assert_eq!(run("{{#ifeq: 01 | 1 | same | diff}}"), "same");
        assert_eq!(run("{{#ifeq: a | b | same | diff}}"), "diff");
        assert_eq!(run("{{#ifeq: {{echo|a}} | a | same | diff}}"), "same");
    }

    #[test]
    fn ifexist_uses_store() {
        assert_eq!(run("{{#ifexist: Template:exists | y | n}}"), "y");
        assert_eq!(run("{{#ifexist: Template:nothing | y | n}}"), "n");
    }

    #[test]
    fn switch_cases() {
        assert_eq!(run("{{#switch: b | a = 1 | b = 2 | #default = 3}}"), "2");
        assert_eq!(run("{{#switch: z | a = 1 | #default = 3}}"), "3");
        assert_eq!(run("{{#switch: b | a | b | c = shared | d = 4}}"), "shared");
        assert_eq!(run("{{#switch: q | a = 1 | last}}"), "last");
        assert_eq!(run("{{#switch: q | a = 1}}"), "");
    }

    #[test]
    fn expr_arithmetic() {
        assert_eq!(eval_expr("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(eval_expr("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(eval_expr("7 mod 3").unwrap(), 1.0);
        assert_eq!(eval_expr("2 ^ 10").unwrap(), 1024.0);
        assert_eq!(eval_expr("3 > 2 and 1 = 1").unwrap(), 1.0);
        assert_eq!(eval_expr("-4 + abs -2").unwrap(), -2.0);
        assert_eq!(eval_expr("2.567 round 2").unwrap(), 2.57);
        assert!(eval_expr("1 / 0").is_err());
        assert!(eval_expr("1 +").is_err());
        assert_eq!(run("{{#expr: 10 / 4}}"), "2.5");
        assert_eq!(eval_expr("-1e30 mod -1").unwrap(), 0.0);
        assert_eq!(eval_expr("-7 mod 3").unwrap(), -1.0);
        assert!(eval_expr("5 mod 0").is_err());
        assert!(run("{{#expr: 1 + x}}").contains("Expression error"));
    }

    #[test]
    fn string_functions() {
        assert_eq!(run("{{lc:ÉCOLE}}"), "école");
        assert_eq!(run("{{uc:abc}}"), "ABC");
        assert_eq!(run("{{ucfirst:été}}"), "Été");
        assert_eq!(run("{{lcfirst:ABC}}"), "aBC");
        assert_eq!(run("{{urlencode:a b&c}}"), "a+b%26c");
        assert_eq!(run("{{anchorencode:Etymology 1}}"), "Etymology_1");
        assert_eq!(run("{{padleft:7|3}}"), "007");
        assert_eq!(run("{{padright:ab|5|xy}}"), "abxyx");
    }

    #[test]
    fn title_magic_words() {
        assert_eq!(run("{{PAGENAME}}"), "Colors/red");
        assert_eq!(run("{{FULLPAGENAME}}"), "Appendix:Colors/red");
        assert_eq!(run("{{NAMESPACE}}"), "Appendix");
        assert_eq!(run("{{PAGENAME:Template:foo}}"), "foo");
        assert_eq!(run("{{#titleparts: a/b/c | 1 | 2}}"), "b");
        assert_eq!(run("{{#titleparts: a/b/c | -1}}"), "a/b");
        assert_eq!(run("{{#titleparts: a/b/c | 9223372036854775807 | 9223372036854775807}}"), "");
        assert_eq!(run("{{#titleparts: a/b/c | 9223372036854775807 | 2}}"), "b/c");
        assert_eq!(run("a{{!}}b{{=}}c"), "a|b=c");
    }

    #[test]
    fn tag_and_language() {
        assert_eq!(run("{{#tag:span|hi|class=x}}"), "<span class=\"x\">hi</span>");
        assert_eq!(run("{{#language:fr}}"), "French");
        assert_eq!(run("{{#language:zzz}}"), "zzz");
    }
}
