//! Lua pattern matching over a sequence of characters.
//!
//! The byte-oriented `string` library maps each byte to one `char`, the
//! `mw.ustring` library uses real characters; `unicode` switches the
//! character classes between ASCII and Unicode predicates.

use crate::error::ScriptError;

const MAX_CAPTURES: usize = 32;
const MAX_RECURSION: usize = 200;
const ESC: char = '%';

#[derive(Debug, Clone, Copy, PartialEq)]
enum CapLen {
    Len(usize),
    Position,
    Unclosed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Capture {
    /// Half-open range into the subject.
    Span(usize, usize),
    /// 1-based position capture `()`.
    Position(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Capture>,
}

impl Match {
    /// Captures, or the whole match when the pattern has none.
    pub fn values(&self) -> Vec<Capture> {
        if self.captures.is_empty() {
            vec![Capture::Span(self.start, self.end)]
        } else {
            self.captures.clone()
        }
    }
}

struct Matcher<'a> {
    src: &'a [char],
    pat: &'a [char],
    unicode: bool,
    level: usize,
    capture: [(usize, CapLen); MAX_CAPTURES],
    depth: usize,
}

fn malformed(message: &str) -> ScriptError {
    ScriptError::runtime(format!("malformed pattern ({})", message))
}

impl<'a> Matcher<'a> {
    fn new(src: &'a [char], pat: &'a [char], unicode: bool) -> Self {
        Self {
            src,
            pat,
            unicode,
            level: 0,
            capture: [(0, CapLen::Unclosed); MAX_CAPTURES],
            depth: 0,
        }
    }

    fn class_end(&self, mut p: usize) -> Result<usize, ScriptError> {
        let c = self.pat[p];
        p += 1;
        if c == ESC {
            if p >= self.pat.len() {
                return Err(malformed("ends with '%'"));
            }
            return Ok(p + 1);
        }
        if c == '[' {
            if self.pat.get(p) == Some(&'^') {
                p += 1;
            }
            loop {
                if p >= self.pat.len() {
                    return Err(malformed("missing ']'"));
                }
                let c = self.pat[p];
                p += 1;
                if c == ESC && p < self.pat.len() {
                    p += 1;
                }
                if self.pat.get(p) == Some(&']') {
                    break;
                }
            }
            return Ok(p + 1);
        }
        Ok(p)
    }

    fn match_class(&self, c: char, class: char) -> bool {
        let result = match class.to_ascii_lowercase() {
            'a' => {
                if self.unicode {
                    c.is_alphabetic()
                } else {
                    c.is_ascii_alphabetic()
                }
            }
            'c' => c.is_control(),
            'd' => c.is_ascii_digit(),
            'l' => {
                if self.unicode {
                    c.is_lowercase()
                } else {
                    c.is_ascii_lowercase()
                }
            }
            'p' => {
                if self.unicode && !c.is_ascii() {
                    !c.is_alphanumeric() && !c.is_whitespace() && !c.is_control()
                } else {
                    c.is_ascii_punctuation()
                }
            }
            's' => {
                if self.unicode {
                    c.is_whitespace()
                } else {
                    c.is_ascii_whitespace() || c == '\x0b'
                }
            }
            'u' => {
                if self.unicode {
                    c.is_uppercase()
                } else {
                    c.is_ascii_uppercase()
                }
            }
            'w' => {
                if self.unicode {
                    c.is_alphanumeric()
                } else {
                    c.is_ascii_alphanumeric()
                }
            }
            'x' => c.is_ascii_hexdigit(),
            _ => return class == c,
        };
        if class.is_ascii_uppercase() {
            !result
        } else {
            result
        }
    }

    /// `p` is at `[`, `ec` at the closing `]`.
    fn match_bracket_class(&self, c: char, mut p: usize, ec: usize) -> bool {
        let mut sig = true;
        p += 1;
        if self.pat[p] == '^' {
            sig = false;
            p += 1;
        }
        while p < ec {
            if self.pat[p] == ESC {
                p += 1;
                if self.match_class(c, self.pat[p]) {
                    return sig;
                }
                p += 1;
            } else if p + 2 < ec && self.pat[p + 1] == '-' {
                if self.pat[p] <= c && c <= self.pat[p + 2] {
                    return sig;
                }
                p += 3;
            } else {
                if self.pat[p] == c {
                    return sig;
                }
                p += 1;
            }
        }
        !sig
    }

    fn single_match(&self, s: usize, p: usize, ep: usize) -> bool {
        let Some(&c) = self.src.get(s) else {
            return false;
        };
        match self.pat[p] {
            '.' => true,
            ESC => self.match_class(c, self.pat[p + 1]),
            '[' => self.match_bracket_class(c, p, ep - 1),
            pc => pc == c,
        }
    }

    fn do_match(&mut self, s: usize, p: usize) -> Result<Option<usize>, ScriptError> {
        self.depth += 1;
        if self.depth > MAX_RECURSION {
            return Err(ScriptError::runtime("pattern too complex"));
        }
        let result = self.match_inner(s, p);
        self.depth -= 1;
        result
    }

    fn match_inner(&mut self, mut s: usize, mut p: usize) -> Result<Option<usize>, ScriptError> {
        loop {
            if p >= self.pat.len() {
                return Ok(Some(s));
            }
            match self.pat[p] {
                '(' => {
                    return if self.pat.get(p + 1) == Some(&')') {
                        self.start_capture(s, p + 2, CapLen::Position)
                    } else {
                        self.start_capture(s, p + 1, CapLen::Unclosed)
                    };
                }
                ')' => return self.end_capture(s, p + 1),
                '$' if p + 1 == self.pat.len() => {
                    return Ok((s == self.src.len()).then_some(s));
                }
                ESC if self.pat.get(p + 1) == Some(&'b') => {
                    match self.match_balance(s, p + 2)? {
                        Some(next) => {
                            s = next;
                            p += 4;
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                ESC if self.pat.get(p + 1) == Some(&'f') => {
                    p += 2;
                    if self.pat.get(p) != Some(&'[') {
                        return Err(malformed("missing '[' after '%f'"));
                    }
                    let ep = self.class_end(p)?;
                    let prev = if s == 0 { '\0' } else { self.src[s - 1] };
                    let cur = self.src.get(s).copied().unwrap_or('\0');
                    if !self.match_bracket_class(prev, p, ep - 1)
                        && self.match_bracket_class(cur, p, ep - 1)
                    {
                        p = ep;
                        continue;
                    }
                    return Ok(None);
                }
                ESC if self.pat.get(p + 1).is_some_and(|c| c.is_ascii_digit()) => {
                    let digit = self.pat[p + 1];
                    match self.match_capture(s, digit)? {
                        Some(next) => {
                            s = next;
                            p += 2;
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                _ => {}
            }

            let ep = self.class_end(p)?;
            let matched = self.single_match(s, p, ep);
            match self.pat.get(ep) {
                Some('?') => {
                    if matched {
                        if let Some(end) = self.do_match(s + 1, ep + 1)? {
                            return Ok(Some(end));
                        }
                    }
                    p = ep + 1;
                    continue;
                }
                Some('*') => return self.max_expand(s, p, ep),
                Some('+') => {
                    return if matched {
                        self.max_expand(s + 1, p, ep)
                    } else {
                        Ok(None)
                    };
                }
                Some('-') => return self.min_expand(s, p, ep),
                _ => {}
            }
            if !matched {
                return Ok(None);
            }
            s += 1;
            p = ep;
        }
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> Result<Option<usize>, ScriptError> {
        let mut count = 0;
        while self.single_match(s + count, p, ep) {
            count += 1;
        }
        loop {
            if let Some(end) = self.do_match(s + count, ep + 1)? {
                return Ok(Some(end));
            }
            if count == 0 {
                return Ok(None);
            }
            count -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> Result<Option<usize>, ScriptError> {
        loop {
            if let Some(end) = self.do_match(s, ep + 1)? {
                return Ok(Some(end));
            }
            if self.single_match(s, p, ep) {
                s += 1;
            } else {
                return Ok(None);
            }
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, what: CapLen) -> Result<Option<usize>, ScriptError> {
        if self.level >= MAX_CAPTURES {
            return Err(ScriptError::runtime("too many captures"));
        }
        self.capture[self.level] = (s, what);
        self.level += 1;
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.level -= 1;
        }
        Ok(result)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> Result<Option<usize>, ScriptError> {
        let l = (0..self.level)
            .rev()
            .find(|&i| self.capture[i].1 == CapLen::Unclosed)
            .ok_or_else(|| malformed("invalid pattern capture"))?;
        self.capture[l].1 = CapLen::Len(s - self.capture[l].0);
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.capture[l].1 = CapLen::Unclosed;
        }
        Ok(result)
    }

    fn match_balance(&self, s: usize, p: usize) -> Result<Option<usize>, ScriptError> {
        if p + 1 >= self.pat.len() {
            return Err(malformed("missing arguments to '%b'"));
        }
        if self.src.get(s) != Some(&self.pat[p]) {
            return Ok(None);
        }
        let (open, close) = (self.pat[p], self.pat[p + 1]);
        let mut depth = 1;
        for i in s + 1..self.src.len() {
            let c = self.src[i];
            if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(i + 1));
                }
            } else if c == open {
                depth += 1;
            }
        }
        Ok(None)
    }

    fn match_capture(&self, s: usize, digit: char) -> Result<Option<usize>, ScriptError> {
        let index = (digit as usize).wrapping_sub('1' as usize);
        if index >= self.level {
            return Err(ScriptError::runtime(format!("invalid capture index %{}", digit)));
        }
        let (start, len) = match self.capture[index] {
            (start, CapLen::Len(len)) => (start, len),
            _ => return Err(ScriptError::runtime(format!("invalid capture index %{}", digit))),
        };
        if s + len <= self.src.len() && self.src[start..start + len] == self.src[s..s + len] {
            Ok(Some(s + len))
        } else {
            Ok(None)
        }
    }

    fn captures(&self) -> Result<Vec<Capture>, ScriptError> {
        (0..self.level)
            .map(|i| match self.capture[i] {
                (start, CapLen::Len(len)) => Ok(Capture::Span(start, start + len)),
                (start, CapLen::Position) => Ok(Capture::Position(start + 1)),
                (_, CapLen::Unclosed) => Err(ScriptError::runtime("unfinished capture")),
            })
            .collect()
    }
}

/// Tries to match `pat` (without a leading anchor) starting exactly at `s`.
pub fn match_at(
    src: &[char],
    pat: &[char],
    s: usize,
    unicode: bool,
) -> Result<Option<Match>, ScriptError> {
    let mut m = Matcher::new(src, pat, unicode);
    match m.do_match(s, 0)? {
        Some(end) => Ok(Some(Match {
            start: s,
            end,
            captures: m.captures()?,
        })),
        None => Ok(None),
    }
}

/// Finds the first match at or after `init`, honouring a leading `^`.
pub fn find(
    src: &[char],
    pat: &[char],
    init: usize,
    unicode: bool,
) -> Result<Option<Match>, ScriptError> {
    let (anchored, pat) = match pat.first() {
        Some('^') => (true, &pat[1..]),
        _ => (false, pat),
    };
    let mut s = init;
    while s <= src.len() {
        if let Some(m) = match_at(src, pat, s, unicode)? {
            return Ok(Some(m));
        }
        if anchored {
            break;
        }
        s += 1;
    }
    Ok(None)
}

/// True when the pattern has no magic characters and can be found literally.
pub fn is_plain(pat: &[char]) -> bool {
    !pat
        .iter()
        .any(|c| matches!(c, '^' | '$' | '*' | '+' | '?' | '.' | '(' | ')' | '[' | ']' | '%' | '-'))
}
