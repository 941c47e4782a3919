use crate::error::ScriptError;
use rustc_hash::FxHashMap;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(Rc<str>),
    Number(f64),
    Str(Rc<str>),

    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Caret,
    Hash,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Assign,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Colon,
    Comma,
    Dot,
    Concat,
    Ellipsis,

    Eof,
}

#[derive(Debug, Clone)]
pub struct Lexed {
    pub token: Token,
    pub line: usize,
}

fn keyword(word: &str) -> Option<Token> {
    let token = match word {
        "and" => Token::And,
        "break" => Token::Break,
        "do" => Token::Do,
        "else" => Token::Else,
        "elseif" => Token::Elseif,
        "end" => Token::End,
        "false" => Token::False,
        "for" => Token::For,
        "function" => Token::Function,
        "if" => Token::If,
        "in" => Token::In,
        "local" => Token::Local,
        "nil" => Token::Nil,
        "not" => Token::Not,
        "or" => Token::Or,
        "repeat" => Token::Repeat,
        "return" => Token::Return,
        "then" => Token::Then,
        "true" => Token::True,
        "until" => Token::Until,
        "while" => Token::While,
        _ => return None,
    };
    Some(token)
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
    names: FxHashMap<String, Rc<str>>,
}

/// Splits module source into tokens. Identifiers are interned so that the
/// interpreter can compare names by pointer.
pub fn tokenize(source: &str) -> Result<Vec<Lexed>, ScriptError> {
    let mut lexer = Lexer {
        src: source.as_bytes(),
        pos: 0,
        line: 1,
        names: FxHashMap::default(),
    };
    let mut tokens = Vec::new();
    loop {
        lexer.skip_trivia()?;
        let line = lexer.line;
        let token = lexer.next_token()?;
        let done = token == Token::Eof;
        tokens.push(Lexed { token, line });
        if done {
            return Ok(tokens);
        }
    }
}

impl<'a> Lexer<'a> {
    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::Syntax {
            line: self.line,
            message: message.into(),
        }
    }

    fn peek(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        self.src.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn skip_trivia(&mut self) -> Result<(), ScriptError> {
        loop {
            match self.peek() {
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                b' ' | b'\t' | b'\r' | 0x0b | 0x0c => self.pos += 1,
                b'-' if self.peek_at(1) == b'-' => {
                    self.pos += 2;
                    if self.peek() == b'[' {
                        if let Some(level) = self.long_bracket_level() {
                            self.long_string(level)?;
                            continue;
                        }
                    }
                    while self.pos < self.src.len() && self.peek() != b'\n' {
                        self.pos += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// At `[`, returns the level of a long bracket `[==[` if one starts here.
    fn long_bracket_level(&self) -> Option<usize> {
        let mut i = 1;
        while self.peek_at(i) == b'=' {
            i += 1;
        }
        (self.peek_at(i) == b'[').then_some(i - 1)
    }

    fn long_string(&mut self, level: usize) -> Result<String, ScriptError> {
        self.pos += level + 2;
        if self.peek() == b'\r' {
            self.pos += 1;
        }
        if self.peek() == b'\n' {
            self.line += 1;
            self.pos += 1;
        }
        let start = self.pos;
        while self.pos < self.src.len() {
            if self.peek() == b']' {
                let mut i = 1;
                while self.peek_at(i) == b'=' {
                    i += 1;
                }
                if i - 1 == level && self.peek_at(i) == b']' {
                    let text = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
                    self.pos += level + 2;
                    return Ok(text);
                }
            }
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.pos += 1;
        }
        Err(self.error("unfinished long string"))
    }

    fn next_token(&mut self) -> Result<Token, ScriptError> {
        let c = self.peek();
        if self.pos >= self.src.len() {
            return Ok(Token::Eof);
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            return Ok(self.name());
        }
        if c.is_ascii_digit() || (c == b'.' && self.peek_at(1).is_ascii_digit()) {
            return self.number();
        }
        let two = [c, self.peek_at(1)];
        let token = match &two {
            b"==" => Some(Token::Eq),
            b"~=" => Some(Token::Ne),
            b"<=" => Some(Token::Le),
            b">=" => Some(Token::Ge),
            b"//" => Some(Token::DoubleSlash),
            _ => None,
        };
        if let Some(token) = token {
            self.pos += 2;
            return Ok(token);
        }
        if c == b'.' && self.peek_at(1) == b'.' {
            if self.peek_at(2) == b'.' {
                self.pos += 3;
                return Ok(Token::Ellipsis);
            }
            self.pos += 2;
            return Ok(Token::Concat);
        }
        if c == b'"' || c == b'\'' {
            return self.quoted(c);
        }
        if c == b'[' {
            if let Some(level) = self.long_bracket_level() {
                let text = self.long_string(level)?;
                return Ok(Token::Str(Rc::from(text)));
            }
        }
        self.pos += 1;
        let token = match c {
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'^' => Token::Caret,
            b'#' => Token::Hash,
            b'<' => Token::Lt,
            b'>' => Token::Gt,
            b'=' => Token::Assign,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b';' => Token::Semi,
            b':' => Token::Colon,
            b',' => Token::Comma,
            b'.' => Token::Dot,
            other => return Err(self.error(format!("unexpected symbol '{}'", other as char))),
        };
        Ok(token)
    }

    fn name(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.pos += 1;
        }
        let word = String::from_utf8_lossy(&self.src[start..self.pos]).into_owned();
        if let Some(kw) = keyword(&word) {
            return kw;
        }
        let interned = self
            .names
            .entry(word)
            .or_insert_with_key(|w| Rc::from(w.as_str()))
            .clone();
        Token::Name(interned)
    }

    fn number(&mut self) -> Result<Token, ScriptError> {
        let start = self.pos;
        if self.peek() == b'0' && matches!(self.peek_at(1), b'x' | b'X') {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_ascii_hexdigit() {
                self.pos += 1;
            }
            let digits = std::str::from_utf8(&self.src[digits_start..self.pos]).unwrap_or("");
            return u64::from_str_radix(digits, 16)
                .map(|n| Token::Number(n as f64))
                .map_err(|_| self.error("malformed hex number"));
        }
        while self.peek().is_ascii_digit() || (self.peek() == b'.' && self.peek_at(1) != b'.') {
            self.pos += 1;
        }
        if matches!(self.peek(), b'e' | b'E') {
            self.pos += 1;
            if matches!(self.peek(), b'+' | b'-') {
                self.pos += 1;
            }
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap_or("");
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("malformed number '{}'", text)))
    }

    fn quoted(&mut self, quote: u8) -> Result<Token, ScriptError> {
        self.pos += 1;
        let mut bytes = Vec::new();
        loop {
            let c = self.peek();
            if self.pos >= self.src.len() || c == b'\n' {
                return Err(self.error("unfinished string"));
            }
            self.pos += 1;
            if c == quote {
                break;
            }
            if c != b'\\' {
                bytes.push(c);
                continue;
            }
            let esc = self.peek();
            self.pos += 1;
            match esc {
                b'n' => bytes.push(b'\n'),
                b't' => bytes.push(b'\t'),
                b'r' => bytes.push(b'\r'),
                b'a' => bytes.push(0x07),
                b'b' => bytes.push(0x08),
                b'f' => bytes.push(0x0c),
                b'v' => bytes.push(0x0b),
                b'\\' | b'"' | b'\'' => bytes.push(esc),
                b'\n' => {
                    self.line += 1;
                    bytes.push(b'\n');
                }
                b'x' => {
                    let hex = [self.peek(), self.peek_at(1)];
                    let value = std::str::from_utf8(&hex)
                        .ok()
                        .and_then(|h| u8::from_str_radix(h, 16).ok())
                        .ok_or_else(|| self.error("bad \\x escape"))?;
                    self.pos += 2;
                    bytes.push(value);
                }
                b'z' => {
                    while self.peek().is_ascii_whitespace() {
                        if self.peek() == b'\n' {
                            self.line += 1;
                        }
                        self.pos += 1;
                    }
                }
                d if d.is_ascii_digit() => {
                    let mut value: u32 = (d - b'0') as u32;
                    for _ in 0..2 {
                        if self.peek().is_ascii_digit() {
                            value = value * 10 + (self.peek() - b'0') as u32;
                            self.pos += 1;
                        }
                    }
                    let byte = u8::try_from(value).map_err(|_| self.error("escape too large"))?;
                    bytes.push(byte);
                }
                other => return Err(self.error(format!("invalid escape '\\{}'", other as char))),
            }
        }
        Ok(Token::Str(Rc::from(String::from_utf8_lossy(&bytes).as_ref())))
    }
}
