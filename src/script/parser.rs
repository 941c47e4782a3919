use super::ast::{BinOp, Block, Chunk, Expr, Field, FuncBody, Name, Stmt, UnOp};
use super::lexer::{tokenize, Lexed, Token};
use crate::error::ScriptError;
use std::rc::Rc;

/// Parses module source into a [`Chunk`].
pub fn parse_chunk(name: &str, source: &str) -> Result<Chunk, ScriptError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let body = parser.block()?;
    if parser.peek() != &Token::Eof {
        return Err(parser.unexpected("end of module"));
    }
    Ok(Chunk {
        name: name.to_string(),
        main: Rc::new(FuncBody {
            name: Rc::from("main chunk"),
            params: Vec::new(),
            is_vararg: true,
            body,
            line: 1,
        }),
    })
}

struct Parser {
    tokens: Vec<Lexed>,
    pos: usize,
}

// Binary operator precedences as (left, right); right-associative operators
// bind tighter on the right.
fn binary_op(token: &Token) -> Option<(BinOp, u8, u8)> {
    let op = match token {
        Token::Or => (BinOp::Or, 1, 1),
        Token::And => (BinOp::And, 2, 2),
        Token::Lt => (BinOp::Lt, 3, 3),
        Token::Gt => (BinOp::Gt, 3, 3),
        Token::Le => (BinOp::Le, 3, 3),
        Token::Ge => (BinOp::Ge, 3, 3),
        Token::Ne => (BinOp::Ne, 3, 3),
        Token::Eq => (BinOp::Eq, 3, 3),
        Token::Concat => (BinOp::Concat, 9, 8),
        Token::Plus => (BinOp::Add, 10, 10),
        Token::Minus => (BinOp::Sub, 10, 10),
        Token::Star => (BinOp::Mul, 11, 11),
        Token::Slash => (BinOp::Div, 11, 11),
        Token::DoubleSlash => (BinOp::IDiv, 11, 11),
        Token::Percent => (BinOp::Mod, 11, 11),
        Token::Caret => (BinOp::Pow, 14, 13),
        _ => return None,
    };
    Some(op)
}

const UNARY_PRIORITY: u8 = 12;

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_next(&self) -> &Token {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].token
    }

    fn line(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ScriptError> {
        if self.check(&token) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn unexpected(&self, expected: &str) -> ScriptError {
        ScriptError::Syntax {
            line: self.line(),
            message: format!("expected {} near {:?}", expected, self.peek()),
        }
    }

    fn name(&mut self) -> Result<Name, ScriptError> {
        match self.advance() {
            Token::Name(n) => Ok(n),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.unexpected("name"))
            }
        }
    }

    fn block_ends(&self) -> bool {
        matches!(
            self.peek(),
            Token::End | Token::Else | Token::Elseif | Token::Until | Token::Eof
        )
    }

    fn block(&mut self) -> Result<Block, ScriptError> {
        let mut block = Block::default();
        while !self.block_ends() {
            if self.check(&Token::Semi) {
                continue;
            }
            let line = self.line();
            if self.peek() == &Token::Return {
                self.advance();
                let exprs = if self.block_ends() || self.peek() == &Token::Semi {
                    Vec::new()
                } else {
                    self.expr_list()?
                };
                self.check(&Token::Semi);
                block.stmts.push((line, Stmt::Return(exprs)));
                if !self.block_ends() {
                    return Err(self.unexpected("end of block after return"));
                }
                break;
            }
            let stmt = self.statement()?;
            block.stmts.push((line, stmt));
        }
        Ok(block)
    }

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        match self.peek() {
            Token::Break => {
                self.advance();
                Ok(Stmt::Break)
            }
            Token::Do => {
                self.advance();
                let body = self.block()?;
                self.expect(Token::End, "'end'")?;
                Ok(Stmt::Do(body))
            }
            Token::While => {
                self.advance();
                let cond = self.expr()?;
                self.expect(Token::Do, "'do'")?;
                let body = self.block()?;
                self.expect(Token::End, "'end'")?;
                Ok(Stmt::While(cond, body))
            }
            Token::Repeat => {
                self.advance();
                let body = self.block()?;
                self.expect(Token::Until, "'until'")?;
                let cond = self.expr()?;
                Ok(Stmt::Repeat(body, cond))
            }
            Token::If => self.if_statement(),
            Token::For => self.for_statement(),
            Token::Function => self.function_statement(),
            Token::Local => {
                self.advance();
                if self.check(&Token::Function) {
                    let name = self.name()?;
                    let body = self.function_body(name.clone(), false)?;
                    return Ok(Stmt::LocalFunction(name, body));
                }
                let mut names = vec![self.name()?];
                while self.check(&Token::Comma) {
                    names.push(self.name()?);
                }
                let exprs = if self.check(&Token::Assign) {
                    self.expr_list()?
                } else {
                    Vec::new()
                };
                Ok(Stmt::Local(names, exprs))
            }
            _ => self.expr_statement(),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        let mut arms = Vec::new();
        let cond = self.expr()?;
        self.expect(Token::Then, "'then'")?;
        arms.push((cond, self.block()?));
        let mut otherwise = None;
        loop {
            match self.advance() {
                Token::Elseif => {
                    let cond = self.expr()?;
                    self.expect(Token::Then, "'then'")?;
                    arms.push((cond, self.block()?));
                }
                Token::Else => {
                    otherwise = Some(self.block()?);
                    self.expect(Token::End, "'end'")?;
                    break;
                }
                Token::End => break,
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.unexpected("'end'"));
                }
            }
        }
        Ok(Stmt::If(arms, otherwise))
    }

    fn for_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        let first = self.name()?;
        if self.check(&Token::Assign) {
            let start = self.expr()?;
            self.expect(Token::Comma, "','")?;
            let limit = self.expr()?;
            let step = if self.check(&Token::Comma) {
                Some(self.expr()?)
            } else {
                None
            };
            self.expect(Token::Do, "'do'")?;
            let body = self.block()?;
            self.expect(Token::End, "'end'")?;
            return Ok(Stmt::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
            });
        }
        let mut vars = vec![first];
        while self.check(&Token::Comma) {
            vars.push(self.name()?);
        }
        self.expect(Token::In, "'in'")?;
        let exprs = self.expr_list()?;
        self.expect(Token::Do, "'do'")?;
        let body = self.block()?;
        self.expect(Token::End, "'end'")?;
        Ok(Stmt::GenericFor { vars, exprs, body })
    }

    /// `function a.b.c:m() ... end` becomes an assignment to the index chain.
    fn function_statement(&mut self) -> Result<Stmt, ScriptError> {
        self.advance();
        let first = self.name()?;
        let mut full_name = first.to_string();
        let mut target = Expr::Name(first);
        let mut is_method = false;
        loop {
            if self.check(&Token::Dot) {
                let key = self.name()?;
                full_name.push('.');
                full_name.push_str(&key);
                target = Expr::Index(Box::new(target), Box::new(Expr::Str(key)));
            } else if self.check(&Token::Colon) {
                let key = self.name()?;
                full_name.push(':');
                full_name.push_str(&key);
                target = Expr::Index(Box::new(target), Box::new(Expr::Str(key)));
                is_method = true;
                break;
            } else {
                break;
            }
        }
        let body = self.function_body(Rc::from(full_name), is_method)?;
        Ok(Stmt::Assign(vec![target], vec![Expr::Function(body)]))
    }

    fn function_body(&mut self, name: Name, is_method: bool) -> Result<Rc<FuncBody>, ScriptError> {
        let line = self.line();
        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        if is_method {
            params.push(Rc::from("self"));
        }
        let mut is_vararg = false;
        if !self.check(&Token::RParen) {
            loop {
                if self.check(&Token::Ellipsis) {
                    is_vararg = true;
                    break;
                }
                params.push(self.name()?);
                if !self.check(&Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen, "')'")?;
        }
        let body = self.block()?;
        self.expect(Token::End, "'end'")?;
        Ok(Rc::new(FuncBody {
            name,
            params,
            is_vararg,
            body,
            line,
        }))
    }

    fn expr_statement(&mut self) -> Result<Stmt, ScriptError> {
        let first = self.suffixed_expr()?;
        if self.peek() == &Token::Assign || self.peek() == &Token::Comma {
            let mut targets = vec![first];
            while self.check(&Token::Comma) {
                targets.push(self.suffixed_expr()?);
            }
            self.expect(Token::Assign, "'='")?;
            for target in &targets {
                if !matches!(target, Expr::Name(_) | Expr::Index(..)) {
                    return Err(self.unexpected("assignable expression"));
                }
            }
            let values = self.expr_list()?;
            return Ok(Stmt::Assign(targets, values));
        }
        match first {
            Expr::Call(..) | Expr::Method(..) => Ok(Stmt::Call(first)),
            _ => Err(self.unexpected("function call or assignment")),
        }
    }

    fn expr_list(&mut self) -> Result<Vec<Expr>, ScriptError> {
        let mut exprs = vec![self.expr()?];
        while self.check(&Token::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> Result<Expr, ScriptError> {
        self.sub_expr(0)
    }

    fn sub_expr(&mut self, limit: u8) -> Result<Expr, ScriptError> {
        let unary = match self.peek() {
            Token::Not => Some(UnOp::Not),
            Token::Minus => Some(UnOp::Neg),
            Token::Hash => Some(UnOp::Len),
            _ => None,
        };
        let mut left = match unary {
            Some(op) => {
                self.advance();
                let operand = self.sub_expr(UNARY_PRIORITY)?;
                match (op, operand) {
                    (UnOp::Neg, Expr::Number(n)) => Expr::Number(-n),
                    (op, operand) => Expr::Unary(op, Box::new(operand)),
                }
            }
            None => self.simple_expr()?,
        };
        while let Some((op, left_prec, right_prec)) = binary_op(self.peek()) {
            if left_prec <= limit {
                break;
            }
            self.advance();
            let right = self.sub_expr(right_prec)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn simple_expr(&mut self) -> Result<Expr, ScriptError> {
        let expr = match self.peek().clone() {
            Token::Nil => Expr::Nil,
            Token::True => Expr::True,
            Token::False => Expr::False,
            Token::Number(n) => Expr::Number(n),
            Token::Str(s) => Expr::Str(s),
            Token::Ellipsis => Expr::Vararg,
            Token::LBrace => return self.table(),
            Token::Function => {
                self.advance();
                let line = self.line();
                let body = self.function_body(Rc::from(format!("function@{}", line)), false)?;
                return Ok(Expr::Function(body));
            }
            _ => return self.suffixed_expr(),
        };
        self.advance();
        Ok(expr)
    }

    fn primary_expr(&mut self) -> Result<Expr, ScriptError> {
        match self.peek().clone() {
            Token::Name(n) => {
                self.advance();
                Ok(Expr::Name(n))
            }
            Token::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn suffixed_expr(&mut self) -> Result<Expr, ScriptError> {
        let mut expr = self.primary_expr()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let key = self.name()?;
                    expr = Expr::Index(Box::new(expr), Box::new(Expr::Str(key)));
                }
                Token::LBracket => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(key));
                }
                Token::Colon => {
                    self.advance();
                    let method = self.name()?;
                    let args = self.call_args()?;
                    expr = Expr::Method(Box::new(expr), method, args);
                }
                Token::LParen | Token::LBrace | Token::Str(_) => {
                    let args = self.call_args()?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ScriptError> {
        match self.peek().clone() {
            Token::Str(s) => {
                self.advance();
                Ok(vec![Expr::Str(s)])
            }
            Token::LBrace => Ok(vec![self.table()?]),
            Token::LParen => {
                self.advance();
                if self.check(&Token::RParen) {
                    return Ok(Vec::new());
                }
                let args = self.expr_list()?;
                self.expect(Token::RParen, "')'")?;
                Ok(args)
            }
            _ => Err(self.unexpected("function arguments")),
        }
    }

    fn table(&mut self) -> Result<Expr, ScriptError> {
        self.expect(Token::LBrace, "'{'")?;
        let mut fields = Vec::new();
        while self.peek() != &Token::RBrace {
            let named = matches!(self.peek_next(), Token::Assign);
            let field = match (self.peek().clone(), named) {
                (Token::LBracket, _) => {
                    self.advance();
                    let key = self.expr()?;
                    self.expect(Token::RBracket, "']'")?;
                    self.expect(Token::Assign, "'='")?;
                    Field::Keyed(key, self.expr()?)
                }
                (Token::Name(name), true) => {
                    self.advance();
                    self.advance();
                    Field::Named(name, self.expr()?)
                }
                _ => Field::Positional(self.expr()?),
            };
            fields.push(field);
            if !self.check(&Token::Comma) && !self.check(&Token::Semi) {
                break;
            }
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(Expr::Table(fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Block {
        let chunk = parse_chunk("test", src).unwrap();
        Rc::try_unwrap(chunk.main).unwrap().body
    }

    #[test]
    fn parses_local_and_return() {
        let block = parse("local a, b = 1, 2\nreturn a + b");
        assert_eq!(block.stmts.len(), 2);
        assert!(matches!(&block.stmts[0].1, Stmt::Local(names, exprs) if names.len() == 2 && exprs.len() == 2));
        assert!(matches!(&block.stmts[1].1, Stmt::Return(e) if e.len() == 1));
        assert_eq!(block.stmts[1].0, 2);
    }

    #[test]
    fn precedence() {
        let block = parse("return 1 + 2 * 3 ^ 2 .. 'x'");
        let Stmt::Return(exprs) = &block.stmts[0].1 else {
            panic!()
        };
        // concat binds loosest
        assert!(matches!(&exprs[0], Expr::Binary(BinOp::Concat, _, _)));
    }

    #[test]
    fn unary_minus_folds_constants() {
        let block = parse("return -2, -x ^ 2");
        let Stmt::Return(exprs) = &block.stmts[0].1 else {
            panic!()
        };
        assert!(matches!(exprs[0], Expr::Number(n) if n == -2.0));
        assert!(matches!(&exprs[1], Expr::Unary(UnOp::Neg, inner) if matches!(**inner, Expr::Binary(BinOp::Pow, _, _))));
    }

    #[test]
    fn method_function_gets_self() {
        let block = parse("function M.a.b:c(x) return self end");
        let Stmt::Assign(_, values) = &block.stmts[0].1 else {
            panic!()
        };
        let Expr::Function(body) = &values[0] else {
            panic!()
        };
        assert_eq!(&*body.params[0], "self");
        assert_eq!(&*body.name, "M.a.b:c");
    }

    #[test]
    fn table_constructor_fields() {
        let block = parse("local t = {1, x = 2, ['y'] = 3; 4}");
        let Stmt::Local(_, exprs) = &block.stmts[0].1 else {
            panic!()
        };
        let Expr::Table(fields) = &exprs[0] else {
            panic!()
        };
        assert_eq!(fields.len(), 4);
        assert!(matches!(fields[1], Field::Named(..)));
        assert!(matches!(fields[2], Field::Keyed(..)));
    }

    #[test]
    fn string_and_table_call_sugar() {
        let block = parse("f'x' g{1}");
        assert_eq!(block.stmts.len(), 2);
    }

    #[test]
    fn control_flow_statements() {
        let src = "for i = 1, 10, 2 do end\nfor k, v in pairs(t) do break end\n\
                   while x do x = nil end\nrepeat local y = 1 until y\n\
                   if a then elseif b then else end";
        assert_eq!(parse(src).stmts.len(), 5);
    }

    #[test]
    fn syntax_errors_report_line() {
        let err = parse_chunk("m", "local x = 1\nx = = 2").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { line: 2, .. }));
        assert!(parse_chunk("m", "return 1 2").is_err());
        assert!(parse_chunk("m", "1 + 2").is_err());
    }
}
