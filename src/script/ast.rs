use std::rc::Rc;

pub type Name = Rc<str>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Nil,
    True,
    False,
    Number(f64),
    Str(Rc<str>),
    Vararg,
    Name(Name),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Method(Box<Expr>, Name, Vec<Expr>),
    Function(Rc<FuncBody>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Table(Vec<Field>),
    /// Parenthesised expression; truncates multiple results to one.
    Paren(Box<Expr>),
}

impl Expr {
    pub fn is_multi(&self) -> bool {
        matches!(self, Expr::Call(..) | Expr::Method(..) | Expr::Vararg)
    }
}

#[derive(Debug, Clone)]
pub enum Field {
    Positional(Expr),
    Named(Name, Expr),
    Keyed(Expr, Expr),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Local(Vec<Name>, Vec<Expr>),
    Assign(Vec<Expr>, Vec<Expr>),
    Call(Expr),
    Do(Block),
    While(Expr, Block),
    Repeat(Block, Expr),
    If(Vec<(Expr, Block)>, Option<Block>),
    NumericFor {
        var: Name,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        vars: Vec<Name>,
        exprs: Vec<Expr>,
        body: Block,
    },
    LocalFunction(Name, Rc<FuncBody>),
    Return(Vec<Expr>),
    Break,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<(usize, Stmt)>,
}

#[derive(Debug)]
pub struct FuncBody {
    pub name: Name,
    pub params: Vec<Name>,
    pub is_vararg: bool,
    pub body: Block,
    pub line: usize,
}

/// A parsed module: the main chunk is a vararg function with no parameters.
#[derive(Debug)]
pub struct Chunk {
    pub name: String,
    pub main: Rc<FuncBody>,
}
