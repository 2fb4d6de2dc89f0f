//! Syntax tree for one source fragment. Positions are byte offsets into the
//! fragment text.

use super::types::Type;

pub type Pos = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Uniform {
        ty: Type,
        names: Vec<(String, Pos)>,
    },
    Output {
        ty: Type,
        name: String,
        pos: Pos,
    },
    Global {
        constant: bool,
        ty: Type,
        decls: Vec<Declarator>,
    },
    Function(Function),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    pub name: String,
    pub init: Option<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub ret: Type,
    pub name: String,
    pub params: Vec<Param>,
    /// `None` for a prototype.
    pub body: Option<Vec<Stmt>>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: Type,
    pub name: Option<String>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Block(Vec<Stmt>),
    Decl {
        constant: bool,
        ty: Type,
        decls: Vec<Declarator>,
    },
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Discard,
    Expr(Expr),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub pos: Pos,
    /// Height of the tree rooted here; a leaf is 1.
    pub depth: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Int(i32),
    Float(f32),
    Bool(bool),
    Ident(String),
    /// `vec3(...)`, `float(...)`
    Construct(Type, Vec<Expr>),
    Call(String, Vec<Expr>),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(Option<BinaryOp>, Box<Expr>, Box<Expr>),
    Step {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, pos: Pos) -> Self {
        let depth = kind.child_depth() + 1;
        Self { kind, pos, depth }
    }
}

impl ExprKind {
    fn child_depth(&self) -> usize {
        match self {
            ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Bool(_) | ExprKind::Ident(_) => 0,
            ExprKind::Construct(_, args) | ExprKind::Call(_, args) => {
                args.iter().map(|e| e.depth).max().unwrap_or(0)
            }
            ExprKind::Field(e, _) | ExprKind::Unary(_, e) => e.depth,
            ExprKind::Step { target, .. } => target.depth,
            ExprKind::Index(a, b)
            | ExprKind::Binary(_, a, b)
            | ExprKind::And(a, b)
            | ExprKind::Or(a, b)
            | ExprKind::Assign(_, a, b) => a.depth.max(b.depth),
            ExprKind::Ternary(a, b, c) => a.depth.max(b.depth).max(c.depth),
        }
    }
}
