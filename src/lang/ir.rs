//! Checked, name-resolved program. Every identifier is a slot index and every
//! implicit conversion is explicit, so the interpreter never looks anything
//! up by name.

use super::builtins::Builtin;
use super::types::Type;
use super::value::Value;

pub type FuncId = usize;

pub use super::ast::BinaryOp as BinOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Swizzle {
    pub lanes: [u8; 4],
    pub len: u8,
}

impl Swizzle {
    pub fn lanes(&self) -> &[u8] {
        &self.lanes[..self.len as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Local(usize),
    Global(usize),
    Output,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Swizzle(Swizzle),
    Index(Expr),
}

/// An assignable location.
#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub root: Root,
    pub path: Vec<Access>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    Local(usize),
    Global(usize),
    /// Uniform parameter by declaration index.
    Param(usize),
    Output,
    FragCoord,
    /// Int-family to float-family conversion of the same shape.
    Promote(Box<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    Swizzle(Box<Expr>, Swizzle),
    Index(Box<Expr>, Box<Expr>),
    Construct(Type, Vec<Expr>),
    Call(FuncId, Vec<Expr>),
    Builtin(Builtin, Vec<Expr>),
    Assign(Box<Place>, Option<BinOp>, Box<Expr>),
    Step {
        place: Box<Place>,
        increment: bool,
        prefix: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// (Re)initialize a local slot on scope entry.
    Init(usize, Expr),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    Loop {
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
    },
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    Break,
    Continue,
    Discard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub ret: Type,
    /// Parameters occupy the first `params` local slots.
    pub params: usize,
    pub locals: Vec<Type>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Uniform {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub uniforms: Vec<Uniform>,
    pub globals: Vec<Type>,
    /// Global initializers, run before `main` on every invocation.
    pub init: Vec<Stmt>,
    pub functions: Vec<Function>,
    pub main: FuncId,
    pub output: Option<Type>,
}
