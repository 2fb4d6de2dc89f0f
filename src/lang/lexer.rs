//! Tokenizer for kernel source.
//!
//! Preprocessor lines (`#version 150`, `#line 0`, ...) are skipped along with
//! comments; the engine compiles every fragment with the same dialect.

use logos::Logos;
use std::ops::Range;

use super::types::Type;

#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*([^*]|\*+[^*/])*\*+/")]
#[logos(skip r"#[^\n]*")]
pub enum Token<'s> {
    // Qualifiers
    #[token("uniform")]
    Uniform,
    #[token("out")]
    Out,
    #[token("in")]
    In,
    #[token("inout")]
    InOut,
    #[token("const")]
    Const,

    // Statements
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("for")]
    For,
    #[token("while")]
    While,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("discard")]
    Discard,

    #[token("true", |_| true)]
    #[token("false", |_| false)]
    Bool(bool),

    // Types
    #[token("void", |_| Type::Void)]
    #[token("bool", |_| Type::Bool)]
    #[token("int", |_| Type::Int)]
    #[token("float", |_| Type::Float)]
    #[token("vec2", |_| Type::Vec(2))]
    #[token("vec3", |_| Type::Vec(3))]
    #[token("vec4", |_| Type::Vec(4))]
    #[token("ivec2", |_| Type::IVec(2))]
    #[token("ivec3", |_| Type::IVec(3))]
    #[token("ivec4", |_| Type::IVec(4))]
    #[token("mat4", |_| Type::Mat4)]
    #[token("sampler1D", |_| Type::Sampler1D)]
    #[token("sampler2D", |_| Type::Sampler2D)]
    Type(Type),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice())]
    Ident(&'s str),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i32>().ok())]
    #[regex(r"0[xX][0-9a-fA-F]+", |lex| u32::from_str_radix(&lex.slice()[2..], 16).ok().map(|v| v as i32))]
    Int(i32),

    #[regex(r"[0-9]+\.[0-9]*([eE][+-]?[0-9]+)?[fF]?", parse_float)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?[fF]?", parse_float)]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+[fF]?", parse_float)]
    Float(f32),

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(".")]
    Dot,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    #[token("=")]
    Assign,
    #[token("+=")]
    AddAssign,
    #[token("-=")]
    SubAssign,
    #[token("*=")]
    MulAssign,
    #[token("/=")]
    DivAssign,
    #[token("%=")]
    RemAssign,
    #[token("++")]
    Inc,
    #[token("--")]
    Dec,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("!")]
    Bang,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
}

fn parse_float<'s>(lex: &mut logos::Lexer<'s, Token<'s>>) -> Option<f32> {
    lex.slice().trim_end_matches(['f', 'F']).parse().ok()
}

/// A token and the byte range it covers in its fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<'s> {
    pub token: Token<'s>,
    pub span: Range<usize>,
}

/// Tokenize a whole fragment. On an unrecognized character the byte offset of
/// the offending slice is returned.
pub fn tokenize(source: &str) -> Result<Vec<Spanned<'_>>, Range<usize>> {
    let mut out = Vec::new();
    let mut lexer = Token::lexer(source);
    while let Some(token) = lexer.next() {
        match token {
            Ok(token) => out.push(Spanned {
                token,
                span: lexer.span(),
            }),
            Err(()) => return Err(lexer.span()),
        }
    }
    Ok(out)
}
