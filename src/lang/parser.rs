//! Recursive-descent parser producing [`ast::Unit`]s.

use super::ast::*;
use super::lexer::{tokenize, Spanned, Token};
use super::types::Type;

/// Parse failure at a byte offset of the fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub pos: Pos,
    pub message: String,
}

type PResult<T> = Result<T, SyntaxError>;

/// Parse one fragment. Expressions taller than `max_depth`, or statements
/// and expressions nested deeper than that, are rejected.
pub fn parse(source: &str, max_depth: usize) -> PResult<Unit> {
    let tokens = tokenize(source).map_err(|span| SyntaxError {
        pos: span.start,
        message: format!("unrecognized token '{}'", &source[span]),
    })?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        end: source.len(),
        nesting: 0,
        max_depth,
    };
    let mut items = Vec::new();
    while !parser.at_end() {
        items.push(parser.item()?);
    }
    Ok(Unit { items })
}

struct Parser<'s> {
    tokens: Vec<Spanned<'s>>,
    cursor: usize,
    end: usize,
    nesting: usize,
    max_depth: usize,
}

const TOO_DEEP: &str = "expression nested too deeply";

impl<'s> Parser<'s> {
    fn at_end(&self) -> bool {
        self.cursor >= self.tokens.len()
    }

    fn peek(&self) -> Option<Token<'s>> {
        self.tokens.get(self.cursor).map(|t| t.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<Token<'s>> {
        self.tokens.get(self.cursor + ahead).map(|t| t.token)
    }

    fn pos(&self) -> Pos {
        self.tokens
            .get(self.cursor)
            .map(|t| t.span.start)
            .unwrap_or(self.end)
    }

    fn bump(&mut self) -> Option<Token<'s>> {
        let token = self.peek();
        self.cursor += 1;
        token
    }

    fn eat(&mut self, token: Token<'s>) -> bool {
        if self.peek() == Some(token) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// Run `level` one nesting level down.
    fn nested<T>(&mut self, level: fn(&mut Self) -> PResult<T>) -> PResult<T> {
        if self.nesting >= self.max_depth {
            return self.error(TOO_DEEP);
        }
        self.nesting += 1;
        let result = level(self);
        self.nesting -= 1;
        result
    }

    fn bounded(&self, expr: Expr) -> PResult<Expr> {
        if expr.depth > self.max_depth {
            return Err(SyntaxError {
                pos: expr.pos,
                message: TOO_DEEP.to_string(),
            });
        }
        Ok(expr)
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(SyntaxError {
            pos: self.pos(),
            message: message.into(),
        })
    }

    fn expect(&mut self, token: Token<'s>, what: &str) -> PResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            self.unexpected(what)
        }
    }

    fn unexpected<T>(&self, what: &str) -> PResult<T> {
        match self.peek() {
            Some(found) => self.error(format!("expected {what}, found {}", describe(found))),
            None => self.error(format!("expected {what}, found end of input")),
        }
    }

    fn ident(&mut self) -> PResult<String> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                self.cursor += 1;
                Ok(name.to_string())
            }
            _ => self.unexpected("identifier"),
        }
    }

    fn ty(&mut self) -> PResult<Type> {
        match self.peek() {
            Some(Token::Type(ty)) => {
                self.cursor += 1;
                Ok(ty)
            }
            _ => self.unexpected("type"),
        }
    }

    // ---------------------------------------------------------------- items

    fn item(&mut self) -> PResult<Item> {
        match self.peek() {
            Some(Token::Uniform) => {
                self.bump();
                let ty = self.ty()?;
                let mut names = Vec::new();
                loop {
                    let at = self.pos();
                    names.push((self.ident()?, at));
                    if !self.eat(Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::Semi, "';'")?;
                Ok(Item::Uniform { ty, names })
            }
            Some(Token::Out) => {
                self.bump();
                let ty = self.ty()?;
                let at = self.pos();
                let name = self.ident()?;
                self.expect(Token::Semi, "';'")?;
                Ok(Item::Output { ty, name, pos: at })
            }
            Some(Token::Const) => {
                self.bump();
                let ty = self.ty()?;
                let decls = self.declarators()?;
                Ok(Item::Global {
                    constant: true,
                    ty,
                    decls,
                })
            }
            Some(Token::Type(ty)) => {
                if self.peek_at(2) == Some(Token::LParen) {
                    self.bump();
                    let at = self.pos();
                    let name = self.ident()?;
                    return self.function(ty, name, at).map(Item::Function);
                }
                self.bump();
                let decls = self.declarators()?;
                Ok(Item::Global {
                    constant: false,
                    ty,
                    decls,
                })
            }
            _ => self.unexpected("declaration"),
        }
    }

    fn function(&mut self, ret: Type, name: String, pos: Pos) -> PResult<Function> {
        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        if self.peek() == Some(Token::Type(Type::Void)) && self.peek_at(1) == Some(Token::RParen) {
            self.bump();
        }
        if !self.eat(Token::RParen) {
            loop {
                let at = self.pos();
                match self.peek() {
                    Some(Token::In) | Some(Token::Const) => {
                        self.bump();
                    }
                    Some(Token::Out) | Some(Token::InOut) => {
                        return self.error("'out' and 'inout' parameters are not supported");
                    }
                    _ => {}
                }
                let ty = self.ty()?;
                let name = match self.peek() {
                    Some(Token::Ident(_)) => Some(self.ident()?),
                    _ => None,
                };
                params.push(Param { ty, name, pos: at });
                if self.eat(Token::RParen) {
                    break;
                }
                self.expect(Token::Comma, "',' or ')'")?;
            }
        }
        let body = if self.eat(Token::Semi) {
            None
        } else {
            Some(self.block()?)
        };
        Ok(Function {
            ret,
            name,
            params,
            body,
            pos,
        })
    }

    fn declarators(&mut self) -> PResult<Vec<Declarator>> {
        let mut decls = Vec::new();
        loop {
            let pos = self.pos();
            let name = self.ident()?;
            let init = if self.eat(Token::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push(Declarator { name, init, pos });
            if !self.eat(Token::Comma) {
                break;
            }
        }
        self.expect(Token::Semi, "';'")?;
        Ok(decls)
    }

    // ----------------------------------------------------------- statements

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.eat(Token::RBrace) {
            if self.at_end() {
                return self.unexpected("'}'");
            }
            stmts.push(self.stmt()?);
        }
        Ok(stmts)
    }

    fn stmt(&mut self) -> PResult<Stmt> {
        self.nested(Self::stmt_level)
    }

    fn stmt_level(&mut self) -> PResult<Stmt> {
        let pos = self.pos();
        let kind = match self.peek() {
            Some(Token::LBrace) => StmtKind::Block(self.block()?),
            Some(Token::Semi) => {
                self.bump();
                StmtKind::Empty
            }
            Some(Token::Const) => {
                self.bump();
                let ty = self.ty()?;
                StmtKind::Decl {
                    constant: true,
                    ty,
                    decls: self.declarators()?,
                }
            }
            Some(Token::Type(ty)) if matches!(self.peek_at(1), Some(Token::Ident(_))) => {
                self.bump();
                StmtKind::Decl {
                    constant: false,
                    ty,
                    decls: self.declarators()?,
                }
            }
            Some(Token::If) => {
                self.bump();
                self.expect(Token::LParen, "'('")?;
                let cond = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                let then = Box::new(self.stmt()?);
                let otherwise = if self.eat(Token::Else) {
                    Some(Box::new(self.stmt()?))
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then,
                    otherwise,
                }
            }
            Some(Token::For) => {
                self.bump();
                self.expect(Token::LParen, "'('")?;
                let init = if self.peek() == Some(Token::Semi) {
                    self.bump();
                    None
                } else {
                    // declarations and expression statements both consume ';'
                    Some(Box::new(self.simple_stmt()?))
                };
                let cond = if self.peek() == Some(Token::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(Token::Semi, "';'")?;
                let step = if self.peek() == Some(Token::RParen) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(Token::RParen, "')'")?;
                let body = Box::new(self.stmt()?);
                StmtKind::For {
                    init,
                    cond,
                    step,
                    body,
                }
            }
            Some(Token::While) => {
                self.bump();
                self.expect(Token::LParen, "'('")?;
                let cond = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                StmtKind::While {
                    cond,
                    body: Box::new(self.stmt()?),
                }
            }
            Some(Token::Return) => {
                self.bump();
                let value = if self.peek() == Some(Token::Semi) {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect(Token::Semi, "';'")?;
                StmtKind::Return(value)
            }
            Some(Token::Break) => {
                self.bump();
                self.expect(Token::Semi, "';'")?;
                StmtKind::Break
            }
            Some(Token::Continue) => {
                self.bump();
                self.expect(Token::Semi, "';'")?;
                StmtKind::Continue
            }
            Some(Token::Discard) => {
                self.bump();
                self.expect(Token::Semi, "';'")?;
                StmtKind::Discard
            }
            _ => return self.simple_stmt(),
        };
        Ok(Stmt { kind, pos })
    }

    /// Declaration or expression statement, terminated by ';'.
    fn simple_stmt(&mut self) -> PResult<Stmt> {
        let pos = self.pos();
        if let Some(Token::Type(ty)) = self.peek() {
            if matches!(self.peek_at(1), Some(Token::Ident(_))) {
                self.bump();
                return Ok(Stmt {
                    kind: StmtKind::Decl {
                        constant: false,
                        ty,
                        decls: self.declarators()?,
                    },
                    pos,
                });
            }
        }
        let expr = self.expr()?;
        self.expect(Token::Semi, "';'")?;
        Ok(Stmt {
            kind: StmtKind::Expr(expr),
            pos,
        })
    }

    // ---------------------------------------------------------- expressions

    fn expr(&mut self) -> PResult<Expr> {
        // The comma operator is not supported; an expression is an assignment.
        self.assignment()
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let expr = self.nested(Self::assignment_level)?;
        self.bounded(expr)
    }

    fn assignment_level(&mut self) -> PResult<Expr> {
        let target = self.ternary()?;
        let op = match self.peek() {
            Some(Token::Assign) => None,
            Some(Token::AddAssign) => Some(BinaryOp::Add),
            Some(Token::SubAssign) => Some(BinaryOp::Sub),
            Some(Token::MulAssign) => Some(BinaryOp::Mul),
            Some(Token::DivAssign) => Some(BinaryOp::Div),
            Some(Token::RemAssign) => Some(BinaryOp::Rem),
            _ => return Ok(target),
        };
        let pos = self.pos();
        self.bump();
        let value = self.assignment()?;
        Ok(Expr::new(
            ExprKind::Assign(op, Box::new(target), Box::new(value)),
            pos,
        ))
    }

    fn ternary(&mut self) -> PResult<Expr> {
        let cond = self.or()?;
        if self.peek() != Some(Token::Question) {
            return Ok(cond);
        }
        let pos = self.pos();
        self.bump();
        let then = self.assignment()?;
        self.expect(Token::Colon, "':'")?;
        let otherwise = self.assignment()?;
        Ok(Expr::new(
            ExprKind::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)),
            pos,
        ))
    }

    fn or(&mut self) -> PResult<Expr> {
        let mut lhs = self.and()?;
        while self.peek() == Some(Token::OrOr) {
            let pos = self.pos();
            self.bump();
            let rhs = self.and()?;
            lhs = self.bounded(Expr::new(ExprKind::Or(Box::new(lhs), Box::new(rhs)), pos))?;
        }
        Ok(lhs)
    }

    fn and(&mut self) -> PResult<Expr> {
        let mut lhs = self.equality()?;
        while self.peek() == Some(Token::AndAnd) {
            let pos = self.pos();
            self.bump();
            let rhs = self.equality()?;
            lhs = self.bounded(Expr::new(ExprKind::And(Box::new(lhs), Box::new(rhs)), pos))?;
        }
        Ok(lhs)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        ops: &[(Token<'static>, BinaryOp)],
    ) -> PResult<Expr> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.peek() == Some(*token) {
                    let pos = self.pos();
                    self.bump();
                    let rhs = next(self)?;
                    lhs = self.bounded(Expr::new(ExprKind::Binary(*op, Box::new(lhs), Box::new(rhs)), pos))?;
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn equality(&mut self) -> PResult<Expr> {
        self.binary_level(
            Self::relational,
            &[(Token::EqEq, BinaryOp::Eq), (Token::NotEq, BinaryOp::Ne)],
        )
    }

    fn relational(&mut self) -> PResult<Expr> {
        self.binary_level(
            Self::additive,
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
            ],
        )
    }

    fn additive(&mut self) -> PResult<Expr> {
        self.binary_level(
            Self::multiplicative,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        self.binary_level(
            Self::unary,
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.nested(Self::unary_level)
    }

    fn unary_level(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Bang) => UnaryOp::Not,
            Some(Token::Inc) | Some(Token::Dec) => {
                let increment = self.bump() == Some(Token::Inc);
                let target = self.unary()?;
                return Ok(Expr::new(
                    ExprKind::Step {
                        target: Box::new(target),
                        increment,
                        prefix: true,
                    },
                    pos,
                ));
            }
            _ => return self.postfix(),
        };
        self.bump();
        let operand = self.unary()?;
        Ok(Expr::new(ExprKind::Unary(op, Box::new(operand)), pos))
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let pos = self.pos();
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    let field = self.ident()?;
                    expr = Expr::new(ExprKind::Field(Box::new(expr), field), pos);
                }
                Some(Token::LBracket) => {
                    self.bump();
                    let index = self.expr()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = Expr::new(ExprKind::Index(Box::new(expr), Box::new(index)), pos);
                }
                Some(Token::Inc) | Some(Token::Dec) => {
                    let increment = self.bump() == Some(Token::Inc);
                    expr = Expr::new(
                        ExprKind::Step {
                            target: Box::new(expr),
                            increment,
                            prefix: false,
                        },
                        pos,
                    );
                }
                _ => return Ok(expr),
            }
            expr = self.bounded(expr)?;
        }
    }

    fn arguments(&mut self) -> PResult<Vec<Expr>> {
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek() == Some(Token::Type(Type::Void)) && self.peek_at(1) == Some(Token::RParen) {
            self.bump();
        }
        if self.eat(Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if self.eat(Token::RParen) {
                return Ok(args);
            }
            self.expect(Token::Comma, "',' or ')'")?;
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let pos = self.pos();
        let kind = match self.peek() {
            Some(Token::Int(v)) => {
                self.bump();
                ExprKind::Int(v)
            }
            Some(Token::Float(v)) => {
                self.bump();
                ExprKind::Float(v)
            }
            Some(Token::Bool(v)) => {
                self.bump();
                ExprKind::Bool(v)
            }
            Some(Token::Type(ty)) => {
                self.bump();
                ExprKind::Construct(ty, self.arguments()?)
            }
            Some(Token::Ident(name)) => {
                self.bump();
                if self.peek() == Some(Token::LParen) {
                    ExprKind::Call(name.to_string(), self.arguments()?)
                } else {
                    ExprKind::Ident(name.to_string())
                }
            }
            Some(Token::LParen) => {
                self.bump();
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                return Ok(inner);
            }
            _ => return self.unexpected("expression"),
        };
        Ok(Expr::new(kind, pos))
    }
}

fn describe(token: Token<'_>) -> String {
    match token {
        Token::Ident(name) => format!("identifier '{name}'"),
        Token::Int(v) => format!("integer {v}"),
        Token::Float(v) => format!("number {v}"),
        Token::Type(ty) => format!("type '{ty}'"),
        other => format!("{other:?}"),
    }
}
