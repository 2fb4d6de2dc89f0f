//! Semantic analysis: resolves names across all fragments of a link, checks
//! types, and lowers the syntax tree into [`ir::Program`].

use std::collections::HashMap;

use super::ast::{self, BinaryOp, ExprKind, Item, Pos, StmtKind, UnaryOp};
use super::builtins;
use super::ir::{self, Access, FuncId, Place, Root, Swizzle};
use super::types::Type;
use super::value::Value;

/// A check failure. `fragment` is `None` for whole-link errors such as a
/// missing entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub fragment: Option<usize>,
    pub pos: Pos,
    pub message: String,
}

type CResult<T> = Result<T, Located>;

#[derive(Debug, Clone, Copy)]
enum Symbol {
    Uniform(usize, Type),
    Global { slot: usize, ty: Type, constant: bool },
    Output(Type),
}

#[derive(Debug, Clone, Copy)]
struct Local {
    slot: usize,
    ty: Type,
    constant: bool,
}

struct FnEntry {
    name: String,
    params: Vec<Type>,
    ret: Type,
    site: (usize, Pos),
    body: Option<ir::Function>,
    calls: Vec<FuncId>,
    first_call: Option<(usize, Pos)>,
}

struct Checker {
    fragment: usize,
    symbols: HashMap<String, Symbol>,
    overloads: HashMap<String, Vec<FuncId>>,
    functions: Vec<FnEntry>,
    uniforms: Vec<ir::Uniform>,
    globals: Vec<Type>,
    init: Vec<ir::Stmt>,
    output: Option<Type>,

    scopes: Vec<HashMap<String, Local>>,
    locals: Vec<Type>,
    ret: Type,
    loop_depth: usize,
    calls: Vec<FuncId>,
    max_depth: usize,
}

/// Check every fragment in order as one translation unit. Expressions
/// taller than `max_depth` are rejected.
pub fn check(units: &[ast::Unit], max_depth: usize) -> CResult<ir::Program> {
    let mut checker = Checker {
        fragment: 0,
        symbols: HashMap::new(),
        overloads: HashMap::new(),
        functions: Vec::new(),
        uniforms: Vec::new(),
        globals: Vec::new(),
        init: Vec::new(),
        output: None,
        scopes: Vec::new(),
        locals: Vec::new(),
        ret: Type::Void,
        loop_depth: 0,
        calls: Vec::new(),
        max_depth,
    };
    for (index, unit) in units.iter().enumerate() {
        checker.fragment = index;
        for item in &unit.items {
            checker.item(item)?;
        }
    }
    checker.finish()
}

impl Checker {
    fn err<T>(&self, pos: Pos, message: impl Into<String>) -> CResult<T> {
        Err(Located {
            fragment: Some(self.fragment),
            pos,
            message: message.into(),
        })
    }

    fn check_name(&self, name: &str, pos: Pos) -> CResult<()> {
        if name.starts_with("gl_") {
            return self.err(pos, format!("identifier '{name}' uses the reserved 'gl_' prefix"));
        }
        Ok(())
    }

    fn check_global_free(&self, name: &str, pos: Pos) -> CResult<()> {
        self.check_name(name, pos)?;
        if self.symbols.contains_key(name) || self.overloads.contains_key(name) {
            return self.err(pos, format!("redeclaration of '{name}'"));
        }
        Ok(())
    }

    // ---------------------------------------------------------------- items

    fn item(&mut self, item: &Item) -> CResult<()> {
        match item {
            Item::Uniform { ty, names } => {
                for (name, pos) in names {
                    if *ty == Type::Void {
                        return self.err(*pos, "uniform cannot be void");
                    }
                    match self.symbols.get(name).copied() {
                        Some(Symbol::Uniform(_, existing)) if existing == *ty => continue,
                        Some(Symbol::Uniform(_, existing)) => {
                            return self.err(
                                *pos,
                                format!("uniform '{name}' redeclared as {ty}, previously {existing}"),
                            );
                        }
                        _ => self.check_global_free(name, *pos)?,
                    }
                    let index = self.uniforms.len();
                    self.uniforms.push(ir::Uniform {
                        name: name.clone(),
                        ty: *ty,
                    });
                    self.symbols.insert(name.clone(), Symbol::Uniform(index, *ty));
                }
                Ok(())
            }
            Item::Output { ty, name, pos } => {
                if self.output.is_some() {
                    return self.err(*pos, "a kernel can declare only one 'out' variable");
                }
                if !ty.is_float_family() {
                    return self.err(*pos, format!("'out' variable must be float or vecN, found {ty}"));
                }
                self.check_global_free(name, *pos)?;
                self.output = Some(*ty);
                self.symbols.insert(name.clone(), Symbol::Output(*ty));
                Ok(())
            }
            Item::Global {
                constant,
                ty,
                decls,
            } => {
                for decl in decls {
                    if *ty == Type::Void || ty.is_sampler() {
                        return self.err(decl.pos, format!("global variable cannot have type {ty}"));
                    }
                    self.check_global_free(&decl.name, decl.pos)?;
                    let init = match &decl.init {
                        Some(init) => {
                            let (expr, found) = self.expr(init)?;
                            Some(self.coerce(expr, found, *ty, init.pos)?)
                        }
                        None if *constant => {
                            return self.err(decl.pos, format!("const '{}' needs an initializer", decl.name))
                        }
                        None => None,
                    };
                    let slot = self.globals.len();
                    self.globals.push(*ty);
                    self.symbols.insert(
                        decl.name.clone(),
                        Symbol::Global {
                            slot,
                            ty: *ty,
                            constant: *constant,
                        },
                    );
                    if let Some(init) = init {
                        let place = Place {
                            root: Root::Global(slot),
                            path: Vec::new(),
                        };
                        self.init.push(ir::Stmt::Expr(ir::Expr::Assign(
                            Box::new(place),
                            None,
                            Box::new(init),
                        )));
                    }
                }
                Ok(())
            }
            Item::Function(f) => self.function(f),
        }
    }

    fn function(&mut self, f: &ast::Function) -> CResult<()> {
        self.check_name(&f.name, f.pos)?;
        if builtins::is_builtin(&f.name) {
            return self.err(f.pos, format!("cannot redefine built-in function '{}'", f.name));
        }
        if self.symbols.contains_key(&f.name) {
            return self.err(f.pos, format!("'{}' is already declared as a variable", f.name));
        }
        for p in &f.params {
            if p.ty == Type::Void {
                return self.err(p.pos, "parameter cannot be void");
            }
        }
        let params: Vec<Type> = f.params.iter().map(|p| p.ty).collect();
        let existing = self
            .overloads
            .get(&f.name)
            .and_then(|ids| ids.iter().copied().find(|&id| self.functions[id].params == params));
        let id = match existing {
            Some(id) => {
                if self.functions[id].ret != f.ret {
                    return self.err(
                        f.pos,
                        format!("conflicting return type for '{}'", signature(&f.name, &params)),
                    );
                }
                id
            }
            None => {
                let id = self.functions.len();
                self.functions.push(FnEntry {
                    name: f.name.clone(),
                    params: params.clone(),
                    ret: f.ret,
                    site: (self.fragment, f.pos),
                    body: None,
                    calls: Vec::new(),
                    first_call: None,
                });
                self.overloads.entry(f.name.clone()).or_default().push(id);
                id
            }
        };

        let Some(body) = &f.body else {
            return Ok(());
        };
        if self.functions[id].body.is_some() {
            return self.err(f.pos, format!("redefinition of '{}'", signature(&f.name, &params)));
        }
        self.functions[id].site = (self.fragment, f.pos);

        self.ret = f.ret;
        self.locals.clear();
        self.calls.clear();
        self.scopes.push(HashMap::new());
        for p in &f.params {
            let slot = self.locals.len();
            self.locals.push(p.ty);
            if let Some(name) = &p.name {
                self.declare_local(name, p.ty, false, slot, p.pos)?;
            }
        }
        let mut stmts = Vec::new();
        let result = body.iter().try_for_each(|s| self.stmt(s, &mut stmts));
        self.scopes.clear();
        result?;

        let entry = &mut self.functions[id];
        entry.calls = std::mem::take(&mut self.calls);
        entry.body = Some(ir::Function {
            name: f.name.clone(),
            ret: f.ret,
            params: f.params.len(),
            locals: std::mem::take(&mut self.locals),
            body: stmts,
        });
        Ok(())
    }

    fn finish(mut self) -> CResult<ir::Program> {
        let link_error = |message: String| Located {
            fragment: None,
            pos: 0,
            message,
        };
        let main = self
            .overloads
            .get("main")
            .and_then(|ids| ids.iter().copied().find(|&id| self.functions[id].params.is_empty()))
            .ok_or_else(|| link_error("missing entry point 'void main()'".to_string()))?;
        if self.functions[main].ret != Type::Void {
            let (fragment, pos) = self.functions[main].site;
            return Err(Located {
                fragment: Some(fragment),
                pos,
                message: "'main' must return void".to_string(),
            });
        }
        if self.functions[main].body.is_none() {
            return Err(link_error("'main' is declared but never defined".to_string()));
        }

        for entry in &self.functions {
            if let (None, Some((fragment, pos))) = (&entry.body, entry.first_call) {
                return Err(Located {
                    fragment: Some(fragment),
                    pos,
                    message: format!(
                        "unresolved symbol: '{}' is declared but never defined",
                        signature(&entry.name, &entry.params)
                    ),
                });
            }
        }

        self.check_recursion()?;

        let functions = self
            .functions
            .into_iter()
            .map(|entry| {
                entry.body.unwrap_or(ir::Function {
                    name: entry.name,
                    ret: entry.ret,
                    params: entry.params.len(),
                    locals: entry.params,
                    body: Vec::new(),
                })
            })
            .collect();

        Ok(ir::Program {
            uniforms: self.uniforms,
            globals: self.globals,
            init: self.init,
            functions,
            main,
            output: self.output,
        })
    }

    fn check_recursion(&self) -> CResult<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Fresh,
            Active,
            Done,
        }
        fn visit(checker: &Checker, id: FuncId, marks: &mut [Mark]) -> CResult<()> {
            match marks[id] {
                Mark::Done => return Ok(()),
                Mark::Active => {
                    let entry = &checker.functions[id];
                    return Err(Located {
                        fragment: Some(entry.site.0),
                        pos: entry.site.1,
                        message: format!("recursive call to '{}' is not allowed", entry.name),
                    });
                }
                Mark::Fresh => {}
            }
            marks[id] = Mark::Active;
            for &callee in &checker.functions[id].calls {
                visit(checker, callee, marks)?;
            }
            marks[id] = Mark::Done;
            Ok(())
        }
        let mut marks = vec![Mark::Fresh; self.functions.len()];
        for id in 0..self.functions.len() {
            visit(self, id, &mut marks)?;
        }
        Ok(())
    }

    // ----------------------------------------------------------- statements

    fn declare_local(&mut self, name: &str, ty: Type, constant: bool, slot: usize, pos: Pos) -> CResult<()> {
        self.check_name(name, pos)?;
        if self.scopes.last().is_some_and(|scope| scope.contains_key(name)) {
            return self.err(pos, format!("redeclaration of '{name}'"));
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), Local { slot, ty, constant });
        }
        Ok(())
    }

    fn scoped(&mut self, stmt: &ast::Stmt) -> CResult<Vec<ir::Stmt>> {
        self.scopes.push(HashMap::new());
        let mut out = Vec::new();
        let result = self.stmt(stmt, &mut out);
        self.scopes.pop();
        result.map(|_| out)
    }

    fn condition(&mut self, expr: &ast::Expr) -> CResult<ir::Expr> {
        let (cond, ty) = self.expr(expr)?;
        if ty != Type::Bool {
            return self.err(expr.pos, format!("condition must be bool, found {ty}"));
        }
        Ok(cond)
    }

    fn stmt(&mut self, stmt: &ast::Stmt, out: &mut Vec<ir::Stmt>) -> CResult<()> {
        match &stmt.kind {
            StmtKind::Block(stmts) => {
                self.scopes.push(HashMap::new());
                let mut inner = Vec::new();
                let result = stmts.iter().try_for_each(|s| self.stmt(s, &mut inner));
                self.scopes.pop();
                result?;
                out.push(ir::Stmt::Block(inner));
            }
            StmtKind::Decl {
                constant,
                ty,
                decls,
            } => {
                for decl in decls {
                    if *ty == Type::Void || ty.is_sampler() {
                        return self.err(decl.pos, format!("local variable cannot have type {ty}"));
                    }
                    let init = match &decl.init {
                        Some(init) => {
                            let (expr, found) = self.expr(init)?;
                            self.coerce(expr, found, *ty, init.pos)?
                        }
                        None if *constant => {
                            return self.err(decl.pos, format!("const '{}' needs an initializer", decl.name))
                        }
                        None => ir::Expr::Const(Value::zero(*ty)),
                    };
                    let slot = self.locals.len();
                    self.locals.push(*ty);
                    self.declare_local(&decl.name, *ty, *constant, slot, decl.pos)?;
                    out.push(ir::Stmt::Init(slot, init));
                }
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.condition(cond)?;
                let then = self.scoped(then)?;
                let otherwise = match otherwise {
                    Some(s) => self.scoped(s)?,
                    None => Vec::new(),
                };
                out.push(ir::Stmt::If(cond, then, otherwise));
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                self.scopes.push(HashMap::new());
                let result = self.for_loop(init.as_deref(), cond.as_ref(), step.as_ref(), body);
                self.scopes.pop();
                out.push(ir::Stmt::Block(result?));
            }
            StmtKind::While { cond, body } => {
                let cond = self.condition(cond)?;
                self.loop_depth += 1;
                let body = self.scoped(body);
                self.loop_depth -= 1;
                out.push(ir::Stmt::Loop {
                    cond: Some(cond),
                    step: None,
                    body: body?,
                });
            }
            StmtKind::Return(value) => {
                let ret = self.ret;
                let value = match (value, ret) {
                    (None, Type::Void) => None,
                    (Some(_), Type::Void) => {
                        return self.err(stmt.pos, "void function cannot return a value")
                    }
                    (None, ty) => return self.err(stmt.pos, format!("function must return {ty}")),
                    (Some(value), ty) => {
                        let (expr, found) = self.expr(value)?;
                        Some(self.coerce(expr, found, ty, value.pos)?)
                    }
                };
                out.push(ir::Stmt::Return(value));
            }
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    return self.err(stmt.pos, "'break' and 'continue' must be inside a loop");
                }
                out.push(if matches!(stmt.kind, StmtKind::Break) {
                    ir::Stmt::Break
                } else {
                    ir::Stmt::Continue
                });
            }
            StmtKind::Discard => out.push(ir::Stmt::Discard),
            StmtKind::Expr(expr) => {
                let (expr, _) = self.expr(expr)?;
                out.push(ir::Stmt::Expr(expr));
            }
            StmtKind::Empty => {}
        }
        Ok(())
    }

    fn for_loop(
        &mut self,
        init: Option<&ast::Stmt>,
        cond: Option<&ast::Expr>,
        step: Option<&ast::Expr>,
        body: &ast::Stmt,
    ) -> CResult<Vec<ir::Stmt>> {
        let mut stmts = Vec::new();
        if let Some(init) = init {
            self.stmt(init, &mut stmts)?;
        }
        let cond = cond.map(|c| self.condition(c)).transpose()?;
        let step = match step {
            Some(step) => Some(self.expr(step)?.0),
            None => None,
        };
        self.loop_depth += 1;
        let body = self.scoped(body);
        self.loop_depth -= 1;
        stmts.push(ir::Stmt::Loop {
            cond,
            step,
            body: body?,
        });
        Ok(stmts)
    }

    // ---------------------------------------------------------- expressions

    fn coerce(&self, expr: ir::Expr, from: Type, to: Type, pos: Pos) -> CResult<ir::Expr> {
        if from == to {
            Ok(expr)
        } else if from.promotes_to(to) {
            Ok(ir::Expr::Promote(Box::new(expr)))
        } else {
            self.err(pos, format!("type mismatch: expected {to}, found {from}"))
        }
    }

    fn lookup_local(&self, name: &str) -> Option<Local> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name).copied())
    }

    fn expr(&mut self, expr: &ast::Expr) -> CResult<(ir::Expr, Type)> {
        let pos = expr.pos;
        if expr.depth > self.max_depth {
            return self.err(pos, "expression nested too deeply");
        }
        match &expr.kind {
            ExprKind::Int(v) => Ok((ir::Expr::Const(Value::Int(*v)), Type::Int)),
            ExprKind::Float(v) => Ok((ir::Expr::Const(Value::Float(*v)), Type::Float)),
            ExprKind::Bool(v) => Ok((ir::Expr::Const(Value::Bool(*v)), Type::Bool)),
            ExprKind::Ident(name) => {
                if let Some(local) = self.lookup_local(name) {
                    return Ok((ir::Expr::Local(local.slot), local.ty));
                }
                match self.symbols.get(name) {
                    Some(Symbol::Uniform(index, ty)) => Ok((ir::Expr::Param(*index), *ty)),
                    Some(Symbol::Global { slot, ty, .. }) => Ok((ir::Expr::Global(*slot), *ty)),
                    Some(Symbol::Output(ty)) => Ok((ir::Expr::Output, *ty)),
                    None if name == "gl_FragCoord" => Ok((ir::Expr::FragCoord, Type::Vec(4))),
                    None => self.err(pos, format!("undeclared identifier '{name}'")),
                }
            }
            ExprKind::Construct(ty, args) => self.construct(*ty, args, pos),
            ExprKind::Call(name, args) => self.call(name, args, pos),
            ExprKind::Field(base, field) => {
                let (base, ty) = self.expr(base)?;
                let (swizzle, result) = self.swizzle(ty, field, pos)?;
                Ok((ir::Expr::Swizzle(Box::new(base), swizzle), result))
            }
            ExprKind::Index(base, index) => {
                let (base, ty) = self.expr(base)?;
                let (index, result) = self.index(ty, index)?;
                Ok((ir::Expr::Index(Box::new(base), Box::new(index)), result))
            }
            ExprKind::Unary(op, operand) => {
                let (inner, ty) = self.expr(operand)?;
                match op {
                    UnaryOp::Neg | UnaryOp::Plus if ty.is_arithmetic() => {
                        if *op == UnaryOp::Neg {
                            Ok((ir::Expr::Neg(Box::new(inner)), ty))
                        } else {
                            Ok((inner, ty))
                        }
                    }
                    UnaryOp::Not if ty == Type::Bool => Ok((ir::Expr::Not(Box::new(inner)), ty)),
                    _ => self.err(pos, format!("operator {op:?} cannot be applied to {ty}")),
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let (l, lt) = self.expr(lhs)?;
                let (r, rt) = self.expr(rhs)?;
                let Some((ret, lt2, rt2)) = binary_types(*op, lt, rt) else {
                    return self.err(pos, format!("operator {op:?} cannot be applied to {lt} and {rt}"));
                };
                let l = self.coerce(l, lt, lt2, lhs.pos)?;
                let r = self.coerce(r, rt, rt2, rhs.pos)?;
                Ok((ir::Expr::Binary(*op, Box::new(l), Box::new(r)), ret))
            }
            ExprKind::And(lhs, rhs) | ExprKind::Or(lhs, rhs) => {
                let l = self.condition(lhs)?;
                let r = self.condition(rhs)?;
                let expr = if matches!(expr.kind, ExprKind::And(..)) {
                    ir::Expr::And(Box::new(l), Box::new(r))
                } else {
                    ir::Expr::Or(Box::new(l), Box::new(r))
                };
                Ok((expr, Type::Bool))
            }
            ExprKind::Ternary(cond, then, otherwise) => {
                let cond = self.condition(cond)?;
                let (a, at) = self.expr(then)?;
                let (b, bt) = self.expr(otherwise)?;
                let ty = if at.promotes_to(bt) {
                    bt
                } else if bt.promotes_to(at) {
                    at
                } else {
                    return self.err(pos, format!("ternary branches have mismatched types {at} and {bt}"));
                };
                let a = self.coerce(a, at, ty, then.pos)?;
                let b = self.coerce(b, bt, ty, otherwise.pos)?;
                Ok((ir::Expr::Select(Box::new(cond), Box::new(a), Box::new(b)), ty))
            }
            ExprKind::Assign(op, target, value) => {
                let (place, pt) = self.place(target)?;
                let (v, vt) = self.expr(value)?;
                let v = match op {
                    None => self.coerce(v, vt, pt, value.pos)?,
                    Some(op) => match binary_types(*op, pt, vt) {
                        Some((ret, lt, rt)) if ret == pt && lt == pt => self.coerce(v, vt, rt, value.pos)?,
                        _ => {
                            return self.err(pos, format!("operator {op:?}= cannot be applied to {pt} and {vt}"))
                        }
                    },
                };
                Ok((ir::Expr::Assign(Box::new(place), *op, Box::new(v)), pt))
            }
            ExprKind::Step {
                target,
                increment,
                prefix,
            } => {
                let (place, ty) = self.place(target)?;
                if !(ty.is_float_family() || ty.is_int_family()) {
                    return self.err(pos, format!("cannot increment or decrement {ty}"));
                }
                Ok((
                    ir::Expr::Step {
                        place: Box::new(place),
                        increment: *increment,
                        prefix: *prefix,
                    },
                    ty,
                ))
            }
        }
    }

    fn swizzle(&self, ty: Type, field: &str, pos: Pos) -> CResult<(Swizzle, Type)> {
        let lanes = match ty {
            Type::Vec(n) | Type::IVec(n) => n as usize,
            _ => return self.err(pos, format!("type {ty} has no field '{field}'")),
        };
        match parse_swizzle(field, lanes) {
            Some(swizzle) => Ok((swizzle, ty.with_lanes(swizzle.len as usize))),
            None => self.err(pos, format!("invalid swizzle '{field}' on {ty}")),
        }
    }

    fn index(&mut self, ty: Type, index: &ast::Expr) -> CResult<(ir::Expr, Type)> {
        let (len, result) = match ty {
            Type::Vec(n) => (n as i32, Type::Float),
            Type::IVec(n) => (n as i32, Type::Int),
            Type::Mat4 => (4, Type::Vec(4)),
            _ => return self.err(index.pos, format!("type {ty} cannot be indexed")),
        };
        let (expr, it) = self.expr(index)?;
        if it != Type::Int {
            return self.err(index.pos, format!("index must be int, found {it}"));
        }
        if let ir::Expr::Const(Value::Int(k)) = expr {
            if k < 0 || k >= len {
                return self.err(index.pos, format!("index {k} out of range for {ty}"));
            }
        }
        Ok((expr, result))
    }

    fn place(&mut self, expr: &ast::Expr) -> CResult<(Place, Type)> {
        let pos = expr.pos;
        match &expr.kind {
            ExprKind::Ident(name) => {
                if let Some(local) = self.lookup_local(name) {
                    if local.constant {
                        return self.err(pos, format!("cannot assign to constant '{name}'"));
                    }
                    return Ok((
                        Place {
                            root: Root::Local(local.slot),
                            path: Vec::new(),
                        },
                        local.ty,
                    ));
                }
                let (root, ty) = match self.symbols.get(name) {
                    Some(Symbol::Global {
                        slot,
                        ty,
                        constant: false,
                    }) => (Root::Global(*slot), *ty),
                    Some(Symbol::Global { constant: true, .. }) => {
                        return self.err(pos, format!("cannot assign to constant '{name}'"))
                    }
                    Some(Symbol::Output(ty)) => (Root::Output, *ty),
                    Some(Symbol::Uniform(..)) => {
                        return self.err(pos, format!("cannot assign to uniform '{name}'"))
                    }
                    None if name == "gl_FragCoord" => {
                        return self.err(pos, "gl_FragCoord is read-only")
                    }
                    None => return self.err(pos, format!("undeclared identifier '{name}'")),
                };
                Ok((
                    Place {
                        root,
                        path: Vec::new(),
                    },
                    ty,
                ))
            }
            ExprKind::Field(base, field) => {
                let (mut place, ty) = self.place(base)?;
                let (swizzle, result) = self.swizzle(ty, field, pos)?;
                let lanes = swizzle.lanes();
                if (1..lanes.len()).any(|i| lanes[..i].contains(&lanes[i])) {
                    return self.err(pos, format!("swizzle '{field}' repeats a component and cannot be assigned"));
                }
                place.path.push(Access::Swizzle(swizzle));
                Ok((place, result))
            }
            ExprKind::Index(base, index) => {
                let (mut place, ty) = self.place(base)?;
                let (index, result) = self.index(ty, index)?;
                place.path.push(Access::Index(index));
                Ok((place, result))
            }
            _ => self.err(pos, "expression is not assignable"),
        }
    }

    fn arguments(&mut self, args: &[ast::Expr]) -> CResult<(Vec<ir::Expr>, Vec<Type>)> {
        let mut exprs = Vec::with_capacity(args.len());
        let mut types = Vec::with_capacity(args.len());
        for arg in args {
            let (expr, ty) = self.expr(arg)?;
            exprs.push(expr);
            types.push(ty);
        }
        Ok((exprs, types))
    }

    fn construct(&mut self, ty: Type, args: &[ast::Expr], pos: Pos) -> CResult<(ir::Expr, Type)> {
        if ty == Type::Void || ty.is_sampler() {
            return self.err(pos, format!("cannot construct {ty}"));
        }
        let (exprs, types) = self.arguments(args)?;
        if let Some(bad) = types.iter().find(|t| **t == Type::Void || t.is_sampler()) {
            return self.err(pos, format!("{bad} cannot be used to construct {ty}"));
        }
        let total: usize = types.iter().map(|t| t.components()).sum();
        let has_matrix = types.contains(&Type::Mat4);
        let ok = match (ty, types.as_slice()) {
            (_, []) => false,
            (Type::Bool | Type::Int | Type::Float, [single]) => *single != Type::Mat4,
            (Type::Bool | Type::Int | Type::Float, _) => false,
            (Type::Vec(n) | Type::IVec(n), [single]) => {
                *single != Type::Mat4 && (single.components() == 1 || single.components() >= n as usize)
            }
            (Type::Vec(n) | Type::IVec(n), _) => !has_matrix && total == n as usize,
            (Type::Mat4, [single]) => single.components() == 1 || *single == Type::Mat4,
            (Type::Mat4, _) => !has_matrix && total == 16,
            _ => false,
        };
        if !ok {
            let list: Vec<String> = types.iter().map(|t| t.to_string()).collect();
            return self.err(pos, format!("cannot construct {ty} from ({})", list.join(", ")));
        }
        Ok((ir::Expr::Construct(ty, exprs), ty))
    }

    fn call(&mut self, name: &str, args: &[ast::Expr], pos: Pos) -> CResult<(ir::Expr, Type)> {
        let (exprs, types) = self.arguments(args)?;
        if builtins::is_builtin(name) {
            let Some(sig) = builtins::resolve(name, &types) else {
                return self.err(pos, format!("no matching overload for built-in {}", signature(name, &types)));
            };
            let mut coerced = Vec::with_capacity(exprs.len());
            for ((expr, found), (want, arg)) in exprs.into_iter().zip(&types).zip(sig.params.iter().zip(args)) {
                coerced.push(self.coerce(expr, *found, *want, arg.pos)?);
            }
            return Ok((ir::Expr::Builtin(sig.builtin, coerced), sig.ret));
        }

        let Some(candidates) = self.overloads.get(name) else {
            if self.symbols.contains_key(name) || self.lookup_local(name).is_some() {
                return self.err(pos, format!("'{name}' is not a function"));
            }
            return self.err(pos, format!("undeclared function '{name}'"));
        };
        let exact = candidates
            .iter()
            .copied()
            .find(|&id| self.functions[id].params == types);
        let id = match exact {
            Some(id) => id,
            None => {
                let viable: Vec<FuncId> = candidates
                    .iter()
                    .copied()
                    .filter(|&id| {
                        let params = &self.functions[id].params;
                        params.len() == types.len()
                            && types.iter().zip(params).all(|(t, p)| t.promotes_to(*p))
                    })
                    .collect();
                match viable.as_slice() {
                    [id] => *id,
                    [] => {
                        return self.err(pos, format!("no matching overload for {}", signature(name, &types)))
                    }
                    _ => return self.err(pos, format!("ambiguous call to {}", signature(name, &types))),
                }
            }
        };

        let params = self.functions[id].params.clone();
        let mut coerced = Vec::with_capacity(exprs.len());
        for ((expr, found), (want, arg)) in exprs.into_iter().zip(&types).zip(params.iter().zip(args)) {
            coerced.push(self.coerce(expr, *found, *want, arg.pos)?);
        }
        self.calls.push(id);
        if self.functions[id].first_call.is_none() {
            self.functions[id].first_call = Some((self.fragment, pos));
        }
        Ok((ir::Expr::Call(id, coerced), self.functions[id].ret))
    }
}

fn signature(name: &str, params: &[Type]) -> String {
    let list: Vec<String> = params.iter().map(|t| t.to_string()).collect();
    format!("{name}({})", list.join(", "))
}

/// Result and operand types of a binary operator after implicit promotion.
fn binary_types(op: BinaryOp, l: Type, r: Type) -> Option<(Type, Type, Type)> {
    let floaty = |t: Type| t.is_float_family() || t == Type::Mat4;
    let (l, r) = if l.is_int_family() && floaty(r) {
        (l.to_float()?, r)
    } else if floaty(l) && r.is_int_family() {
        (l, r.to_float()?)
    } else {
        (l, r)
    };
    let ret = match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => match (l, r) {
            _ if l == r && l.is_arithmetic() => l,
            (Type::Vec(n), Type::Float) | (Type::Float, Type::Vec(n)) => Type::Vec(n),
            (Type::IVec(n), Type::Int) | (Type::Int, Type::IVec(n)) => Type::IVec(n),
            (Type::Mat4, Type::Float) | (Type::Float, Type::Mat4) => Type::Mat4,
            (Type::Mat4, Type::Vec(4)) | (Type::Vec(4), Type::Mat4) if op == BinaryOp::Mul => Type::Vec(4),
            _ => return None,
        },
        BinaryOp::Rem => match (l, r) {
            _ if l == r && l.is_int_family() => l,
            (Type::IVec(n), Type::Int) | (Type::Int, Type::IVec(n)) => Type::IVec(n),
            _ => return None,
        },
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match (l, r) {
            (Type::Int, Type::Int) | (Type::Float, Type::Float) => Type::Bool,
            _ => return None,
        },
        BinaryOp::Eq | BinaryOp::Ne => {
            if l == r && l != Type::Void && !l.is_sampler() {
                Type::Bool
            } else {
                return None;
            }
        }
    };
    Some((ret, l, r))
}

fn parse_swizzle(field: &str, lanes: usize) -> Option<Swizzle> {
    const SETS: [&[u8; 4]; 3] = [b"xyzw", b"rgba", b"stpq"];
    let bytes = field.as_bytes();
    if bytes.is_empty() || bytes.len() > 4 {
        return None;
    }
    let set = SETS.iter().find(|set| set.contains(&bytes[0]))?;
    let mut out = Swizzle {
        lanes: [0; 4],
        len: bytes.len() as u8,
    };
    for (i, b) in bytes.iter().enumerate() {
        let lane = set.iter().position(|c| c == b)?;
        if lane >= lanes {
            return None;
        }
        out.lanes[i] = lane as u8;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::parser::parse;
    use crate::lang::DEFAULT_MAX_DEPTH;

    fn check_sources(sources: &[&str]) -> CResult<ir::Program> {
        let units: Vec<ast::Unit> = sources
            .iter()
            .map(|s| parse(s, DEFAULT_MAX_DEPTH).expect("parse"))
            .collect();
        check(&units, DEFAULT_MAX_DEPTH)
    }

    #[test]
    fn collects_uniforms_in_declaration_order() {
        let program = check_sources(&[
            "uniform float scale; uniform sampler2D src;\nout vec4 color;\nvoid main() { color = texelFetch(src, ivec2(0, 0), 0) * scale; }",
        ])
        .expect("check");
        let names: Vec<&str> = program.uniforms.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["scale", "src"]);
        assert_eq!(program.output, Some(Type::Vec(4)));
    }

    #[test]
    fn later_fragments_see_earlier_declarations() {
        let program = check_sources(&[
            "uniform float k; float twice(float x) { return 2.0 * x; }",
            "out float y; void main() { y = twice(k); }",
        ])
        .expect("check");
        assert_eq!(program.functions.len(), 2);
        assert_eq!(program.functions[program.main].name, "main");
    }

    #[test]
    fn prototype_without_definition_is_unresolved() {
        let err = check_sources(&["float f(float x);\nout float y;\nvoid main() { y = f(1.0); }"]).unwrap_err();
        assert_eq!(err.fragment, Some(0));
        assert!(err.message.contains("unresolved symbol"), "{}", err.message);
    }

    #[test]
    fn prototype_resolved_by_later_fragment() {
        check_sources(&[
            "float f(float x);\nout float y;\nvoid main() { y = f(1.0); }",
            "float f(float x) { return x + 1.0; }",
        ])
        .expect("check");
    }

    #[test]
    fn undeclared_identifier_names_fragment() {
        let err = check_sources(&["out float y;", "void main() { y = missing; }"]).unwrap_err();
        assert_eq!(err.fragment, Some(1));
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn rejects_recursion() {
        let err = check_sources(&[
            "float f(float x);\nfloat g(float x) { return f(x); }\nfloat f(float x) { return g(x); }\nvoid main() { f(1.0); }",
        ])
        .unwrap_err();
        assert!(err.message.contains("recursive"), "{}", err.message);
    }

    #[test]
    fn missing_main_is_a_link_error() {
        let err = check_sources(&["uniform float a;"]).unwrap_err();
        assert_eq!(err.fragment, None);
    }

    #[test]
    fn promotes_int_operands() {
        check_sources(&["out vec2 o; void main() { o = vec2(1.0) * 2; float f = 3; o.x += 1; }"])
            .expect("check");
    }

    #[test]
    fn type_errors() {
        for src in [
            "out float y; void main() { y = vec2(1.0); }",
            "uniform float u; void main() { u = 1.0; }",
            "void main() { vec2 v; v.xx = vec2(1.0); }",
            "void main() { vec3 v = vec3(1.0, 2.0); }",
            "void main() { if (1) {} }",
            "void main() { break; }",
            "void main() { float gl_x; }",
            "out int y; void main() {}",
        ] {
            assert!(check_sources(&[src]).is_err(), "accepted: {src}");
        }
    }

    #[test]
    fn uniform_redeclaration_merges_or_conflicts() {
        check_sources(&["uniform float a;", "uniform float a; void main() {}"]).expect("merge");
        let err = check_sources(&["uniform float a;", "uniform vec2 a; void main() {}"]).unwrap_err();
        assert_eq!(err.fragment, Some(1));
    }

    #[test]
    fn swizzle_parsing() {
        let s = parse_swizzle("zyx", 3).expect("swizzle");
        assert_eq!(s.lanes(), &[2, 1, 0]);
        assert!(parse_swizzle("xw", 3).is_none());
        assert!(parse_swizzle("xg", 4).is_none());
    }
}
