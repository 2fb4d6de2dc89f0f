//! Tree-walking evaluator for a checked [`Program`]. One [`Interpreter`] is
//! shared by all invocations of a dispatch; each invocation gets its own
//! globals, output and locals.

use std::cmp::Ordering;

use super::builtins::{self, Builtin};
use super::ir::{Access, BinOp, Expr, FuncId, Place, Program, Root, Stmt, Swizzle};
use super::types::Type;
use super::value::Value;

/// Texture units as seen by a running kernel. `dims` is the sampler's
/// dimensionality (1 or 2).
pub trait Textures: Sync {
    fn size(&self, unit: i32, dims: u8) -> Result<[i32; 2], String>;
    fn fetch(&self, unit: i32, dims: u8, texel: [i32; 2]) -> Result<[f32; 4], String>;
    fn sample(&self, unit: i32, dims: u8, coord: [f32; 2]) -> Result<[f32; 4], String>;
}

/// No arrays bound: every unit behaves as unbound.
pub struct NoTextures;

impl Textures for NoTextures {
    fn size(&self, _: i32, _: u8) -> Result<[i32; 2], String> {
        Ok([0, 0])
    }

    fn fetch(&self, _: i32, _: u8, _: [i32; 2]) -> Result<[f32; 4], String> {
        Ok([0.0, 0.0, 0.0, 1.0])
    }

    fn sample(&self, _: i32, _: u8, _: [f32; 2]) -> Result<[f32; 4], String> {
        Ok([0.0, 0.0, 0.0, 1.0])
    }
}

enum Halt {
    Discard,
    Fault(String),
}

enum Flow {
    Next,
    Break,
    Continue,
    Return(Value),
}

type Exec<T> = Result<T, Halt>;

fn fault<T>(message: impl Into<String>) -> Exec<T> {
    Err(Halt::Fault(message.into()))
}

pub struct Interpreter<'a> {
    program: &'a Program,
    params: &'a [Value],
    textures: &'a dyn Textures,
    max_loop_iterations: u64,
}

impl<'a> Interpreter<'a> {
    /// `params` holds one value per uniform, in declaration order.
    pub fn new(
        program: &'a Program,
        params: &'a [Value],
        textures: &'a dyn Textures,
        max_loop_iterations: u64,
    ) -> Self {
        Self {
            program,
            params,
            textures,
            max_loop_iterations,
        }
    }

    /// Run `main` for the element at column `x`, row `y`. Returns the output
    /// value, or `None` if the invocation discarded or the kernel has no
    /// output.
    pub fn invoke(&self, x: usize, y: usize) -> Result<Option<Value>, String> {
        let mut machine = Machine {
            interp: self,
            globals: self.program.globals.iter().map(|t| Value::zero(*t)).collect(),
            output: self.program.output.map(Value::zero).unwrap_or(Value::Void),
            frag_coord: Value::Vec([x as f32 + 0.5, y as f32 + 0.5, 0.0, 1.0], 4),
        };
        let run = machine
            .block(&self.program.init, &mut [])
            .and_then(|_| machine.call(self.program.main, Vec::new()));
        match run {
            Ok(_) => Ok(self.program.output.map(|_| machine.output)),
            Err(Halt::Discard) => Ok(None),
            Err(Halt::Fault(message)) => Err(message),
        }
    }
}

struct Machine<'i, 'a> {
    interp: &'i Interpreter<'a>,
    globals: Vec<Value>,
    output: Value,
    frag_coord: Value,
}

impl Machine<'_, '_> {
    fn call(&mut self, id: FuncId, args: Vec<Value>) -> Exec<Value> {
        let program = self.interp.program;
        let function = &program.functions[id];
        let mut locals: Vec<Value> = function.locals.iter().map(|t| Value::zero(*t)).collect();
        for (slot, arg) in locals.iter_mut().zip(args) {
            *slot = arg;
        }
        match self.block(&function.body, &mut locals)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::zero(function.ret)),
        }
    }

    fn block(&mut self, stmts: &[Stmt], locals: &mut [Value]) -> Exec<Flow> {
        for stmt in stmts {
            match self.stmt(stmt, locals)? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn stmt(&mut self, stmt: &Stmt, locals: &mut [Value]) -> Exec<Flow> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr, locals)?;
            }
            Stmt::Init(slot, expr) => {
                locals[*slot] = self.eval(expr, locals)?;
            }
            Stmt::If(cond, then, otherwise) => {
                return if self.eval(cond, locals)?.as_bool() {
                    self.block(then, locals)
                } else {
                    self.block(otherwise, locals)
                };
            }
            Stmt::Loop { cond, step, body } => {
                let budget = self.interp.max_loop_iterations;
                let mut iterations = 0u64;
                loop {
                    if let Some(cond) = cond {
                        if !self.eval(cond, locals)?.as_bool() {
                            break;
                        }
                    }
                    iterations += 1;
                    if iterations > budget {
                        return fault(format!("loop exceeded {budget} iterations"));
                    }
                    match self.block(body, locals)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Next | Flow::Continue => {}
                    }
                    if let Some(step) = step {
                        self.eval(step, locals)?;
                    }
                }
            }
            Stmt::Block(stmts) => return self.block(stmts, locals),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, locals)?,
                    None => Value::Void,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Discard => return Err(Halt::Discard),
        }
        Ok(Flow::Next)
    }

    fn eval(&mut self, expr: &Expr, locals: &mut [Value]) -> Exec<Value> {
        Ok(match expr {
            Expr::Const(value) => *value,
            Expr::Local(slot) => locals[*slot],
            Expr::Global(slot) => self.globals[*slot],
            Expr::Param(index) => self.interp.params.get(*index).copied().unwrap_or(Value::Void),
            Expr::Output => self.output,
            Expr::FragCoord => self.frag_coord,
            Expr::Promote(inner) => promote(self.eval(inner, locals)?),
            Expr::Neg(inner) => negate(self.eval(inner, locals)?),
            Expr::Not(inner) => Value::Bool(!self.eval(inner, locals)?.as_bool()),
            Expr::Binary(op, l, r) => {
                let l = self.eval(l, locals)?;
                let r = self.eval(r, locals)?;
                binary(*op, l, r)
            }
            Expr::And(l, r) => {
                Value::Bool(self.eval(l, locals)?.as_bool() && self.eval(r, locals)?.as_bool())
            }
            Expr::Or(l, r) => {
                Value::Bool(self.eval(l, locals)?.as_bool() || self.eval(r, locals)?.as_bool())
            }
            Expr::Select(cond, a, b) => {
                if self.eval(cond, locals)?.as_bool() {
                    self.eval(a, locals)?
                } else {
                    self.eval(b, locals)?
                }
            }
            Expr::Swizzle(base, swizzle) => swizzle_value(self.eval(base, locals)?, *swizzle),
            Expr::Index(base, index) => {
                let base = self.eval(base, locals)?;
                let index = self.eval(index, locals)?.as_int();
                index_value(base, index)?
            }
            Expr::Construct(ty, args) => {
                let args = self.args(args, locals)?;
                construct(*ty, &args)
            }
            Expr::Call(id, args) => {
                let args = self.args(args, locals)?;
                self.call(*id, args)?
            }
            Expr::Builtin(builtin, args) => {
                let args = self.args(args, locals)?;
                if builtin.is_texture() {
                    self.texture(*builtin, &args)?
                } else {
                    builtins::eval(*builtin, &args)
                }
            }
            Expr::Assign(place, op, value) => {
                let path = self.resolve(place, locals)?;
                let value = self.eval(value, locals)?;
                let value = match op {
                    Some(op) => binary(*op, self.read(place.root, &path, locals)?, value),
                    None => value,
                };
                self.write(place.root, &path, value, locals)?;
                value
            }
            Expr::Step {
                place,
                increment,
                prefix,
            } => {
                let path = self.resolve(place, locals)?;
                let old = self.read(place.root, &path, locals)?;
                let new = step(old, *increment);
                self.write(place.root, &path, new, locals)?;
                if *prefix {
                    new
                } else {
                    old
                }
            }
        })
    }

    fn args(&mut self, args: &[Expr], locals: &mut [Value]) -> Exec<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg, locals)).collect()
    }

    fn texture(&self, builtin: Builtin, args: &[Value]) -> Exec<Value> {
        let textures = self.interp.textures;
        let unit = args.first().copied().unwrap_or(Value::Void).as_int();
        let coord = args.get(1).copied().unwrap_or(Value::Void);
        let dims = if coord.floats().len() == 2 { 2 } else { 1 };
        let result = match builtin {
            Builtin::TexelFetch => {
                let c = coord.ints();
                textures
                    .fetch(unit, dims, [c[0], c.get(1).copied().unwrap_or(0)])
                    .map(|t| Value::Vec(t, 4))
            }
            Builtin::Texture => {
                let c = coord.floats();
                textures
                    .sample(unit, dims, [c[0], c.get(1).copied().unwrap_or(0.0)])
                    .map(|t| Value::Vec(t, 4))
            }
            Builtin::TextureSize => textures.size(unit, 2).map(|s| Value::ivec(&s)),
            Builtin::TextureSize1D => textures.size(unit, 1).map(|s| Value::Int(s[0])),
            _ => Ok(Value::Void),
        };
        result.map_err(Halt::Fault)
    }

    /// Evaluate index expressions of a place once, before reading or writing.
    fn resolve(&mut self, place: &Place, locals: &mut [Value]) -> Exec<Vec<Step>> {
        place
            .path
            .iter()
            .map(|access| match access {
                Access::Swizzle(swizzle) => Ok(Step::Lanes(*swizzle)),
                Access::Index(index) => Ok(Step::Index(self.eval(index, locals)?.as_int())),
            })
            .collect()
    }

    fn root<'v>(&'v mut self, root: Root, locals: &'v mut [Value]) -> &'v mut Value {
        match root {
            Root::Local(slot) => &mut locals[slot],
            Root::Global(slot) => &mut self.globals[slot],
            Root::Output => &mut self.output,
        }
    }

    fn read(&mut self, root: Root, path: &[Step], locals: &mut [Value]) -> Exec<Value> {
        let mut value = *self.root(root, locals);
        for step in path {
            value = match step {
                Step::Lanes(swizzle) => swizzle_value(value, *swizzle),
                Step::Index(index) => index_value(value, *index)?,
            };
        }
        Ok(value)
    }

    fn write(&mut self, root: Root, path: &[Step], value: Value, locals: &mut [Value]) -> Exec<()> {
        let slot = self.root(root, locals);
        *slot = write_path(*slot, path, value)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Lanes(Swizzle),
    Index(i32),
}

fn write_path(base: Value, path: &[Step], value: Value) -> Exec<Value> {
    match path.split_first() {
        None => Ok(value),
        Some((Step::Lanes(swizzle), rest)) => {
            let inner = write_path(swizzle_value(base, *swizzle), rest, value)?;
            Ok(scatter(base, *swizzle, inner))
        }
        Some((Step::Index(index), rest)) => {
            let inner = write_path(index_value(base, *index)?, rest, value)?;
            set_index(base, *index, inner)
        }
    }
}

fn swizzle_value(value: Value, swizzle: Swizzle) -> Value {
    match value {
        Value::Vec(lanes, _) => {
            let picked: Vec<f32> = swizzle.lanes().iter().map(|&l| lanes[l as usize]).collect();
            Value::vec(&picked)
        }
        Value::IVec(lanes, _) => {
            let picked: Vec<i32> = swizzle.lanes().iter().map(|&l| lanes[l as usize]).collect();
            Value::ivec(&picked)
        }
        other => other,
    }
}

fn scatter(base: Value, swizzle: Swizzle, inner: Value) -> Value {
    match base {
        Value::Vec(mut lanes, n) => {
            for (lane, v) in swizzle.lanes().iter().zip(inner.floats()) {
                lanes[*lane as usize] = v;
            }
            Value::Vec(lanes, n)
        }
        Value::IVec(mut lanes, n) => {
            for (lane, v) in swizzle.lanes().iter().zip(inner.ints()) {
                lanes[*lane as usize] = v;
            }
            Value::IVec(lanes, n)
        }
        other => other,
    }
}

fn out_of_range<T>(index: i32, value: Value) -> Exec<T> {
    fault(format!("index {index} out of range for {value:?}"))
}

fn index_value(value: Value, index: i32) -> Exec<Value> {
    let i = index as usize;
    match value {
        Value::Vec(lanes, n) if index >= 0 && i < n as usize => Ok(Value::Float(lanes[i])),
        Value::IVec(lanes, n) if index >= 0 && i < n as usize => Ok(Value::Int(lanes[i])),
        Value::Mat4(m) if (0..4).contains(&index) => Ok(Value::vec(&m[i * 4..i * 4 + 4])),
        other => out_of_range(index, other),
    }
}

fn set_index(base: Value, index: i32, inner: Value) -> Exec<Value> {
    let i = index as usize;
    match base {
        Value::Vec(mut lanes, n) if index >= 0 && i < n as usize => {
            lanes[i] = inner.floats().first().copied().unwrap_or(0.0);
            Ok(Value::Vec(lanes, n))
        }
        Value::IVec(mut lanes, n) if index >= 0 && i < n as usize => {
            lanes[i] = inner.ints().first().copied().unwrap_or(0);
            Ok(Value::IVec(lanes, n))
        }
        Value::Mat4(mut m) if (0..4).contains(&index) => {
            for (dst, v) in m[i * 4..i * 4 + 4].iter_mut().zip(inner.floats()) {
                *dst = v;
            }
            Ok(Value::Mat4(m))
        }
        other => out_of_range(index, other),
    }
}

fn promote(value: Value) -> Value {
    match value {
        Value::Int(i) => Value::Float(i as f32),
        Value::IVec(lanes, n) => Value::Vec(lanes.map(|l| l as f32), n),
        other => other,
    }
}

fn negate(value: Value) -> Value {
    match value {
        Value::Int(i) => Value::Int(i.wrapping_neg()),
        Value::Float(f) => Value::Float(-f),
        Value::Vec(lanes, n) => Value::Vec(lanes.map(|l| -l), n),
        Value::IVec(lanes, n) => Value::IVec(lanes.map(i32::wrapping_neg), n),
        Value::Mat4(m) => Value::Mat4(m.map(|v| -v)),
        other => other,
    }
}

fn step(value: Value, increment: bool) -> Value {
    let delta = if increment { 1 } else { -1 };
    match value {
        Value::Int(i) => Value::Int(i.wrapping_add(delta)),
        Value::Float(f) => Value::Float(f + delta as f32),
        Value::Vec(lanes, n) => Value::Vec(lanes.map(|l| l + delta as f32), n),
        Value::IVec(lanes, n) => Value::IVec(lanes.map(|l| l.wrapping_add(delta)), n),
        other => other,
    }
}

fn is_int(value: Value) -> bool {
    matches!(value, Value::Int(_) | Value::IVec(..))
}

fn binary(op: BinOp, a: Value, b: Value) -> Value {
    match (op, a, b) {
        (BinOp::Eq, _, _) => Value::Bool(a == b),
        (BinOp::Ne, _, _) => Value::Bool(a != b),
        (BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge, _, _) => {
            let ordering = match (a, b) {
                (Value::Int(x), Value::Int(y)) => Some(x.cmp(&y)),
                (Value::Float(x), Value::Float(y)) => x.partial_cmp(&y),
                _ => None,
            };
            Value::Bool(match (op, ordering) {
                (_, None) => false,
                (BinOp::Lt, Some(o)) => o == Ordering::Less,
                (BinOp::Le, Some(o)) => o != Ordering::Greater,
                (BinOp::Gt, Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            })
        }
        (BinOp::Mul, Value::Mat4(m), Value::Mat4(n)) => {
            let mut out = [0.0; 16];
            for col in 0..4 {
                for row in 0..4 {
                    out[col * 4 + row] = (0..4).map(|k| m[k * 4 + row] * n[col * 4 + k]).sum();
                }
            }
            Value::Mat4(out)
        }
        (BinOp::Mul, Value::Mat4(m), Value::Vec(v, 4)) => {
            let out: Vec<f32> = (0..4)
                .map(|row| (0..4).map(|k| m[k * 4 + row] * v[k]).sum())
                .collect();
            Value::vec(&out)
        }
        (BinOp::Mul, Value::Vec(v, 4), Value::Mat4(m)) => {
            let out: Vec<f32> = (0..4)
                .map(|col| (0..4).map(|k| v[k] * m[col * 4 + k]).sum())
                .collect();
            Value::vec(&out)
        }
        _ if is_int(a) && is_int(b) => {
            let f: fn(i32, i32) -> i32 = match op {
                BinOp::Add => i32::wrapping_add,
                BinOp::Sub => i32::wrapping_sub,
                BinOp::Mul => i32::wrapping_mul,
                BinOp::Div => |x: i32, y: i32| x.checked_div(y).unwrap_or(0),
                _ => |x: i32, y: i32| x.checked_rem(y).unwrap_or(0),
            };
            let (la, lb) = (a.ints(), b.ints());
            let n = la.len().max(lb.len());
            let out: Vec<i32> = (0..n).map(|i| f(pick(&la, i), pick(&lb, i))).collect();
            Value::ivec(&out)
        }
        _ => {
            let f: fn(f32, f32) -> f32 = match op {
                BinOp::Add => |x: f32, y: f32| x + y,
                BinOp::Sub => |x: f32, y: f32| x - y,
                BinOp::Mul => |x: f32, y: f32| x * y,
                _ => |x: f32, y: f32| x / y,
            };
            let (la, lb) = (a.floats(), b.floats());
            let n = la.len().max(lb.len());
            let out: Vec<f32> = (0..n).map(|i| f(pick(&la, i), pick(&lb, i))).collect();
            if n == 16 {
                let mut m = [0.0; 16];
                m.copy_from_slice(&out);
                Value::Mat4(m)
            } else {
                Value::vec(&out)
            }
        }
    }
}

/// Lane `i`, broadcasting scalars.
fn pick<T: Copy + Default>(lanes: &[T], i: usize) -> T {
    if lanes.len() == 1 {
        lanes[0]
    } else {
        lanes.get(i).copied().unwrap_or_default()
    }
}

fn construct(ty: Type, args: &[Value]) -> Value {
    let single_scalar = args.len() == 1 && args[0].floats().len() == 1;
    match ty {
        Type::Bool => Value::Bool(args.first().is_some_and(|a| pick(&a.floats(), 0) != 0.0)),
        Type::Int => Value::Int(args.first().map(|a| pick(&a.ints(), 0)).unwrap_or(0)),
        Type::Float => Value::Float(args.first().map(|a| pick(&a.floats(), 0)).unwrap_or(0.0)),
        Type::Vec(n) => {
            let flat: Vec<f32> = args.iter().flat_map(|a| a.floats()).collect();
            let lanes: Vec<f32> = (0..n as usize)
                .map(|i| if single_scalar { flat[0] } else { flat.get(i).copied().unwrap_or(0.0) })
                .collect();
            Value::vec(&lanes)
        }
        Type::IVec(n) => {
            let flat: Vec<i32> = args.iter().flat_map(|a| a.ints()).collect();
            let lanes: Vec<i32> = (0..n as usize)
                .map(|i| if single_scalar { flat[0] } else { flat.get(i).copied().unwrap_or(0) })
                .collect();
            Value::ivec(&lanes)
        }
        Type::Mat4 => {
            let flat: Vec<f32> = args.iter().flat_map(|a| a.floats()).collect();
            let mut m = [0.0; 16];
            if single_scalar {
                for i in 0..4 {
                    m[i * 4 + i] = flat[0];
                }
            } else {
                for (dst, v) in m.iter_mut().zip(flat) {
                    *dst = v;
                }
            }
            Value::Mat4(m)
        }
        _ => Value::zero(ty),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::{check::check, parser::parse, DEFAULT_MAX_DEPTH};

    fn program(src: &str) -> Program {
        check(&[parse(src, DEFAULT_MAX_DEPTH).expect("parse")], DEFAULT_MAX_DEPTH).expect("check")
    }

    fn run(src: &str, params: &[Value], x: usize, y: usize) -> Result<Option<Value>, String> {
        let program = program(src);
        Interpreter::new(&program, params, &NoTextures, 1000).invoke(x, y)
    }

    #[test]
    fn writes_output_from_frag_coord() {
        let out = run("out vec2 o; void main() { o = gl_FragCoord.xy; }", &[], 3, 7).expect("run");
        assert_eq!(out, Some(Value::vec(&[3.5, 7.5])));
    }

    #[test]
    fn uniforms_and_function_calls() {
        let src = "uniform float k;\nout float o;\nfloat twice(float v) { return v * 2.0; }\nvoid main() { o = twice(k) + 1; }";
        assert_eq!(run(src, &[Value::Float(1.5)], 0, 0).expect("run"), Some(Value::Float(4.0)));
    }

    #[test]
    fn loops_and_compound_assignment() {
        let src = "out float o; void main() { int s = 0; for (int i = 0; i < 10; i++) { if (i == 5) continue; s += i; } o = float(s); }";
        assert_eq!(run(src, &[], 0, 0).expect("run"), Some(Value::Float(40.0)));
    }

    #[test]
    fn swizzle_writes_and_matrix_columns() {
        let src = "out vec4 o; void main() { mat4 m = mat4(2.0); vec4 v = vec4(0.0); v.wy = vec2(1.0, 3.0); m[1].x = 5.0; o = m * v; }";
        let out = run(src, &[], 0, 0).expect("run");
        assert_eq!(out, Some(Value::vec(&[15.0, 6.0, 0.0, 2.0])));
    }

    #[test]
    fn global_initializers_run_per_invocation() {
        let src = "out float o; float acc = 1.0; void main() { acc += gl_FragCoord.x; o = acc; }";
        let program = program(src);
        let interp = Interpreter::new(&program, &[], &NoTextures, 10);
        assert_eq!(interp.invoke(0, 0).expect("run"), Some(Value::Float(1.5)));
        assert_eq!(interp.invoke(0, 0).expect("run"), Some(Value::Float(1.5)));
    }

    #[test]
    fn discard_yields_no_output() {
        let src = "out float o; void main() { o = 1.0; if (gl_FragCoord.x > 1.0) discard; }";
        assert_eq!(run(src, &[], 0, 0).expect("run"), Some(Value::Float(1.0)));
        assert_eq!(run(src, &[], 2, 0).expect("run"), None);
    }

    #[test]
    fn runaway_loop_faults() {
        let err = run("void main() { while (true) {} }", &[], 0, 0).unwrap_err();
        assert!(err.contains("1000"), "{err}");
    }

    #[test]
    fn dynamic_index_out_of_range_faults() {
        let src = "out float o; void main() { vec2 v = vec2(1.0); int i = 2; o = v[i]; }";
        assert!(run(src, &[], 0, 0).is_err());
    }

    #[test]
    fn integer_division_by_zero_is_zero() {
        let src = "out float o; void main() { int z = 0; o = float(7 / z + 7 % 3); }";
        assert_eq!(run(src, &[], 0, 0).expect("run"), Some(Value::Float(1.0)));
    }

    #[test]
    fn unbound_sampler_reads_opaque_black() {
        let src = "uniform sampler2D s; out vec4 o; void main() { o = texture(s, vec2(0.5)); }";
        let out = run(src, &[Value::Sampler(0)], 0, 0).expect("run");
        assert_eq!(out, Some(Value::vec(&[0.0, 0.0, 0.0, 1.0])));
    }
}
