//! Built-in functions: overload resolution at check time and evaluation of
//! the arithmetic ones. Texture lookups are evaluated by the interpreter,
//! which owns the bound arrays.

use super::types::Type;
use super::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Radians,
    Degrees,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Pow,
    Exp,
    Log,
    Exp2,
    Log2,
    Sqrt,
    InverseSqrt,
    Abs,
    Sign,
    Floor,
    Ceil,
    Fract,
    Mod,
    Min,
    Max,
    Clamp,
    Mix,
    Step,
    Smoothstep,
    Length,
    Distance,
    Dot,
    Cross,
    Normalize,
    Reflect,
    Transpose,
    TexelFetch,
    Texture,
    TextureSize,
    TextureSize1D,
}

impl Builtin {
    pub fn is_texture(self) -> bool {
        matches!(
            self,
            Builtin::TexelFetch | Builtin::Texture | Builtin::TextureSize | Builtin::TextureSize1D
        )
    }
}

/// A resolved overload: the parameter types arguments must be promoted to and
/// the result type.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub builtin: Builtin,
    pub params: Vec<Type>,
    pub ret: Type,
}

fn sig(builtin: Builtin, params: Vec<Type>, ret: Type) -> Option<Signature> {
    Some(Signature {
        builtin,
        params,
        ret,
    })
}

/// Whether `name` is reserved by a built-in function.
pub fn is_builtin(name: &str) -> bool {
    unary_float(name).is_some()
        || matches!(
            name,
            "atan"
                | "pow"
                | "abs"
                | "sign"
                | "mod"
                | "min"
                | "max"
                | "clamp"
                | "mix"
                | "step"
                | "smoothstep"
                | "length"
                | "distance"
                | "dot"
                | "cross"
                | "reflect"
                | "transpose"
                | "texelFetch"
                | "texture"
                | "textureSize"
        )
}

fn unary_float(name: &str) -> Option<Builtin> {
    Some(match name {
        "radians" => Builtin::Radians,
        "degrees" => Builtin::Degrees,
        "sin" => Builtin::Sin,
        "cos" => Builtin::Cos,
        "tan" => Builtin::Tan,
        "asin" => Builtin::Asin,
        "acos" => Builtin::Acos,
        "exp" => Builtin::Exp,
        "log" => Builtin::Log,
        "exp2" => Builtin::Exp2,
        "log2" => Builtin::Log2,
        "sqrt" => Builtin::Sqrt,
        "inversesqrt" => Builtin::InverseSqrt,
        "floor" => Builtin::Floor,
        "ceil" => Builtin::Ceil,
        "fract" => Builtin::Fract,
        "normalize" => Builtin::Normalize,
        _ => return None,
    })
}

/// Resolve a call to a built-in function against argument types.
pub fn resolve(name: &str, args: &[Type]) -> Option<Signature> {
    let float = |i: usize| args.get(i).and_then(|t| t.to_float());
    let all_int = args.iter().all(|t| t.is_int_family());

    if let Some(builtin) = unary_float(name) {
        let g = float(0)?;
        return (args.len() == 1).then(|| Signature {
            builtin,
            params: vec![g],
            ret: g,
        });
    }

    match (name, args.len()) {
        ("abs", 1) | ("sign", 1) => {
            let builtin = if name == "abs" {
                Builtin::Abs
            } else {
                Builtin::Sign
            };
            let g = if all_int { args[0] } else { float(0)? };
            sig(builtin, vec![g], g)
        }
        ("atan", 1) => {
            let g = float(0)?;
            sig(Builtin::Atan, vec![g], g)
        }
        ("atan", 2) | ("pow", 2) | ("reflect", 2) => {
            let builtin = match name {
                "atan" => Builtin::Atan2,
                "pow" => Builtin::Pow,
                _ => Builtin::Reflect,
            };
            let g = float(0)?;
            (float(1)? == g).then(|| Signature {
                builtin,
                params: vec![g, g],
                ret: g,
            })
        }
        ("distance", 2) | ("dot", 2) => {
            let builtin = if name == "dot" {
                Builtin::Dot
            } else {
                Builtin::Distance
            };
            let g = float(0)?;
            (float(1)? == g).then(|| Signature {
                builtin,
                params: vec![g, g],
                ret: Type::Float,
            })
        }
        ("length", 1) => {
            let g = float(0)?;
            sig(Builtin::Length, vec![g], Type::Float)
        }
        ("cross", 2) => {
            (float(0)? == Type::Vec(3) && float(1)? == Type::Vec(3)).then(|| Signature {
                builtin: Builtin::Cross,
                params: vec![Type::Vec(3), Type::Vec(3)],
                ret: Type::Vec(3),
            })
        }
        ("mod", 2) | ("min", 2) | ("max", 2) => {
            let builtin = match name {
                "mod" => Builtin::Mod,
                "min" => Builtin::Min,
                _ => Builtin::Max,
            };
            if all_int && builtin != Builtin::Mod {
                let g = args[0];
                return (args[1] == g || args[1] == Type::Int).then(|| Signature {
                    builtin,
                    params: args.to_vec(),
                    ret: g,
                });
            }
            let g = float(0)?;
            let h = float(1)?;
            (h == g || h == Type::Float).then(|| Signature {
                builtin,
                params: vec![g, h],
                ret: g,
            })
        }
        ("clamp", 3) => {
            if all_int {
                let g = args[0];
                let ok = (args[1] == g && args[2] == g)
                    || (args[1] == Type::Int && args[2] == Type::Int);
                return ok.then(|| Signature {
                    builtin: Builtin::Clamp,
                    params: args.to_vec(),
                    ret: g,
                });
            }
            let g = float(0)?;
            let (lo, hi) = (float(1)?, float(2)?);
            let ok = (lo == g && hi == g) || (lo == Type::Float && hi == Type::Float);
            ok.then(|| Signature {
                builtin: Builtin::Clamp,
                params: vec![g, lo, hi],
                ret: g,
            })
        }
        ("mix", 3) => {
            let g = float(0)?;
            let a = float(2)?;
            (float(1)? == g && (a == g || a == Type::Float)).then(|| Signature {
                builtin: Builtin::Mix,
                params: vec![g, g, a],
                ret: g,
            })
        }
        ("step", 2) => {
            let g = float(1)?;
            let edge = float(0)?;
            (edge == g || edge == Type::Float).then(|| Signature {
                builtin: Builtin::Step,
                params: vec![edge, g],
                ret: g,
            })
        }
        ("smoothstep", 3) => {
            let g = float(2)?;
            let (e0, e1) = (float(0)?, float(1)?);
            (e0 == e1 && (e0 == g || e0 == Type::Float)).then(|| Signature {
                builtin: Builtin::Smoothstep,
                params: vec![e0, e1, g],
                ret: g,
            })
        }
        ("transpose", 1) => (args[0] == Type::Mat4).then(|| Signature {
            builtin: Builtin::Transpose,
            params: vec![Type::Mat4],
            ret: Type::Mat4,
        }),
        ("texelFetch", 3) => match (args[0], args[1], args[2]) {
            (Type::Sampler2D, Type::IVec(2), Type::Int) => sig(
                Builtin::TexelFetch,
                vec![Type::Sampler2D, Type::IVec(2), Type::Int],
                Type::Vec(4),
            ),
            (Type::Sampler1D, Type::Int, Type::Int) => sig(
                Builtin::TexelFetch,
                vec![Type::Sampler1D, Type::Int, Type::Int],
                Type::Vec(4),
            ),
            _ => None,
        },
        ("texture", 2) => match (args[0], float(1)?) {
            (Type::Sampler2D, Type::Vec(2)) => sig(
                Builtin::Texture,
                vec![Type::Sampler2D, Type::Vec(2)],
                Type::Vec(4),
            ),
            (Type::Sampler1D, Type::Float) => sig(
                Builtin::Texture,
                vec![Type::Sampler1D, Type::Float],
                Type::Vec(4),
            ),
            _ => None,
        },
        ("textureSize", 2) => match (args[0], args[1]) {
            (Type::Sampler2D, Type::Int) => sig(
                Builtin::TextureSize,
                vec![Type::Sampler2D, Type::Int],
                Type::IVec(2),
            ),
            (Type::Sampler1D, Type::Int) => sig(
                Builtin::TextureSize1D,
                vec![Type::Sampler1D, Type::Int],
                Type::Int,
            ),
            _ => None,
        },
        _ => None,
    }
}

// ------------------------------------------------------------- evaluation

fn lanes(v: Value) -> ([f32; 4], usize) {
    match v {
        Value::Float(f) => ([f, 0.0, 0.0, 0.0], 1),
        Value::Vec(l, n) => (l, n as usize),
        _ => ([0.0; 4], 1),
    }
}

fn ilanes(v: Value) -> ([i32; 4], usize) {
    match v {
        Value::Int(i) => ([i, 0, 0, 0], 1),
        Value::IVec(l, n) => (l, n as usize),
        _ => ([0; 4], 1),
    }
}

fn map1(v: Value, f: impl Fn(f32) -> f32) -> Value {
    let (l, n) = lanes(v);
    let out: Vec<f32> = l[..n].iter().map(|&x| f(x)).collect();
    Value::vec(&out)
}

/// Component-wise over two operands; a scalar operand is broadcast.
fn map2(a: Value, b: Value, f: impl Fn(f32, f32) -> f32) -> Value {
    let (la, na) = lanes(a);
    let (lb, nb) = lanes(b);
    let n = na.max(nb);
    let out: Vec<f32> = (0..n)
        .map(|i| f(la[if na == 1 { 0 } else { i }], lb[if nb == 1 { 0 } else { i }]))
        .collect();
    Value::vec(&out)
}

fn map3(a: Value, b: Value, c: Value, f: impl Fn(f32, f32, f32) -> f32) -> Value {
    let (la, na) = lanes(a);
    let (lb, nb) = lanes(b);
    let (lc, nc) = lanes(c);
    let n = na.max(nb).max(nc);
    let pick = |l: &[f32; 4], len: usize, i: usize| l[if len == 1 { 0 } else { i }];
    let out: Vec<f32> = (0..n)
        .map(|i| f(pick(&la, na, i), pick(&lb, nb, i), pick(&lc, nc, i)))
        .collect();
    Value::vec(&out)
}

fn imap(args: &[Value], f: impl Fn(&[i32]) -> i32) -> Value {
    let decoded: Vec<([i32; 4], usize)> = args.iter().map(|&v| ilanes(v)).collect();
    let n = decoded.iter().map(|(_, n)| *n).max().unwrap_or(1);
    let out: Vec<i32> = (0..n)
        .map(|i| {
            let lane: Vec<i32> = decoded
                .iter()
                .map(|(l, len)| l[if *len == 1 { 0 } else { i }])
                .collect();
            f(&lane)
        })
        .collect();
    Value::ivec(&out)
}

fn dot(a: Value, b: Value) -> f32 {
    let (la, n) = lanes(a);
    let (lb, _) = lanes(b);
    (0..n).map(|i| la[i] * lb[i]).sum()
}

fn is_int(v: Value) -> bool {
    matches!(v, Value::Int(_) | Value::IVec(..))
}

/// Evaluate a non-texture builtin. Arguments already have the resolved
/// parameter types.
pub fn eval(builtin: Builtin, args: &[Value]) -> Value {
    let a = args.first().copied().unwrap_or(Value::Void);
    let b = args.get(1).copied().unwrap_or(Value::Void);
    let c = args.get(2).copied().unwrap_or(Value::Void);
    match builtin {
        Builtin::Radians => map1(a, f32::to_radians),
        Builtin::Degrees => map1(a, f32::to_degrees),
        Builtin::Sin => map1(a, f32::sin),
        Builtin::Cos => map1(a, f32::cos),
        Builtin::Tan => map1(a, f32::tan),
        Builtin::Asin => map1(a, f32::asin),
        Builtin::Acos => map1(a, f32::acos),
        Builtin::Atan => map1(a, f32::atan),
        Builtin::Atan2 => map2(a, b, f32::atan2),
        Builtin::Pow => map2(a, b, f32::powf),
        Builtin::Exp => map1(a, f32::exp),
        Builtin::Log => map1(a, f32::ln),
        Builtin::Exp2 => map1(a, f32::exp2),
        Builtin::Log2 => map1(a, f32::log2),
        Builtin::Sqrt => map1(a, f32::sqrt),
        Builtin::InverseSqrt => map1(a, |x| 1.0 / x.sqrt()),
        Builtin::Abs if is_int(a) => imap(args, |l| l[0].wrapping_abs()),
        Builtin::Abs => map1(a, f32::abs),
        Builtin::Sign if is_int(a) => imap(args, |l| l[0].signum()),
        Builtin::Sign => map1(a, |x| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }),
        Builtin::Floor => map1(a, f32::floor),
        Builtin::Ceil => map1(a, f32::ceil),
        Builtin::Fract => map1(a, |x| x - x.floor()),
        Builtin::Mod => map2(a, b, |x, y| x - y * (x / y).floor()),
        Builtin::Min if is_int(a) => imap(args, |l| l[0].min(l[1])),
        Builtin::Min => map2(a, b, f32::min),
        Builtin::Max if is_int(a) => imap(args, |l| l[0].max(l[1])),
        Builtin::Max => map2(a, b, f32::max),
        Builtin::Clamp if is_int(a) => imap(args, |l| l[0].max(l[1]).min(l[2])),
        Builtin::Clamp => map3(a, b, c, |x, lo, hi| x.max(lo).min(hi)),
        Builtin::Mix => map3(a, b, c, |x, y, t| x * (1.0 - t) + y * t),
        Builtin::Step => map2(a, b, |edge, x| if x < edge { 0.0 } else { 1.0 }),
        Builtin::Smoothstep => map3(a, b, c, |e0, e1, x| {
            let t = ((x - e0) / (e1 - e0)).clamp(0.0, 1.0);
            t * t * (3.0 - 2.0 * t)
        }),
        Builtin::Length => Value::Float(dot(a, a).sqrt()),
        Builtin::Distance => {
            let d = map2(a, b, |x, y| x - y);
            Value::Float(dot(d, d).sqrt())
        }
        Builtin::Dot => Value::Float(dot(a, b)),
        Builtin::Cross => {
            let (x, _) = lanes(a);
            let (y, _) = lanes(b);
            Value::vec(&[
                x[1] * y[2] - x[2] * y[1],
                x[2] * y[0] - x[0] * y[2],
                x[0] * y[1] - x[1] * y[0],
            ])
        }
        Builtin::Normalize => {
            let len = dot(a, a).sqrt();
            map1(a, |x| x / len)
        }
        Builtin::Reflect => {
            let d = 2.0 * dot(b, a);
            map2(a, b, |i, n| i - d * n)
        }
        Builtin::Transpose => match a {
            Value::Mat4(m) => {
                let mut t = [0.0; 16];
                for col in 0..4 {
                    for row in 0..4 {
                        t[row * 4 + col] = m[col * 4 + row];
                    }
                }
                Value::Mat4(t)
            }
            other => other,
        },
        Builtin::TexelFetch | Builtin::Texture | Builtin::TextureSize | Builtin::TextureSize1D => {
            Value::Void
        }
    }
}
