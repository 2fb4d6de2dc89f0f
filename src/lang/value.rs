use super::types::Type;

/// A runtime value. Vector lanes past the vector's length are kept at zero so
/// that `==` on whole values compares only live lanes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Void,
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec([f32; 4], u8),
    IVec([i32; 4], u8),
    /// Column-major.
    Mat4([f32; 16]),
    /// Texture unit the sampler reads from.
    Sampler(i32),
}

impl Value {
    pub fn zero(ty: Type) -> Value {
        match ty {
            Type::Void => Value::Void,
            Type::Bool => Value::Bool(false),
            Type::Int => Value::Int(0),
            Type::Float => Value::Float(0.0),
            Type::Vec(n) => Value::Vec([0.0; 4], n),
            Type::IVec(n) => Value::IVec([0; 4], n),
            Type::Mat4 => Value::Mat4([0.0; 16]),
            Type::Sampler1D | Type::Sampler2D => Value::Sampler(0),
        }
    }

    pub fn vec(lanes: &[f32]) -> Value {
        let mut out = [0.0; 4];
        out[..lanes.len()].copy_from_slice(lanes);
        if lanes.len() == 1 {
            Value::Float(lanes[0])
        } else {
            Value::Vec(out, lanes.len() as u8)
        }
    }

    pub fn ivec(lanes: &[i32]) -> Value {
        let mut out = [0; 4];
        out[..lanes.len()].copy_from_slice(lanes);
        if lanes.len() == 1 {
            Value::Int(lanes[0])
        } else {
            Value::IVec(out, lanes.len() as u8)
        }
    }

    pub fn identity() -> Value {
        let mut m = [0.0; 16];
        for i in 0..4 {
            m[i * 4 + i] = 1.0;
        }
        Value::Mat4(m)
    }

    pub fn as_bool(self) -> bool {
        match self {
            Value::Bool(b) => b,
            Value::Int(i) => i != 0,
            Value::Float(f) => f != 0.0,
            _ => false,
        }
    }

    pub fn as_int(self) -> i32 {
        match self {
            Value::Int(i) | Value::Sampler(i) => i,
            Value::Float(f) => f as i32,
            Value::Bool(b) => b as i32,
            _ => 0,
        }
    }

    /// Components as floats, in storage order.
    pub fn floats(self) -> Vec<f32> {
        match self {
            Value::Bool(b) => vec![b as i32 as f32],
            Value::Int(i) => vec![i as f32],
            Value::Float(f) => vec![f],
            Value::Vec(v, n) => v[..n as usize].to_vec(),
            Value::IVec(v, n) => v[..n as usize].iter().map(|&i| i as f32).collect(),
            Value::Mat4(m) => m.to_vec(),
            Value::Void | Value::Sampler(_) => Vec::new(),
        }
    }

    /// Components as ints, in storage order.
    pub fn ints(self) -> Vec<i32> {
        match self {
            Value::Bool(b) => vec![b as i32],
            Value::Int(i) | Value::Sampler(i) => vec![i],
            Value::Float(f) => vec![f as i32],
            Value::Vec(v, n) => v[..n as usize].iter().map(|&f| f as i32).collect(),
            Value::IVec(v, n) => v[..n as usize].to_vec(),
            Value::Mat4(m) => m.iter().map(|&f| f as i32).collect(),
            Value::Void => Vec::new(),
        }
    }

    /// Padded RGBA view used when writing a kernel output to an array.
    pub fn rgba(self) -> [f32; 4] {
        match self {
            Value::Float(f) => [f, 0.0, 0.0, 0.0],
            Value::Vec(v, _) => v,
            _ => [0.0; 4],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_constructor_pads_and_collapses() {
        assert_eq!(Value::vec(&[1.0]), Value::Float(1.0));
        assert_eq!(Value::vec(&[1.0, 2.0]), Value::Vec([1.0, 2.0, 0.0, 0.0], 2));
        assert_eq!(Value::ivec(&[3, 4, 5]).ints(), vec![3, 4, 5]);
    }

    #[test]
    fn identity_is_column_major_diagonal() {
        let Value::Mat4(m) = Value::identity() else {
            panic!("not a matrix")
        };
        assert_eq!(m[0], 1.0);
        assert_eq!(m[5], 1.0);
        assert_eq!(m[1], 0.0);
        assert_eq!(m[15], 1.0);
    }
}
