use std::fmt;

/// Kernel-language types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Int,
    Float,
    /// `vec2`..`vec4`
    Vec(u8),
    /// `ivec2`..`ivec4`
    IVec(u8),
    Mat4,
    Sampler1D,
    Sampler2D,
}

impl Type {
    /// Number of scalar components a value of this type holds.
    pub fn components(self) -> usize {
        match self {
            Type::Void => 0,
            Type::Bool | Type::Int | Type::Float | Type::Sampler1D | Type::Sampler2D => 1,
            Type::Vec(n) | Type::IVec(n) => n as usize,
            Type::Mat4 => 16,
        }
    }

    pub fn is_float_family(self) -> bool {
        matches!(self, Type::Float | Type::Vec(_))
    }

    pub fn is_int_family(self) -> bool {
        matches!(self, Type::Int | Type::IVec(_))
    }

    pub fn is_sampler(self) -> bool {
        matches!(self, Type::Sampler1D | Type::Sampler2D)
    }

    /// Types that can be added, multiplied and compared component-wise.
    pub fn is_arithmetic(self) -> bool {
        self.is_float_family() || self.is_int_family() || self == Type::Mat4
    }

    /// The float counterpart of an int-family type (`ivec3` -> `vec3`).
    pub fn to_float(self) -> Option<Type> {
        match self {
            Type::Int | Type::Float => Some(Type::Float),
            Type::IVec(n) | Type::Vec(n) => Some(Type::Vec(n)),
            _ => None,
        }
    }

    /// `float`/`int` for vectors, identity for scalars.
    pub fn scalar(self) -> Type {
        match self {
            Type::Vec(_) | Type::Mat4 => Type::Float,
            Type::IVec(_) => Type::Int,
            other => other,
        }
    }

    /// Vector of `n` lanes with this scalar type; `n == 1` yields the scalar.
    pub fn with_lanes(self, n: usize) -> Type {
        match (self.scalar(), n) {
            (scalar, 1) => scalar,
            (Type::Float, n) => Type::Vec(n as u8),
            (Type::Int, n) => Type::IVec(n as u8),
            (other, _) => other,
        }
    }

    /// Whether a value of `self` is accepted where `target` is expected,
    /// allowing the implicit int -> float promotion.
    pub fn promotes_to(self, target: Type) -> bool {
        self == target || (self.is_int_family() && self.to_float() == Some(target))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Bool => f.write_str("bool"),
            Type::Int => f.write_str("int"),
            Type::Float => f.write_str("float"),
            Type::Vec(n) => write!(f, "vec{n}"),
            Type::IVec(n) => write!(f, "ivec{n}"),
            Type::Mat4 => f.write_str("mat4"),
            Type::Sampler1D => f.write_str("sampler1D"),
            Type::Sampler2D => f.write_str("sampler2D"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_only_widens_int_to_float() {
        assert!(Type::Int.promotes_to(Type::Float));
        assert!(Type::IVec(3).promotes_to(Type::Vec(3)));
        assert!(!Type::IVec(3).promotes_to(Type::Vec(4)));
        assert!(!Type::Float.promotes_to(Type::Int));
    }

    #[test]
    fn lanes() {
        assert_eq!(Type::Float.with_lanes(3), Type::Vec(3));
        assert_eq!(Type::IVec(4).with_lanes(1), Type::Int);
        assert_eq!(Type::Mat4.components(), 16);
    }
}
