// Kernel Compiler
use std::collections::HashMap;

use tracing::info;

use super::handle::Handle;
use super::link::Fragment;
use crate::error::{Error, Result};
use crate::lang::{self, Diagnostic, Program, Type};

pub type KernelHandle = Handle<Kernel>;

/// A uniform's slot in the binding table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamInfo {
    pub name: String,
    pub ty: Type,
    pub byte_offset: usize,
}

/// std140-style (size, alignment) of a parameter in the binding table.
fn layout(ty: Type) -> (usize, usize) {
    match ty {
        Type::Vec(2) | Type::IVec(2) => (8, 8),
        Type::Vec(_) | Type::IVec(_) => (16, 16),
        Type::Mat4 => (64, 16),
        _ => (4, 4),
    }
}

/// A compiled program plus its parameter table, fixed at compile time.
#[derive(Debug)]
pub struct Kernel {
    program: Program,
    params: Vec<ParamInfo>,
    by_name: HashMap<String, usize>,
    table_bytes: usize,
}

impl Kernel {
    fn new(program: Program) -> Self {
        let mut params = Vec::with_capacity(program.uniforms.len());
        let mut by_name = HashMap::new();
        let mut cursor: usize = 0;
        for uniform in &program.uniforms {
            let (size, align) = layout(uniform.ty);
            cursor = cursor.next_multiple_of(align);
            by_name.insert(uniform.name.clone(), params.len());
            params.push(ParamInfo {
                name: uniform.name.clone(),
                ty: uniform.ty,
                byte_offset: cursor,
            });
            cursor += size;
        }
        Self {
            program,
            params,
            by_name,
            table_bytes: cursor.next_multiple_of(16),
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Parameters in declaration order.
    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn table_bytes(&self) -> usize {
        self.table_bytes
    }
}

/// Compile fragments, in link order, as one translation unit.
/// `max_depth` bounds expression height and statement nesting.
pub fn compile(fragments: &[Fragment], max_depth: usize) -> Result<Kernel> {
    let mut sources = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let text = std::str::from_utf8(&fragment.source).map_err(|e| {
            Error::Compile(Diagnostic {
                fragment: fragment.name.clone(),
                line: 0,
                column: 0,
                message: format!("source is not valid UTF-8: {e}"),
            })
        })?;
        sources.push(lang::Fragment {
            name: &fragment.name,
            source: text,
        });
    }
    let program = lang::compile(&sources, max_depth).map_err(Error::Compile)?;
    let kernel = Kernel::new(program);
    info!(
        fragments = fragments.len(),
        params = kernel.params.len(),
        table_bytes = kernel.table_bytes,
        "kernel compiled"
    );
    Ok(kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::DEFAULT_MAX_DEPTH;

    fn fragment(name: &str, source: &str) -> Fragment {
        Fragment {
            name: name.into(),
            source: source.as_bytes().to_vec(),
        }
    }

    #[test]
    fn parameter_table_uses_std140_offsets() {
        let kernel = compile(&[fragment(
            "k",
            "uniform float a; uniform vec3 b; uniform vec2 c; uniform mat4 m; uniform int n;\nvoid main() {}",
        )], DEFAULT_MAX_DEPTH)
        .unwrap();
        let offsets: Vec<(&str, usize)> = kernel
            .params()
            .iter()
            .map(|p| (p.name.as_str(), p.byte_offset))
            .collect();
        assert_eq!(offsets, vec![("a", 0), ("b", 16), ("c", 32), ("m", 48), ("n", 112)]);
        assert_eq!(kernel.table_bytes(), 128);
    }

    #[test]
    fn invalid_utf8_is_a_compile_error() {
        let bad = Fragment {
            name: "bin".into(),
            source: vec![0xff, 0xfe],
        };
        let err = compile(&[bad], DEFAULT_MAX_DEPTH).unwrap_err();
        assert!(matches!(err, Error::Compile(ref d) if d.fragment == "bin"));
    }

    #[test]
    fn identical_fragments_compile_identically() {
        let frags = [fragment("k", "uniform vec4 t; out vec4 o; void main() { o = t; }")];
        let a = compile(&frags, DEFAULT_MAX_DEPTH).unwrap();
        let b = compile(&frags, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(a.program(), b.program());
        assert_eq!(a.params(), b.params());
    }
}
