//! The kernel language: a GLSL fragment-shader subset.
//!
//! Fragments are lexed and parsed one at a time, then checked together as a
//! single translation unit in link order.

pub mod ast;
pub mod builtins;
pub mod check;
pub mod interp;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod value;

use std::fmt;

pub use interp::{Interpreter, NoTextures, Textures};
pub use ir::Program;
pub use types::Type;
pub use value::Value;

/// Where and why compilation failed. `line` and `column` are 1-based; both
/// are 0 for errors that belong to the link as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub fragment: String,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}: {}", self.fragment, self.message)
        } else {
            write!(f, "{}:{}:{}: {}", self.fragment, self.line, self.column, self.message)
        }
    }
}

/// One named piece of kernel source.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    pub name: &'a str,
    pub source: &'a str,
}

/// Name used for diagnostics that are not tied to a fragment.
pub const LINK_FRAGMENT: &str = "<link>";

fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let line_start = before.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
    (line, offset - line_start + 1)
}

fn diagnostic(fragment: &Fragment<'_>, offset: usize, message: String) -> Diagnostic {
    let (line, column) = line_column(fragment.source, offset);
    Diagnostic {
        fragment: fragment.name.to_string(),
        line,
        column,
        message,
    }
}

/// Default bound on expression height and statement nesting.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Compile fragments, in order, into one program.
pub fn compile(fragments: &[Fragment<'_>], max_depth: usize) -> Result<Program, Diagnostic> {
    let mut units = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let unit = parser::parse(fragment.source, max_depth)
            .map_err(|e| diagnostic(fragment, e.pos, e.message))?;
        units.push(unit);
    }
    check::check(&units, max_depth).map_err(|e| match e.fragment.and_then(|i| fragments.get(i)) {
        Some(fragment) => diagnostic(fragment, e.pos, e.message),
        None => Diagnostic {
            fragment: LINK_FRAGMENT.to_string(),
            line: 0,
            column: 0,
            message: e.message,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_all(fragments: &[Fragment<'_>]) -> Result<Program, Diagnostic> {
        compile(fragments, DEFAULT_MAX_DEPTH)
    }

    fn fragment<'a>(name: &'a str, source: &'a str) -> Fragment<'a> {
        Fragment { name, source }
    }

    #[test]
    fn line_and_column_are_one_based() {
        assert_eq!(line_column("abc", 0), (1, 1));
        assert_eq!(line_column("ab\ncd", 4), (2, 2));
        assert_eq!(line_column("ab\n", 3), (2, 1));
    }

    #[test]
    fn diagnostic_points_into_failing_fragment() {
        let err = compile_all(&[
            fragment("head.glsl", "uniform float a;\n"),
            fragment("body.glsl", "void main() {\n  float x = 1.0\n}\n"),
        ])
        .unwrap_err();
        assert_eq!(err.fragment, "body.glsl");
        assert_eq!(err.line, 3);
        assert!(err.to_string().starts_with("body.glsl:3:"), "{err}");
    }

    #[test]
    fn missing_entry_point_is_reported_for_the_link() {
        let err = compile_all(&[fragment("a", "uniform float a;")]).unwrap_err();
        assert_eq!(err.fragment, LINK_FRAGMENT);
        assert_eq!(err.line, 0);
    }

    #[test]
    fn compiles_multi_fragment_kernel() {
        let program = compile_all(&[
            fragment("decl", "uniform vec4 tint;\nout vec4 color;\n"),
            fragment("main", "void main() { color = tint; }"),
        ])
        .expect("compile");
        assert_eq!(program.uniforms.len(), 1);
    }

    #[test]
    fn over_tall_expressions_fail_to_compile() {
        let chain = vec!["1.0"; 40].join(" + ");
        let source = format!("out float o;\nvoid main() {{ o = {chain}; }}");
        let err = compile(&[fragment("chain", &source)], 16).unwrap_err();
        assert_eq!(err.fragment, "chain");
        assert_eq!(err.line, 2);
        assert!(err.message.contains("nested too deeply"), "{err}");
        compile(&[fragment("chain", &source)], 64).expect("within limit");
    }
}
