// Errors
use std::path::PathBuf;

use crate::lang::Diagnostic;

/// Every failure the engine reports. Calls never panic on caller mistakes;
/// they return one of these synchronously.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("cannot read kernel source '{path}': {source}")]
    SourceNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("compile error: {0}")]
    Compile(Diagnostic),

    #[error("kernel has no parameter named '{0}'")]
    UnknownParameter(String),

    #[error("no kernel is in use")]
    NoCurrentKernel,

    #[error("host data has {found} elements, array needs {expected}")]
    DataLength { expected: usize, found: usize },

    #[error("invalid array description: {0}")]
    InvalidArray(String),

    /// Stale or foreign handle (destroyed, or never issued by this engine).
    #[error("invalid or stale {0} handle")]
    InvalidHandle(&'static str),

    #[error("parameter offset belongs to another kernel")]
    ForeignParameter,

    #[error("parameter '{name}' is {expected}, cannot set it as {found}")]
    ParamType {
        name: String,
        expected: String,
        found: String,
    },

    #[error("texture unit {unit} out of range (engine has {units})")]
    TextureUnit { unit: u32, units: u32 },

    #[error("array is read-only")]
    ReadOnlyArray,

    #[error("link was already compiled and cannot take more fragments")]
    LinkSealed,

    #[error("link already holds the maximum of {0} fragments")]
    LinkFull(usize),

    #[error("{value} is not a valid {kind}")]
    InvalidEnum { kind: &'static str, value: i32 },

    #[error("kernel execution failed: {0}")]
    Execution(String),

    #[error("invalid engine configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
