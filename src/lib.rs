//! Software GPU-style compute engine: device arrays, kernels linked from
//! named source fragments, and typed parameter dispatch through an explicit
//! execution [`Context`].

pub mod config;
pub mod engine;
pub mod error;
pub mod lang;
pub mod telemetry;

#[cfg(feature = "python")]
mod python;

pub use config::EngineConfig;
pub use engine::compiler::{KernelHandle, ParamInfo};
pub use engine::context::Context;
pub use engine::link::LinkHandle;
pub use engine::memory::{Access, ArrayDesc, ArrayHandle, Filter, Format, HostBuffer, HostData, Wrap};
pub use engine::params::ParamOffset;
pub use engine::Engine;
pub use error::{Error, Result};
pub use lang::{Diagnostic, Type};
