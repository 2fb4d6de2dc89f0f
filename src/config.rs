// Engine configuration
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Limits and sizing for one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total bytes all live arrays may occupy.
    pub max_device_bytes: usize,
    pub max_link_fragments: usize,
    pub max_texture_units: u32,
    /// Iterations any single loop may run within one invocation.
    pub max_loop_iterations: u64,
    /// Tallest expression, and deepest statement nesting, a kernel may use.
    pub max_expression_depth: usize,
    /// Kernel worker threads; 0 means one per core.
    pub worker_threads: usize,
    /// Stack reserved for each worker; compilation and kernel invocations
    /// recurse on it.
    pub worker_stack_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_device_bytes: 1 << 30,
            max_link_fragments: 1024,
            max_texture_units: 4,
            max_loop_iterations: 1 << 20,
            max_expression_depth: crate::lang::DEFAULT_MAX_DEPTH,
            worker_threads: 0,
            worker_stack_bytes: 32 << 20,
        }
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name}={raw} is not a valid value"))),
        _ => Ok(None),
    }
}

impl EngineConfig {
    /// Defaults overridden by `FRAKTAL_MAX_DEVICE_BYTES`,
    /// `FRAKTAL_MAX_LINK_FRAGMENTS`, `FRAKTAL_MAX_TEXTURE_UNITS`,
    /// `FRAKTAL_MAX_LOOP_ITERATIONS`, `FRAKTAL_MAX_EXPRESSION_DEPTH`,
    /// `FRAKTAL_WORKER_THREADS` and `FRAKTAL_WORKER_STACK_BYTES`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_value("FRAKTAL_MAX_DEVICE_BYTES")? {
            config.max_device_bytes = v;
        }
        if let Some(v) = env_value("FRAKTAL_MAX_LINK_FRAGMENTS")? {
            config.max_link_fragments = v;
        }
        if let Some(v) = env_value("FRAKTAL_MAX_TEXTURE_UNITS")? {
            config.max_texture_units = v;
        }
        if let Some(v) = env_value("FRAKTAL_MAX_LOOP_ITERATIONS")? {
            config.max_loop_iterations = v;
        }
        if let Some(v) = env_value("FRAKTAL_MAX_EXPRESSION_DEPTH")? {
            config.max_expression_depth = v;
        }
        if let Some(v) = env_value("FRAKTAL_WORKER_THREADS")? {
            config.worker_threads = v;
        }
        if let Some(v) = env_value("FRAKTAL_WORKER_STACK_BYTES")? {
            config.worker_stack_bytes = v;
        }
        Ok(config)
    }

    /// Parse a JSON object; missing fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_json(r#"{"max_texture_units": 8}"#).expect("parse");
        assert_eq!(config.max_texture_units, 8);
        assert_eq!(config.max_link_fragments, 1024);
    }

    #[test]
    fn depth_and_stack_limits_have_defaults() {
        let config = EngineConfig::from_json(r#"{"max_expression_depth": 32}"#).expect("parse");
        assert_eq!(config.max_expression_depth, 32);
        assert_eq!(config.worker_stack_bytes, EngineConfig::default().worker_stack_bytes);
    }

    #[test]
    fn json_rejects_wrong_types() {
        assert!(EngineConfig::from_json(r#"{"worker_threads": "many"}"#).is_err());
    }

    #[test]
    fn env_overrides_defaults() {
        env::set_var("FRAKTAL_MAX_LOOP_ITERATIONS", "77");
        let config = EngineConfig::from_env();
        env::remove_var("FRAKTAL_MAX_LOOP_ITERATIONS");
        assert_eq!(config.expect("env").max_loop_iterations, 77);
    }
}
