// Logging setup
use tracing_subscriber::EnvFilter;

/// Directive source checked before `RUST_LOG`.
pub const LOG_ENV: &str = "FRAKTAL_LOG";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install a global fmt subscriber. Returns `false` if one was already set,
/// which is harmless when several engines or tests race to initialize.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true)
        .try_init()
        .is_ok()
}
