//! Tracing setup for binaries embedding the engine.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber from `RUST_LOG`.
///
/// Falls back to `info` when the variable is unset. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing() {
    init_tracing_with_filter("info");
}

/// Initializes the global tracing subscriber with an explicit default
/// filter directive, still overridable through `RUST_LOG`.
pub fn init_tracing_with_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
