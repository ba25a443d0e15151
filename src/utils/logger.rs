//! Tracing setup for binaries and tests embedding this crate.
//!
//! Translates the teacher's `env_logger::Builder::from_default_env` pattern to
//! `tracing_subscriber`'s `EnvFilter`: async call sites are better served by span-structured
//! tracing than by line-based logging.

use tracing_subscriber::EnvFilter;

/// Initialize a global `tracing` subscriber. `verbose` sets this crate's own default level to
/// `debug`; dependencies stay at `warn` unless overridden via `RUST_LOG`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{}={default_level}", env!("CARGO_PKG_NAME"))));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
