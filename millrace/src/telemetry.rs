//! Tracing bootstrap for binaries and integration tests.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber: env-filtered fmt output, defaulting to
/// `info` for the pipeline crates. Calling twice is harmless.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,millrace=debug,millstone=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
