//! Logging setup.
//!
//! Every crate in the workspace logs through `tracing` macros; binaries
//! call [`init`] once at startup to print those events.

use tracing_subscriber::EnvFilter;

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"info"` or `"peril_pubsub=debug"`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::init;

    #[test]
    fn test_init_twice_does_not_panic() {
        init("debug");
        init("not a [valid directive");
        tracing::info!("telemetry initialised");
    }
}
