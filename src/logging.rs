//! Structured logging, carried as ambient stack regardless of the core's
//! narrow functional scope (§1 Non-goals bind features, not observability).

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a stderr subscriber driven by `RUST_LOG`, defaulting to `info`
/// with `quantlm=debug`.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info").add_directive("quantlm=debug".parse().unwrap())
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Install a test-writer subscriber; safe to call from multiple tests.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
