//! ## thawgun-telemetry::logging
//! **Structured logging with `tracing`**
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! level. Installation is idempotent: test binaries call it from every test.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global fmt subscriber.
///
/// Returns `false` when a subscriber was already installed.
pub fn init(default_level: &str) -> bool {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_test_writer()
        .try_init()
        .is_ok()
}
