//! # ThawGun Telemetry
//!
//! Logging setup and controller metrics.

pub mod logging;
pub mod metrics;

pub use logging::init as init_logging;
pub use metrics::{MetricsError, MetricsRecorder};
