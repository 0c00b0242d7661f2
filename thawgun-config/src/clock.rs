//! Clock configuration.
//!
//! Controls how the virtual clock and the fake wall clock look when a
//! controller is first installed on a runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Mode the virtual clock starts in.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    /// Observed time follows real elapsed time.
    #[default]
    Ticking,
    /// Observed time is pinned until advanced.
    Frozen,
}

/// Clock setup parameters.
#[derive(Default, Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ClockConfig {
    #[serde(default)]
    pub start_mode: StartMode,

    /// Wall-clock value pinned at setup. Real wall time is used when absent.
    #[serde(default)]
    pub initial_wall_clock: Option<DateTime<Utc>>,
}
