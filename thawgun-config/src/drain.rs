//! Drain loop limits.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Bounds applied to a single drain.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct DrainConfig {
    /// Scheduling quanta one drain may spend before it is declared a livelock.
    #[validate(range(min = 1, max = 10_000_000))]
    #[serde(default = "default_max_quanta")]
    pub max_quanta: u32,
}

fn default_max_quanta() -> u32 {
    100_000
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            max_quanta: default_max_quanta(),
        }
    }
}
