//! ## thawgun-core::time
//! **Monotonic time sources**
//!
//! Every scheduler operation that needs "now" asks a [`TimeSource`]. Sources
//! are injected, never global: the scheduler holds one, the controller swaps
//! it for a [`crate::VirtualClock`] and puts the original back at teardown.
//!
//! Time is a `u64` count of nanoseconds since an arbitrary origin. Only
//! differences between two readings of the same source are meaningful.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A monotonic clock reading in nanoseconds.
pub trait TimeSource: Send + Sync + fmt::Debug {
    fn now_ns(&self) -> u64;
}

/// Shared handle to a time source, as held by schedulers.
pub type SharedTimeSource = Arc<dyn TimeSource>;

/// Converts a duration to nanoseconds, saturating at `u64::MAX`.
#[inline]
pub fn duration_to_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Real monotonic time, measured from the moment the clock was created.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        duration_to_ns(self.origin.elapsed())
    }
}

/// A clock that only moves when told to.
///
/// Stands in for real time in tests: "real" seconds pass exactly when the
/// test says so. Clones share the same counter.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock starting at `start_ns`.
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ns)),
        }
    }

    /// Moves the clock forward by `duration`.
    #[inline]
    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration_to_ns(duration), Ordering::Release);
    }
}

impl TimeSource for ManualClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_initial_value() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_ns(), 100);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(0);
        let other = clock.clone();
        clock.advance(Duration::from_nanos(500));
        other.advance(Duration::from_nanos(250));
        assert_eq!(clock.now_ns(), 750);
        assert_eq!(other.now_ns(), 750);
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let first = clock.now_ns();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now_ns() >= first + 1_000_000);
    }

    #[test]
    fn duration_conversion_saturates() {
        assert_eq!(duration_to_ns(Duration::from_secs(1)), 1_000_000_000);
        assert_eq!(duration_to_ns(Duration::MAX), u64::MAX);
    }
}
