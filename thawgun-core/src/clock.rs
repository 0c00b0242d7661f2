//! # Virtual Clock
//!
//! The time source installed into the scheduler for the lifetime of a
//! controller. It produces observed time with exactly one of two formulas:
//!
//! ```text
//! Ticking:  now = real_now + offset_ns
//! Frozen:   now = pinned_ns
//! ```
//!
//! Switching modes re-derives the inactive formula's parameters from the
//! value the clock reports at the switch, so a mode switch alone never makes
//! observed time jump. Jumps only happen when the controller passes an
//! explicit, later `at` value.

use std::fmt;

use parking_lot::Mutex;

use crate::time::{SharedTimeSource, TimeSource};

/// Whether observed time follows real elapsed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    Ticking,
    Frozen,
}

impl ClockMode {
    #[inline]
    pub fn is_ticking(self) -> bool {
        matches!(self, ClockMode::Ticking)
    }
}

impl fmt::Display for ClockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockMode::Ticking => f.write_str("ticking"),
            ClockMode::Frozen => f.write_str("frozen"),
        }
    }
}

impl From<thawgun_config::StartMode> for ClockMode {
    fn from(mode: thawgun_config::StartMode) -> Self {
        match mode {
            thawgun_config::StartMode::Ticking => ClockMode::Ticking,
            thawgun_config::StartMode::Frozen => ClockMode::Frozen,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ClockState {
    mode: ClockMode,
    /// Signed delta applied to real time while ticking.
    offset_ns: i64,
    /// Observed time while frozen.
    pinned_ns: u64,
}

/// Offset- or pin-based view of an underlying real clock.
pub struct VirtualClock {
    real: SharedTimeSource,
    state: Mutex<ClockState>,
}

impl VirtualClock {
    /// Creates a ticking clock that initially reports exactly what `real` reports.
    pub fn new(real: SharedTimeSource) -> Self {
        Self {
            real,
            state: Mutex::new(ClockState {
                mode: ClockMode::Ticking,
                offset_ns: 0,
                pinned_ns: 0,
            }),
        }
    }

    pub fn mode(&self) -> ClockMode {
        self.state.lock().mode
    }

    /// Pins observed time at `at_ns`.
    pub fn freeze_at(&self, at_ns: u64) {
        self.set_mode(ClockMode::Frozen, at_ns);
    }

    /// Switches to `mode` so that observed time is exactly `at_ns` at the switch.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `at_ns` is earlier than the current reading.
    pub fn set_mode(&self, mode: ClockMode, at_ns: u64) {
        let mut state = self.state.lock();
        let real_now = self.real.now_ns();
        debug_assert!(
            at_ns >= Self::observe(&state, real_now),
            "time cannot go backwards: current={}, target={}",
            Self::observe(&state, real_now),
            at_ns
        );
        Self::apply(&mut state, mode, at_ns, real_now);
    }

    /// Switches to `mode` at the current reading, without moving time.
    /// Returns the reading the switch happened at.
    pub fn switch_mode(&self, mode: ClockMode) -> u64 {
        let mut state = self.state.lock();
        let real_now = self.real.now_ns();
        let now = Self::observe(&state, real_now);
        Self::apply(&mut state, mode, now, real_now);
        now
    }

    fn apply(state: &mut ClockState, mode: ClockMode, at_ns: u64, real_now: u64) {
        state.mode = mode;
        match mode {
            ClockMode::Frozen => state.pinned_ns = at_ns,
            ClockMode::Ticking => state.offset_ns = signed_delta(at_ns, real_now),
        }
    }

    fn observe(state: &ClockState, real_now: u64) -> u64 {
        match state.mode {
            ClockMode::Frozen => state.pinned_ns,
            ClockMode::Ticking => real_now.saturating_add_signed(state.offset_ns),
        }
    }
}

/// `to - from` as a signed value, clamped to the `i64` range.
fn signed_delta(to: u64, from: u64) -> i64 {
    if to >= from {
        i64::try_from(to - from).unwrap_or(i64::MAX)
    } else {
        i64::try_from(from - to).map_or(i64::MIN, |d| -d)
    }
}

impl TimeSource for VirtualClock {
    #[inline]
    fn now_ns(&self) -> u64 {
        let state = self.state.lock();
        Self::observe(&state, self.real.now_ns())
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.state.lock();
        f.debug_struct("VirtualClock")
            .field("mode", &state.mode)
            .field("offset_ns", &state.offset_ns)
            .field("pinned_ns", &state.pinned_ns)
            .finish()
    }
}
