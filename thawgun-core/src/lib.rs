//! # thawgun-core
//!
//! Deterministic time travel for cooperatively scheduled async code.
//!
//! A [`ThawGun`] swaps a scheduler's time source for a [`VirtualClock`] and
//! keeps a fake wall clock in lock-step with it. `advance` moves both forward
//! deadline by deadline, draining the scheduler in between, so sleeps,
//! timeouts and retries fire in order without any real waiting.
//!
//! ### Key Submodules:
//! - `clock`: virtual clock and its ticking/frozen modes
//! - `wall`: wall-clock queries, the freezer contract and `FakeWallClock`
//! - `scheduler`: what a scheduler must expose to be driven
//! - `drain`: runs the scheduler to a fixed point without moving time
//! - `controller`: the advance state machine
//! - `pause`: scoped freeze of both clocks

pub mod clock;
pub mod controller;
pub mod drain;
pub mod error;
pub mod pause;
pub mod scheduler;
pub mod time;
pub mod wall;

#[cfg(test)]
mod testing;

pub mod prelude {
    pub use crate::clock::*;
    pub use crate::controller::*;
    pub use crate::error::*;
    pub use crate::pause::*;
    pub use crate::scheduler::*;
    pub use crate::time::*;
    pub use crate::wall::*;
}

pub use chrono;
pub use clock::{ClockMode, VirtualClock};
pub use controller::{Advance, ThawGun};
pub use error::ThawError;
pub use pause::PauseGuard;
pub use scheduler::{CallbackPanic, ScheduledHandle, Scheduler};
pub use time::{ManualClock, MonotonicClock, SharedTimeSource, TimeSource};
pub use wall::{FakeWallClock, SystemWallClock, WallClock, WallClockAnchor, WallClockFreezer};
