//! ## thawgun-core::pause
//! **Scoped pause of both clocks**
//!
//! While a [`PauseGuard`] is alive the virtual clock and the wall clock are
//! frozen at the values they had when the first guard was taken. Dropping the
//! last guard lets them run again from exactly those values, in the mode they
//! had before the pause. Advances still work through the guard and leave the
//! clocks frozen afterwards. A last guard dropped while an advance is running
//! defers the resume until that advance finishes.

use std::fmt;
use std::ops::Deref;

use tracing::debug;

use crate::clock::ClockMode;
use crate::controller::ThawGun;
use crate::error::ThawError;
use crate::scheduler::Scheduler;
use crate::wall::{WallClock, WallClockFreezer};

/// Keeps both clocks frozen until dropped.
#[must_use = "the clocks resume as soon as the guard is dropped"]
pub struct PauseGuard<'a, S: Scheduler, W: WallClock + WallClockFreezer> {
    gun: &'a ThawGun<S, W>,
}

impl<S: Scheduler, W: WallClock + WallClockFreezer> ThawGun<S, W> {
    /// Freezes both clocks until the returned guard is dropped.
    ///
    /// Guards nest: only the outermost one freezes and resumes.
    pub fn pause(&self) -> Result<PauseGuard<'_, S, W>, ThawError> {
        self.ensure_live("pause")?;
        if self.is_advancing() {
            return Err(ThawError::AdvanceInProgress);
        }

        let depth = self.pause_depth.get();
        if depth == 0 {
            let prior = self.clock.mode();
            let now_ns = self.clock.switch_mode(ClockMode::Frozen);
            self.paused_from.set(prior);
            self.repin_wall(false, now_ns);
            debug!(%prior, now_ns, "clocks paused");
        }
        self.pause_depth.set(depth + 1);
        Ok(PauseGuard { gun: self })
    }

    pub fn is_paused(&self) -> bool {
        self.pause_depth.get() > 0
    }

    fn resume(&self) {
        let depth = self.pause_depth.get().saturating_sub(1);
        self.pause_depth.set(depth);
        if depth > 0 || self.is_torn_down() {
            return;
        }
        if self.is_advancing() {
            self.resume_pending.set(true);
            debug!("pause released during an advance, resuming when it finishes");
            return;
        }

        let mode = self.paused_from.get();
        let now_ns = self.clock.switch_mode(mode);
        self.repin_wall(mode.is_ticking(), now_ns);
        debug!(%mode, now_ns, "clocks resumed");
    }
}

impl<S: Scheduler, W: WallClock + WallClockFreezer> Deref for PauseGuard<'_, S, W> {
    type Target = ThawGun<S, W>;

    fn deref(&self) -> &Self::Target {
        self.gun
    }
}

impl<S: Scheduler, W: WallClock + WallClockFreezer> Drop for PauseGuard<'_, S, W> {
    fn drop(&mut self) {
        self.gun.resume();
    }
}

impl<S: Scheduler, W: WallClock + WallClockFreezer> fmt::Debug for PauseGuard<'_, S, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PauseGuard")
            .field("depth", &self.gun.pause_depth.get())
            .field("resumes_to", &self.gun.paused_from.get())
            .finish()
    }
}
