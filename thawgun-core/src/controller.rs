//! # Advance Controller
//!
//! [`ThawGun`] installs a [`VirtualClock`] into a [`Scheduler`] and moves
//! it forward on request, one deadline at a time:
//!
//! ```text
//! Draining ──▶ AwaitingDeadline ──▶ Jumping ──▶ Draining ──▶ ...
//!                     │
//!                     └──▶ Settling (jump to target, drain once more)
//! ```
//!
//! Outside an advance both clocks run in their own mode. Inside one they are
//! frozen and only move when the controller moves them, the wall clock by
//! `tick_by` so freezer listeners see every step.

use std::cell::Cell;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, instrument, trace, warn};

use thawgun_config::ThawConfig;
use thawgun_telemetry::MetricsRecorder;

use crate::clock::{ClockMode, VirtualClock};
use crate::drain::drain;
use crate::error::ThawError;
use crate::scheduler::{panic_message, ScheduledHandle, Scheduler};
use crate::time::{SharedTimeSource, TimeSource};
use crate::wall::{ns_delta, shift, WallClock, WallClockAnchor, WallClockFreezer};

/// Wall-clock outcome of one [`ThawGun::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// Wall time when the call started.
    pub start: DateTime<Utc>,
    /// Wall time at the target virtual time, read from the freezer once the
    /// window has settled.
    pub end: DateTime<Utc>,
    /// Wall time of the last deadline executed inside the window.
    pub last_fired: Option<DateTime<Utc>>,
}

impl From<Advance> for (DateTime<Utc>, DateTime<Utc>) {
    fn from(advance: Advance) -> Self {
        (advance.start, advance.end)
    }
}

enum Phase<H> {
    Draining,
    AwaitingDeadline,
    Jumping(H),
    Settling,
}

impl<H> Phase<H> {
    fn name(&self) -> &'static str {
        match self {
            Phase::Draining => "draining",
            Phase::AwaitingDeadline => "awaiting_deadline",
            Phase::Jumping(_) => "jumping",
            Phase::Settling => "settling",
        }
    }
}

/// Time-travel controller bound to one scheduler and one wall-clock freezer.
pub struct ThawGun<S: Scheduler, W: WallClock + WallClockFreezer> {
    scheduler: S,
    wall: Arc<W>,
    pub(crate) clock: Arc<VirtualClock>,
    original_source: SharedTimeSource,
    anchor: Cell<Option<WallClockAnchor>>,
    max_quanta: u32,
    metrics: Option<MetricsRecorder>,
    advancing: Cell<bool>,
    torn_down: Cell<bool>,
    pub(crate) pause_depth: Cell<u32>,
    pub(crate) paused_from: Cell<ClockMode>,
    /// The last pause guard went away mid-advance; the advance resumes on exit.
    pub(crate) resume_pending: Cell<bool>,
}

impl<S: Scheduler, W: WallClock + WallClockFreezer> ThawGun<S, W> {
    /// Installs a controller with the default configuration.
    pub fn new(scheduler: S, wall: Arc<W>) -> Result<Self, ThawError> {
        Self::with_config(scheduler, wall, &ThawConfig::default())
    }

    /// Installs a virtual clock into `scheduler`.
    ///
    /// The clock starts out reading exactly what the scheduler's own time
    /// source reads. The wall-clock freezer is only started here when the
    /// configuration pins a wall-clock value or asks for a frozen start;
    /// otherwise the first advance, pause or `set_wall_clock` starts it.
    pub fn with_config(
        scheduler: S,
        wall: Arc<W>,
        config: &ThawConfig,
    ) -> Result<Self, ThawError> {
        let metrics = if config.telemetry.metrics {
            Some(MetricsRecorder::new()?)
        } else {
            None
        };

        let clock = Arc::new(VirtualClock::new(scheduler.time_source()));
        let mode = ClockMode::from(config.clock.start_mode);
        let now_ns = clock.switch_mode(mode);
        let installed: SharedTimeSource = Arc::clone(&clock) as SharedTimeSource;
        let original_source = scheduler.rebind_time_source(installed);

        let pinned = match config.clock.initial_wall_clock {
            Some(at) => Some(at),
            None if !mode.is_ticking() => Some(wall.now()),
            None => None,
        };
        let anchor = pinned.map(|at| {
            wall.start(at, mode.is_ticking());
            WallClockAnchor::new(at, now_ns)
        });

        debug!(
            %mode,
            now_ns,
            max_quanta = config.drain.max_quanta,
            wall_pinned = anchor.is_some(),
            "virtual clock installed"
        );

        Ok(Self {
            scheduler,
            wall,
            clock,
            original_source,
            anchor: Cell::new(anchor),
            max_quanta: config.drain.max_quanta,
            metrics,
            advancing: Cell::new(false),
            torn_down: Cell::new(false),
            pause_depth: Cell::new(0),
            paused_from: Cell::new(mode),
            resume_pending: Cell::new(false),
        })
    }

    /// Moves virtual and wall time forward by `offset`, firing every delayed
    /// callback due inside the window in due-time order.
    ///
    /// Clock mode and both clocks are restored on every exit path, including
    /// a callback panic and the returned future being dropped mid-way. After
    /// a failure the clocks read exactly what they would after a successful
    /// advance to the same target.
    ///
    /// # Errors
    ///
    /// - [`ThawError::InvalidArgument`] for a negative or overflowing offset,
    ///   before any state is touched.
    /// - [`ThawError::CallbackFailure`] when a callback in the window panics.
    /// - [`ThawError::TeardownMisuse`] after [`ThawGun::teardown`].
    /// - [`ThawError::AdvanceInProgress`] when another advance is running.
    /// - [`ThawError::DrainLivelock`] when runnable work never runs out.
    #[instrument(level = "debug", skip_all, fields(offset = %offset))]
    pub async fn advance(&self, offset: TimeDelta) -> Result<Advance, ThawError> {
        self.ensure_live("advance")?;
        if self.advancing.get() {
            return Err(ThawError::AdvanceInProgress);
        }
        let offset_ns = offset_ns(offset)?;

        // Failures queued before this call belong to nobody's advance.
        while let Some(stale) = self.scheduler.take_callback_failure() {
            warn!(
                due_ns = stale.due_ns,
                message = %stale.message,
                "discarding callback failure raised before the advance"
            );
        }

        let prior = self.clock.mode();
        let base_ns = self.clock.switch_mode(ClockMode::Frozen);
        let start = self.wall.now();
        self.wall.start(start, false);
        self.anchor.set(Some(WallClockAnchor::new(start, base_ns)));
        let target_ns = base_ns.saturating_add(offset_ns);

        self.advancing.set(true);
        let _restore = Restore {
            gun: self,
            prior,
            target_ns,
        };

        let mut current_ns = base_ns;
        let mut last_fired = None;
        let mut phase = Phase::Draining;
        loop {
            trace!(phase = phase.name(), current_ns, target_ns, "advance step");
            phase = match phase {
                Phase::Draining => {
                    self.settle(current_ns).await?;
                    Phase::AwaitingDeadline
                }
                Phase::AwaitingDeadline => match self.scheduler.next_scheduled() {
                    Some(handle) if handle.due_ns() <= target_ns => Phase::Jumping(handle),
                    _ => Phase::Settling,
                },
                Phase::Jumping(handle) => {
                    let due_ns = handle.due_ns().max(current_ns);
                    self.jump(current_ns, due_ns);
                    current_ns = due_ns;
                    if self.fire(&handle)? {
                        last_fired = Some(self.wall.now());
                    }
                    Phase::Draining
                }
                Phase::Settling => {
                    self.jump(current_ns, target_ns);
                    self.settle(target_ns).await?;
                    break;
                }
            };
        }

        self.record(|m| m.record_advance(target_ns - base_ns));
        let end = self.wall.now();
        debug!(%start, %end, base_ns, target_ns, "advance complete");

        Ok(Advance {
            start,
            end,
            last_fired,
        })
    }

    /// Re-pins the wall clock at `to`, keeping the current mode. The
    /// scheduler's clock does not move.
    pub fn set_wall_clock(&self, to: DateTime<Utc>) -> Result<(), ThawError> {
        self.ensure_live("set_wall_clock")?;
        let ticking = self.clock.mode().is_ticking();
        if self.wall.is_started() {
            self.wall.move_to(to);
        } else {
            self.wall.start(to, ticking);
        }
        self.anchor.set(Some(WallClockAnchor::new(to, self.clock.now_ns())));
        debug!(%to, ticking, "wall clock moved");
        Ok(())
    }

    /// Puts the scheduler's original time source back and releases the wall
    /// clock. Must happen exactly once; dropping the controller does it
    /// implicitly.
    #[instrument(level = "debug", skip(self))]
    pub fn teardown(&self) -> Result<(), ThawError> {
        if self.torn_down.get() {
            return Err(ThawError::TeardownMisuse {
                operation: "teardown",
            });
        }
        if self.advancing.get() {
            return Err(ThawError::AdvanceInProgress);
        }
        self.torn_down.set(true);
        self.scheduler
            .rebind_time_source(Arc::clone(&self.original_source));
        if self.wall.is_started() {
            self.wall.stop();
        }
        self.anchor.set(None);
        debug!("original time source restored");
        Ok(())
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.get()
    }

    pub fn is_advancing(&self) -> bool {
        self.advancing.get()
    }

    /// Current mode of the virtual clock. Always frozen during an advance.
    pub fn mode(&self) -> ClockMode {
        self.clock.mode()
    }

    /// Virtual time as the scheduler sees it.
    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Wall time as code under test sees it.
    pub fn wall_now(&self) -> DateTime<Utc> {
        self.wall.now()
    }

    /// Last wall/virtual pairing, refreshed by every advance, pause and
    /// wall-clock move.
    pub fn anchor(&self) -> Option<WallClockAnchor> {
        self.anchor.get()
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn wall_clock(&self) -> &Arc<W> {
        &self.wall
    }

    pub fn virtual_clock(&self) -> &Arc<VirtualClock> {
        &self.clock
    }

    pub fn metrics(&self) -> Option<&MetricsRecorder> {
        self.metrics.as_ref()
    }

    pub(crate) fn ensure_live(&self, operation: &'static str) -> Result<(), ThawError> {
        if self.torn_down.get() {
            Err(ThawError::TeardownMisuse { operation })
        } else {
            Ok(())
        }
    }

    /// Restarts the freezer at the current wall reading, pairing it with `now_ns`.
    pub(crate) fn repin_wall(&self, ticking: bool, now_ns: u64) {
        let at = self.wall.now();
        self.wall.start(at, ticking);
        self.anchor.set(Some(WallClockAnchor::new(at, now_ns)));
    }

    async fn settle(&self, bound_ns: u64) -> Result<(), ThawError> {
        let quanta = drain(&self.scheduler, bound_ns, self.max_quanta).await?;
        self.record(|m| m.record_drain(quanta));
        Ok(())
    }

    fn jump(&self, from_ns: u64, to_ns: u64) {
        self.wall.tick_by(ns_delta(to_ns - from_ns));
        self.clock.freeze_at(to_ns);
    }

    /// Runs `handle` unless it was cancelled, then neutralizes it either way.
    /// Returns whether a callback ran.
    fn fire(&self, handle: &S::Handle) -> Result<bool, ThawError> {
        let due_ns = handle.due_ns();
        if handle.is_cancelled() {
            trace!(id = handle.id(), due_ns, "skipping cancelled deadline");
            handle.neutralize();
            self.record(|m| m.cancelled_skipped.inc());
            return Ok(false);
        }

        trace!(id = handle.id(), due_ns, "firing deadline");
        let outcome = catch_unwind(AssertUnwindSafe(|| handle.run()));
        handle.neutralize();
        match outcome {
            Ok(()) => {
                self.record(|m| m.deadlines_fired.inc());
                Ok(true)
            }
            Err(payload) => Err(ThawError::CallbackFailure {
                due_ns,
                message: panic_message(payload.as_ref()),
            }),
        }
    }

    fn record(&self, f: impl FnOnce(&MetricsRecorder)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}

fn offset_ns(offset: TimeDelta) -> Result<u64, ThawError> {
    if offset < TimeDelta::zero() {
        return Err(ThawError::InvalidArgument {
            reason: format!("cannot advance by a negative offset ({offset})"),
        });
    }
    offset
        .num_nanoseconds()
        .and_then(|ns| u64::try_from(ns).ok())
        .ok_or_else(|| ThawError::InvalidArgument {
            reason: format!("offset {offset} does not fit in nanoseconds"),
        })
}

/// Puts both clocks at the advance target under the saved mode, or under
/// the pre-pause mode when the last pause guard was released mid-advance.
///
/// The wall clock lands at its current reading plus whatever virtual time
/// is still missing to the target, so a wall-clock move made inside the
/// window survives.
struct Restore<'a, S: Scheduler, W: WallClock + WallClockFreezer> {
    gun: &'a ThawGun<S, W>,
    prior: ClockMode,
    target_ns: u64,
}

impl<S: Scheduler, W: WallClock + WallClockFreezer> Drop for Restore<'_, S, W> {
    fn drop(&mut self) {
        let gun = self.gun;
        let remaining_ns = self.target_ns.saturating_sub(gun.clock.now_ns());
        let end = shift(gun.wall.now(), ns_delta(remaining_ns));

        let mode = if gun.resume_pending.replace(false) {
            gun.paused_from.get()
        } else {
            self.prior
        };
        gun.clock.set_mode(mode, self.target_ns);
        gun.wall.start(end, mode.is_ticking());
        gun.anchor
            .set(Some(WallClockAnchor::new(end, self.target_ns)));
        gun.advancing.set(false);
        trace!(%mode, target_ns = self.target_ns, "clocks restored");
    }
}

impl<S: Scheduler, W: WallClock + WallClockFreezer> Drop for ThawGun<S, W> {
    fn drop(&mut self) {
        if self.torn_down.get() {
            return;
        }
        if let Err(err) = self.teardown() {
            warn!(%err, "implicit teardown failed");
        }
    }
}

impl<S: Scheduler, W: WallClock + WallClockFreezer> fmt::Debug for ThawGun<S, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThawGun")
            .field("clock", &self.clock)
            .field("anchor", &self.anchor.get())
            .field("advancing", &self.advancing.get())
            .field("pause_depth", &self.pause_depth.get())
            .field("torn_down", &self.torn_down.get())
            .finish()
    }
}
