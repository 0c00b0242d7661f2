//! ## thawgun-core::wall
//! **Wall-clock queries and the wall-clock freezer**
//!
//! Code under test reads calendar time through [`WallClock`]. The controller
//! drives a [`WallClockFreezer`] so those reads observe a pinned value that
//! is ticked forward in step with virtual time. [`FakeWallClock`] implements
//! both sides.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::trace;

use crate::time::SharedTimeSource;

/// Source of "current calendar time".
pub trait WallClock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    #[inline]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Control surface for pinning wall-clock time.
pub trait WallClockFreezer: Send + Sync {
    /// Pins wall time at `at`; with `ticking` it then advances with real time.
    fn start(&self, at: DateTime<Utc>, ticking: bool);

    /// Releases the pin; reads return real wall time again.
    fn stop(&self);

    /// Moves the pinned value forward by `delta`.
    fn tick_by(&self, delta: TimeDelta);

    /// Re-pins the wall clock at `to`, keeping the current ticking flag.
    fn move_to(&self, to: DateTime<Utc>);

    fn is_started(&self) -> bool;
}

/// Converts a nanosecond count into a `TimeDelta`, saturating.
#[inline]
pub fn ns_delta(ns: u64) -> TimeDelta {
    TimeDelta::nanoseconds(i64::try_from(ns).unwrap_or(i64::MAX))
}

pub(crate) fn shift(at: DateTime<Utc>, delta: TimeDelta) -> DateTime<Utc> {
    at.checked_add_signed(delta).unwrap_or(if delta < TimeDelta::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Pairing of a wall-clock value with the virtual time it was pinned at.
///
/// `wall_at(t) = wall + (t - virtual_ns)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WallClockAnchor {
    pub wall: DateTime<Utc>,
    pub virtual_ns: u64,
}

impl WallClockAnchor {
    pub fn new(wall: DateTime<Utc>, virtual_ns: u64) -> Self {
        Self { wall, virtual_ns }
    }

    /// Wall-clock date corresponding to virtual time `virtual_ns`.
    pub fn wall_at(&self, virtual_ns: u64) -> DateTime<Utc> {
        if virtual_ns >= self.virtual_ns {
            shift(self.wall, ns_delta(virtual_ns - self.virtual_ns))
        } else {
            shift(self.wall, -ns_delta(self.virtual_ns - virtual_ns))
        }
    }
}

type TickListener = Box<dyn Fn(TimeDelta) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Pin {
    at: DateTime<Utc>,
    ticking: bool,
    /// Real monotonic reading when `at` was set.
    since_ns: u64,
}

/// In-process wall-clock freezer.
///
/// While stopped every read is delegated to the real wall clock. While
/// started, reads return the pinned value, plus real monotonic time elapsed
/// since pinning when ticking.
pub struct FakeWallClock {
    real_wall: Arc<dyn WallClock>,
    real_mono: SharedTimeSource,
    pin: Mutex<Option<Pin>>,
    listeners: Mutex<Vec<TickListener>>,
}

impl FakeWallClock {
    pub fn new(real_wall: Arc<dyn WallClock>, real_mono: SharedTimeSource) -> Self {
        Self {
            real_wall,
            real_mono,
            pin: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Freezer over the system wall clock and a fresh monotonic clock.
    pub fn system() -> Self {
        Self::new(
            Arc::new(SystemWallClock),
            Arc::new(crate::time::MonotonicClock::new()),
        )
    }

    /// Registers a callback invoked with every `tick_by` delta.
    pub fn on_tick(&self, listener: impl Fn(TimeDelta) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    pub fn is_ticking(&self) -> bool {
        self.pin.lock().is_some_and(|pin| pin.ticking)
    }

    fn read(&self, pin: &Pin) -> DateTime<Utc> {
        if pin.ticking {
            let elapsed = self.real_mono.now_ns().saturating_sub(pin.since_ns);
            shift(pin.at, ns_delta(elapsed))
        } else {
            pin.at
        }
    }
}

impl WallClock for FakeWallClock {
    fn now(&self) -> DateTime<Utc> {
        match *self.pin.lock() {
            Some(ref pin) => self.read(pin),
            None => self.real_wall.now(),
        }
    }
}

impl WallClockFreezer for FakeWallClock {
    fn start(&self, at: DateTime<Utc>, ticking: bool) {
        trace!(%at, ticking, "wall clock pinned");
        *self.pin.lock() = Some(Pin {
            at,
            ticking,
            since_ns: self.real_mono.now_ns(),
        });
    }

    fn stop(&self) {
        trace!("wall clock released");
        *self.pin.lock() = None;
    }

    fn tick_by(&self, delta: TimeDelta) {
        {
            let mut pin = self.pin.lock();
            let Some(pin) = pin.as_mut() else {
                trace!(?delta, "tick ignored, wall clock not started");
                return;
            };
            pin.at = shift(pin.at, delta);
        }
        for listener in self.listeners.lock().iter() {
            listener(delta);
        }
    }

    fn move_to(&self, to: DateTime<Utc>) {
        let mut pin = self.pin.lock();
        if let Some(pin) = pin.as_mut() {
            pin.at = to;
            pin.since_ns = self.real_mono.now_ns();
        }
    }

    fn is_started(&self) -> bool {
        self.pin.lock().is_some()
    }
}

impl fmt::Debug for FakeWallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeWallClock")
            .field("pin", &*self.pin.lock())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct FixedWall(DateTime<Utc>);

    impl WallClock for FixedWall {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 5, 1, 12, 0, 0).unwrap()
    }

    fn fake() -> (ManualClock, FakeWallClock) {
        let mono = ManualClock::new(0);
        let wall = FakeWallClock::new(Arc::new(FixedWall(epoch())), Arc::new(mono.clone()));
        (mono, wall)
    }

    #[test]
    fn stopped_clock_reports_real_wall_time() {
        let (_mono, wall) = fake();
        assert!(!wall.is_started());
        assert_eq!(wall.now(), epoch());
    }

    #[test]
    fn frozen_pin_does_not_move() {
        let (mono, wall) = fake();
        let at = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        wall.start(at, false);
        mono.advance(Duration::from_secs(30));
        assert_eq!(wall.now(), at);
    }

    #[test]
    fn ticking_pin_follows_real_time() {
        let (mono, wall) = fake();
        wall.start(epoch(), true);
        mono.advance(Duration::from_millis(1_500));
        assert_eq!(wall.now(), epoch() + TimeDelta::milliseconds(1_500));
    }

    #[test]
    fn tick_by_moves_pin_and_notifies() {
        let (_mono, wall) = fake();
        let seen = Arc::new(AtomicI64::new(0));
        let sink = Arc::clone(&seen);
        wall.on_tick(move |delta| {
            sink.fetch_add(delta.num_milliseconds(), Ordering::SeqCst);
        });

        wall.start(epoch(), false);
        wall.tick_by(TimeDelta::seconds(2));
        wall.tick_by(TimeDelta::milliseconds(250));
        assert_eq!(wall.now(), epoch() + TimeDelta::milliseconds(2_250));
        assert_eq!(seen.load(Ordering::SeqCst), 2_250);
    }

    #[test]
    fn tick_while_stopped_is_ignored() {
        let (_mono, wall) = fake();
        wall.tick_by(TimeDelta::seconds(5));
        assert_eq!(wall.now(), epoch());
    }

    #[test]
    fn move_to_resets_ticking_base() {
        let (mono, wall) = fake();
        wall.start(epoch(), true);
        mono.advance(Duration::from_secs(10));
        let target = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        wall.move_to(target);
        assert_eq!(wall.now(), target);
        mono.advance(Duration::from_secs(1));
        assert_eq!(wall.now(), target + TimeDelta::seconds(1));
    }

    #[test]
    fn anchor_maps_virtual_time_both_ways() {
        let anchor = WallClockAnchor::new(epoch(), 5_000_000_000);
        assert_eq!(anchor.wall_at(5_000_000_000), epoch());
        assert_eq!(anchor.wall_at(7_000_000_000), epoch() + TimeDelta::seconds(2));
        assert_eq!(anchor.wall_at(4_000_000_000), epoch() - TimeDelta::seconds(1));
    }
}
