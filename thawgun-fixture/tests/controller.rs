use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::future::join3;
use tracing_test::traced_test;

use thawgun_config::{StartMode, ThawConfig};
use thawgun_core::{ClockMode, ManualClock, ThawError, WallClock};
use thawgun_fixture::{Fixture, TimeDelta};
use thawgun_runtime::Runtime;

const SECOND: u64 = 1_000_000_000;

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

/// Fixture whose "real" clocks never move on their own.
fn still(config: &ThawConfig) -> Fixture {
    Fixture::with_clocks(
        config,
        Arc::new(ManualClock::new(0)),
        Arc::new(FixedWall(epoch())),
    )
    .unwrap()
}

type Log = Rc<RefCell<Vec<&'static str>>>;

fn push(log: &Log, name: &'static str) -> impl FnOnce() + 'static {
    let log = Rc::clone(log);
    move || log.borrow_mut().push(name)
}

#[test]
fn cancelled_callbacks_never_run() {
    let fixture = still(&ThawConfig::default());
    let log = Log::default();
    let seen = Rc::clone(&log);
    fixture
        .run(move |gun, rt| async move {
            let doomed = rt.call_later(Duration::from_secs(5), push(&seen, "cancelled"));
            rt.call_later(Duration::from_secs(6), push(&seen, "kept"));
            doomed.cancel();
            let advance = gun.advance(TimeDelta::seconds(10)).await.unwrap();
            assert_eq!(advance.last_fired, Some(epoch() + TimeDelta::seconds(6)));
        })
        .unwrap();
    assert_eq!(*log.borrow(), vec!["kept"]);
}

#[test]
fn same_deadline_runs_in_scheduling_order() {
    let fixture = still(&ThawConfig::default());
    let log = Log::default();
    let seen = Rc::clone(&log);
    fixture
        .run(move |gun, rt| async move {
            for name in ["a", "b", "c"] {
                rt.call_later(Duration::from_secs(3), push(&seen, name));
            }
            rt.call_later(Duration::from_secs(1), push(&seen, "first"));
            gun.advance(TimeDelta::seconds(3)).await.unwrap();
        })
        .unwrap();
    assert_eq!(*log.borrow(), vec!["first", "a", "b", "c"]);
}

#[test]
fn callbacks_scheduled_by_callbacks_fire_in_the_same_advance() {
    let fixture = still(&ThawConfig::default());
    let log = Log::default();
    let seen = Rc::clone(&log);
    fixture
        .run(move |gun, rt| async move {
            let inner_rt = rt.clone();
            let inner = push(&seen, "inner");
            let outer_log = Rc::clone(&seen);
            rt.call_later(Duration::from_secs(1), move || {
                outer_log.borrow_mut().push("outer");
                inner_rt.call_later(Duration::from_secs(1), inner);
            });
            rt.call_later(Duration::from_secs(3), push(&seen, "beyond"));

            gun.advance(TimeDelta::seconds(2)).await.unwrap();
            assert_eq!(rt.now_ns(), 2 * SECOND);
        })
        .unwrap();
    assert_eq!(*log.borrow(), vec!["outer", "inner"]);
}

#[test]
fn panicking_callback_still_lands_on_the_target() {
    let fixture = still(&ThawConfig::default());
    fixture
        .run(|gun, rt| async move {
            rt.call_later(Duration::from_secs(2), || panic!("boom"));
            let err = gun.advance(TimeDelta::seconds(5)).await.unwrap_err();
            match err {
                ThawError::CallbackFailure { due_ns, message } => {
                    assert_eq!(due_ns, 2 * SECOND);
                    assert_eq!(message, "boom");
                }
                other => panic!("unexpected error: {other}"),
            }

            assert_eq!(gun.mode(), ClockMode::Ticking);
            assert!(!gun.is_advancing());
            assert_eq!(rt.now_ns(), 5 * SECOND);
            assert_eq!(gun.wall_now(), epoch() + TimeDelta::seconds(5));

            // The controller is still usable afterwards.
            gun.advance(TimeDelta::seconds(1)).await.unwrap();
            assert_eq!(rt.now_ns(), 6 * SECOND);
        })
        .unwrap();
}

#[test]
fn failure_raised_outside_an_advance_is_not_reported_by_the_next() {
    let fixture = still(&ThawConfig::default());
    let log = Log::default();
    let seen = Rc::clone(&log);
    fixture
        .run(move |gun, rt| async move {
            rt.call_soon(|| panic!("early"));
            rt.yield_now().await;
            rt.call_later(Duration::from_secs(1), push(&seen, "fired"));

            let advance = gun.advance(TimeDelta::seconds(5)).await.unwrap();
            assert_eq!(advance.last_fired, Some(epoch() + TimeDelta::seconds(1)));
            assert_eq!(rt.now_ns(), 5 * SECOND);
        })
        .unwrap();
    assert_eq!(*log.borrow(), vec!["fired"]);
}

#[test]
fn wall_clock_moved_inside_the_window_survives() {
    let fixture = still(&ThawConfig::default());
    let elsewhere = Utc.with_ymd_and_hms(2031, 1, 1, 0, 0, 0).unwrap();
    fixture
        .run(move |gun, rt| async move {
            let mover = Rc::clone(&gun);
            rt.call_later(Duration::from_secs(1), move || {
                mover.set_wall_clock(elsewhere).unwrap();
            });

            let advance = gun.advance(TimeDelta::seconds(5)).await.unwrap();
            assert_eq!(advance.end, elsewhere + TimeDelta::seconds(4));
            assert_eq!(gun.wall_now(), elsewhere + TimeDelta::seconds(4));
            assert_eq!(rt.now_ns(), 5 * SECOND);
        })
        .unwrap();
}

#[test]
fn frozen_start_pins_the_configured_wall_clock() {
    let mut config = ThawConfig::default();
    config.clock.start_mode = StartMode::Frozen;
    config.clock.initial_wall_clock = Some(Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());

    let fixture = Fixture::from_config(&config).unwrap();
    fixture
        .run(|gun, _rt| async move {
            let pinned = gun.wall_now();
            assert_eq!(pinned, Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
            std::thread::sleep(Duration::from_millis(5));
            assert_eq!(gun.wall_now(), pinned);

            let advance = gun.advance(TimeDelta::minutes(1)).await.unwrap();
            assert_eq!(advance.start, pinned);
            assert_eq!(gun.wall_now(), pinned + TimeDelta::minutes(1));
            assert_eq!(gun.mode(), ClockMode::Frozen);
        })
        .unwrap();
}

#[test]
fn teardown_hands_the_real_clock_back() {
    let fixture = Fixture::new().unwrap();
    let rt = fixture.runtime().clone();
    fixture
        .run(|gun, _rt| async move {
            gun.advance(TimeDelta::days(365)).await.unwrap();
        })
        .unwrap();
    assert!(Duration::from_nanos(rt.now_ns()) < Duration::from_secs(86_400));
    let gap = fixture.wall_clock().now() - Utc::now();
    assert!(gap.abs() < TimeDelta::seconds(60));
}

#[test]
fn metrics_count_advances_and_deadlines() {
    let fixture = still(&ThawConfig::default());
    let text = fixture
        .run(|gun, rt| async move {
            rt.call_later(Duration::from_secs(1), || {});
            rt.call_later(Duration::from_secs(2), || {});
            gun.advance(TimeDelta::seconds(2)).await.unwrap();
            gun.advance(TimeDelta::seconds(1)).await.unwrap();
            gun.metrics().unwrap().gather_metrics().unwrap()
        })
        .unwrap();
    assert!(text.contains("thawgun_advances_total 2"));
    assert!(text.contains("thawgun_deadlines_fired_total 2"));
    assert!(text.contains(&format!("thawgun_virtual_advanced_ns_total {}", 3 * SECOND)));
}

async fn counters(rt: Runtime) -> (u32, u32, u32) {
    async fn count(rt: Runtime, n: u32) -> u32 {
        for _ in 0..n {
            rt.sleep(Duration::from_secs(1)).await;
            rt.yield_now().await;
        }
        n
    }
    join3(count(rt.clone(), 4), count(rt.clone(), 2), count(rt, 7)).await
}

#[test]
fn identical_scenarios_execute_identically() {
    fn scenario() -> (String, (u32, u32, u32)) {
        let fixture = still(&ThawConfig::default());
        fixture
            .run(|gun, rt| async move {
                let task = rt.spawn(counters(rt.clone()));
                gun.advance(TimeDelta::seconds(10)).await.unwrap();
                let output = task.await.unwrap();
                (rt.audit_hash(), output)
            })
            .unwrap()
    }

    let (first_hash, first) = scenario();
    let (second_hash, second) = scenario();
    assert_eq!(first, (4, 2, 7));
    assert_eq!(first, second);
    assert_eq!(first_hash, second_hash);
}

#[test]
#[traced_test]
fn advance_reports_its_lifecycle() {
    let fixture = still(&ThawConfig::default());
    fixture
        .run(|gun, rt| async move {
            rt.call_later(Duration::from_secs(1), || {});
            gun.advance(TimeDelta::seconds(1)).await.unwrap();
        })
        .unwrap();
    assert!(logs_contain("virtual clock installed"));
    assert!(logs_contain("advance complete"));
    assert!(logs_contain("original time source restored"));
}
