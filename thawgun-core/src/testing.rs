//! Minimal scheduler used by the controller and pause unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::scheduler::{CallbackPanic, ScheduledHandle, Scheduler};
use crate::time::{ManualClock, SharedTimeSource};
use crate::wall::{FakeWallClock, WallClock};

pub(crate) struct TestTimer {
    id: u64,
    due_ns: u64,
    cancelled: Cell<bool>,
    completed: Cell<bool>,
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl TestTimer {
    pub(crate) fn cancel(&self) {
        self.cancelled.set(true);
    }
}

impl ScheduledHandle for Rc<TestTimer> {
    fn id(&self) -> u64 {
        self.id
    }
    fn due_ns(&self) -> u64 {
        self.due_ns
    }
    fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
    fn is_completed(&self) -> bool {
        self.completed.get()
    }
    fn run(&self) {
        if self.completed.replace(true) {
            return;
        }
        let callback = self.callback.borrow_mut().take();
        if let Some(callback) = callback {
            callback();
        }
    }
    fn neutralize(&self) {
        self.completed.set(true);
        self.callback.borrow_mut().take();
    }
}

struct LoopInner {
    source: RefCell<SharedTimeSource>,
    timers: RefCell<Vec<Rc<TestTimer>>>,
    ready: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    next_id: Cell<u64>,
}

/// Asyncio-shaped loop: one quantum runs the ready snapshot, then fires due timers.
#[derive(Clone)]
pub(crate) struct TestLoop {
    inner: Rc<LoopInner>,
}

impl TestLoop {
    pub(crate) fn new(source: SharedTimeSource) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                source: RefCell::new(source),
                timers: RefCell::new(Vec::new()),
                ready: RefCell::new(VecDeque::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub(crate) fn now(&self) -> u64 {
        self.inner.source.borrow().now_ns()
    }

    pub(crate) fn call_at(&self, due_ns: u64, f: impl FnOnce() + 'static) -> Rc<TestTimer> {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        let timer = Rc::new(TestTimer {
            id,
            due_ns,
            cancelled: Cell::new(false),
            completed: Cell::new(false),
            callback: RefCell::new(Some(Box::new(f))),
        });
        self.inner.timers.borrow_mut().push(Rc::clone(&timer));
        timer
    }

    pub(crate) fn call_later(&self, delay_ns: u64, f: impl FnOnce() + 'static) -> Rc<TestTimer> {
        self.call_at(self.now() + delay_ns, f)
    }

    pub(crate) fn call_soon(&self, f: impl FnOnce() + 'static) {
        self.inner.ready.borrow_mut().push_back(Box::new(f));
    }

    fn due_timers(&self) -> Vec<Rc<TestTimer>> {
        let now = self.now();
        let mut timers = self.inner.timers.borrow_mut();
        timers.retain(|t| !t.completed.get());
        let mut due: Vec<_> = timers
            .iter()
            .filter(|t| !t.cancelled.get() && t.due_ns <= now)
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.due_ns, t.id));
        due
    }
}

#[async_trait(?Send)]
impl Scheduler for TestLoop {
    type Handle = Rc<TestTimer>;

    fn ready_len(&self) -> usize {
        self.inner.ready.borrow().len()
    }

    fn next_scheduled(&self) -> Option<Rc<TestTimer>> {
        let mut timers = self.inner.timers.borrow_mut();
        timers.retain(|t| !t.completed.get());
        timers.iter().min_by_key(|t| (t.due_ns, t.id)).cloned()
    }

    fn time_source(&self) -> SharedTimeSource {
        Arc::clone(&self.inner.source.borrow())
    }

    fn rebind_time_source(&self, source: SharedTimeSource) -> SharedTimeSource {
        self.inner.source.replace(source)
    }

    fn take_callback_failure(&self) -> Option<CallbackPanic> {
        None
    }

    async fn yield_once(&self) {
        YieldNow(false).await;
        let batch: Vec<_> = self.inner.ready.borrow_mut().drain(..).collect();
        for item in batch {
            item();
        }
        for timer in self.due_timers() {
            timer.run();
        }
    }
}

struct YieldNow(bool);

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0 {
            return Poll::Ready(());
        }
        self.0 = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[derive(Debug)]
struct FixedWall(DateTime<Utc>);

impl WallClock for FixedWall {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub(crate) fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 5, 1, 12, 0, 0).unwrap()
}

/// Real time that only moves on request, a loop reading it, and a wall
/// clock whose real side is fixed at [`epoch`].
pub(crate) fn rig() -> (ManualClock, TestLoop, Arc<FakeWallClock>) {
    let real = ManualClock::new(1_000_000_000);
    let event_loop = TestLoop::new(Arc::new(real.clone()));
    let wall = Arc::new(FakeWallClock::new(
        Arc::new(FixedWall(epoch())),
        Arc::new(real.clone()),
    ));
    (real, event_loop, wall)
}
