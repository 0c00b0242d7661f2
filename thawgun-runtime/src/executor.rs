//! # Cooperative Executor
//!
//! Single-threaded event loop with an asyncio-like shape:
//!
//! - **ready queue**: FIFO of woken tasks and due timer callbacks
//! - **delayed queue**: min-heap of timers keyed by `(due_ns, sequence)`
//! - **time source**: injected, replaceable, consulted for every "now"
//!
//! One quantum (`run_once`) moves every due timer into the ready
//! queue and then runs exactly the items that were ready at that moment.
//! Work readied while the quantum runs waits for the next one.

use std::cell::{Cell, RefCell};
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use crossbeam::queue::SegQueue;
use tracing::{debug, error, trace, warn};

use thawgun_core::scheduler::panic_message;
use thawgun_core::time::duration_to_ns;
use thawgun_core::{CallbackPanic, MonotonicClock, Scheduler, SharedTimeSource};

use crate::audit::Auditor;
use crate::error::{JoinError, RuntimeError};
use crate::sleep::{yield_now, Sleep, Timeout};
use crate::task::{JoinHandle, JoinState, Task, TaskId, TaskWaker};
use crate::timer::{Alarm, TimerEntry, TimerHandle};

/// Longest real-time nap `block_on` takes while waiting for a timer.
const MAX_PARK: Duration = Duration::from_millis(5);

enum Ready {
    Task(TaskId),
    Timer(Rc<TimerEntry>),
}

pub(crate) struct Inner {
    source: RefCell<SharedTimeSource>,
    ready: RefCell<VecDeque<Ready>>,
    queued: RefCell<HashSet<TaskId>>,
    injector: Arc<SegQueue<TaskId>>,
    tasks: RefCell<HashMap<TaskId, Task>>,
    running: Cell<Option<TaskId>>,
    aborted: RefCell<HashSet<TaskId>>,
    timers: RefCell<BinaryHeap<Alarm>>,
    next_task: Cell<TaskId>,
    next_timer: Cell<u64>,
    failures: RefCell<VecDeque<CallbackPanic>>,
    pub(crate) auditor: Auditor,
}

impl Inner {
    fn now_ns(&self) -> u64 {
        self.source.borrow().now_ns()
    }

    fn enqueue(&self, id: TaskId) {
        if self.queued.borrow_mut().insert(id) {
            self.ready.borrow_mut().push_back(Ready::Task(id));
        }
    }

    fn flush_wakeups(&self) {
        while let Some(id) = self.injector.pop() {
            self.enqueue(id);
        }
    }

    /// Earliest timer still in the heap. Completed heads are dropped on the
    /// way; cancelled ones too when `skip_cancelled` is set.
    fn peek_timer(&self, skip_cancelled: bool) -> Option<Rc<TimerEntry>> {
        let mut timers = self.timers.borrow_mut();
        loop {
            let stale = match timers.peek() {
                Some(Alarm(head)) => {
                    head.is_completed() || (skip_cancelled && head.is_cancelled())
                }
                None => return None,
            };
            if !stale {
                return timers.peek().map(|Alarm(head)| Rc::clone(head));
            }
            timers.pop();
        }
    }

    /// Runs one scheduling quantum and returns the number of items it took.
    pub(crate) fn run_once(&self) -> usize {
        self.flush_wakeups();

        let now = self.now_ns();
        {
            let mut timers = self.timers.borrow_mut();
            let mut ready = self.ready.borrow_mut();
            loop {
                let take = match timers.peek() {
                    Some(Alarm(head)) => !head.is_live() || head.due_ns <= now,
                    None => false,
                };
                if !take {
                    break;
                }
                if let Some(Alarm(entry)) = timers.pop() {
                    if entry.is_live() {
                        ready.push_back(Ready::Timer(entry));
                    }
                }
            }
        }

        let ntodo = self.ready.borrow().len();
        for _ in 0..ntodo {
            let item = self.ready.borrow_mut().pop_front();
            match item {
                Some(Ready::Task(id)) => self.poll_task(id),
                Some(Ready::Timer(entry)) => self.fire(&entry),
                None => break,
            }
            self.flush_wakeups();
        }
        ntodo
    }

    fn poll_task(&self, id: TaskId) {
        self.queued.borrow_mut().remove(&id);
        let task = self.tasks.borrow_mut().remove(&id);
        let Some(mut task) = task else {
            trace!(id, "skipping finished task");
            return;
        };

        self.auditor.task(id);
        self.running.set(Some(id));
        let waker = task.waker.clone();
        let mut cx = Context::from_waker(&waker);
        let outcome = catch_unwind(AssertUnwindSafe(|| task.future.as_mut().poll(&mut cx)));
        self.running.set(None);
        let aborted = self.aborted.borrow_mut().remove(&id);

        match outcome {
            Ok(Poll::Pending) if aborted => {
                trace!(id, "task aborted while running");
                let Task { future, fail, .. } = task;
                drop(future);
                fail(JoinError::Aborted);
            }
            Ok(Poll::Pending) => {
                self.tasks.borrow_mut().insert(id, task);
            }
            Ok(Poll::Ready(())) => trace!(id, "task complete"),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(id, %message, "task panicked");
                (task.fail)(JoinError::Panicked(message));
            }
        }
    }

    fn fire(&self, entry: &Rc<TimerEntry>) {
        if !entry.is_live() {
            return;
        }
        self.auditor.timer(entry.id);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| entry.run())) {
            let message = panic_message(payload.as_ref());
            error!(id = entry.id, due_ns = entry.due_ns, %message, "timer callback panicked");
            self.failures.borrow_mut().push_back(CallbackPanic {
                due_ns: entry.due_ns,
                message,
            });
        }
    }

    pub(crate) fn abort(&self, id: TaskId) {
        if self.running.get() == Some(id) {
            self.aborted.borrow_mut().insert(id);
            return;
        }
        let task = self.tasks.borrow_mut().remove(&id);
        if let Some(Task { future, fail, .. }) = task {
            trace!(id, "task aborted");
            drop(future);
            fail(JoinError::Aborted);
        }
    }
}

/// Handle to a single-threaded cooperative runtime. Clones share the runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

impl Runtime {
    /// Runtime on real monotonic time.
    pub fn new() -> Self {
        Self::with_time_source(Arc::new(MonotonicClock::new()))
    }

    pub fn with_time_source(source: SharedTimeSource) -> Self {
        Self {
            inner: Rc::new(Inner {
                source: RefCell::new(source),
                ready: RefCell::new(VecDeque::new()),
                queued: RefCell::new(HashSet::new()),
                injector: Arc::new(SegQueue::new()),
                tasks: RefCell::new(HashMap::new()),
                running: Cell::new(None),
                aborted: RefCell::new(HashSet::new()),
                timers: RefCell::new(BinaryHeap::new()),
                next_task: Cell::new(0),
                next_timer: Cell::new(0),
                failures: RefCell::new(VecDeque::new()),
                auditor: Auditor::new(),
            }),
        }
    }

    /// Current time according to the installed time source.
    pub fn now_ns(&self) -> u64 {
        self.inner.now_ns()
    }

    /// Schedules `future` as a new task.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let inner = &self.inner;
        let id = inner.next_task.get();
        inner.next_task.set(id + 1);

        let state = Rc::new(JoinState::new());
        let done = Rc::clone(&state);
        let failed = Rc::clone(&state);
        let task = Task {
            future: Box::pin(async move {
                let output = future.await;
                done.complete(Ok(output));
            }),
            waker: futures::task::waker(Arc::new(TaskWaker {
                id,
                injector: Arc::clone(&inner.injector),
            })),
            fail: Box::new(move |err| failed.complete(Err(err))),
        };
        inner.tasks.borrow_mut().insert(id, task);
        inner.enqueue(id);
        trace!(id, "task spawned");

        JoinHandle {
            id,
            state,
            runtime: Rc::downgrade(inner),
        }
    }

    /// Runs `callback` once the clock reads `due_ns` or later.
    pub fn call_at(&self, due_ns: u64, callback: impl FnOnce() + 'static) -> TimerHandle {
        let entry = Rc::new(TimerEntry::new(self.next_timer_id(), due_ns, Box::new(callback)));
        self.inner.timers.borrow_mut().push(Alarm(Rc::clone(&entry)));
        self.handle(entry)
    }

    /// Runs `callback` after `delay` has passed on the runtime's clock.
    pub fn call_later(&self, delay: Duration, callback: impl FnOnce() + 'static) -> TimerHandle {
        let due_ns = self.now_ns().saturating_add(duration_to_ns(delay));
        self.call_at(due_ns, callback)
    }

    /// Runs `callback` in the next quantum without involving the delayed queue.
    pub fn call_soon(&self, callback: impl FnOnce() + 'static) -> TimerHandle {
        let entry = Rc::new(TimerEntry::new(
            self.next_timer_id(),
            self.now_ns(),
            Box::new(callback),
        ));
        self.inner
            .ready
            .borrow_mut()
            .push_back(Ready::Timer(Rc::clone(&entry)));
        self.handle(entry)
    }

    /// Completes once `duration` has passed on the runtime's clock.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        self.sleep_until(self.now_ns().saturating_add(duration_to_ns(duration)))
    }

    pub fn sleep_until(&self, deadline_ns: u64) -> Sleep {
        Sleep::new(self.clone(), deadline_ns)
    }

    /// Runs `future` with a deadline. The future is polled before the
    /// deadline is checked, so one that is already done always succeeds.
    pub fn timeout<F: Future>(&self, duration: Duration, future: F) -> Timeout<F> {
        Timeout::new(future, self.sleep(duration))
    }

    /// Cedes control for one quantum.
    pub async fn yield_now(&self) {
        yield_now().await
    }

    /// Drives `future` to completion as the root task.
    ///
    /// When nothing is ready the thread naps in real time until the next
    /// timer is due by the current time source. A frozen source therefore
    /// never reaches a future timer on its own.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Stalled`] once nothing is ready and no timer is armed
    /// while the root is still pending, [`RuntimeError::Join`] if the root
    /// panicked.
    pub fn block_on<F>(&self, future: F) -> Result<F::Output, RuntimeError>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let root = self.spawn(future);
        debug!(root = root.id, "block_on started");
        loop {
            if let Some(result) = root.try_take() {
                debug!(root = root.id, items = self.executed_items(), "block_on finished");
                return Ok(result?);
            }
            if self.inner.run_once() > 0 {
                continue;
            }
            self.inner.flush_wakeups();
            if !self.inner.ready.borrow().is_empty() {
                continue;
            }
            match self.inner.peek_timer(true) {
                Some(next) => self.park_until(next.due_ns),
                None => {
                    let pending_tasks = self.inner.tasks.borrow().len();
                    warn!(pending_tasks, "runtime stalled");
                    return Err(RuntimeError::Stalled { pending_tasks });
                }
            }
        }
    }

    /// Runs a single quantum by hand. Returns how many items it ran.
    pub fn run_once(&self) -> usize {
        self.inner.run_once()
    }

    /// Hex digest of every task poll and timer callback run so far, in order.
    pub fn audit_hash(&self) -> String {
        self.inner.auditor.state()
    }

    /// Number of task polls and timer callbacks run so far.
    pub fn executed_items(&self) -> u64 {
        self.inner.auditor.items()
    }

    /// Tasks spawned and not yet finished.
    pub fn pending_tasks(&self) -> usize {
        let running = usize::from(self.inner.running.get().is_some());
        self.inner.tasks.borrow().len() + running
    }

    fn park_until(&self, due_ns: u64) {
        let wait = Duration::from_nanos(due_ns.saturating_sub(self.now_ns())).min(MAX_PARK);
        if !wait.is_zero() {
            trace!(?wait, due_ns, "parking");
            std::thread::sleep(wait);
        }
    }

    fn next_timer_id(&self) -> u64 {
        let id = self.inner.next_timer.get();
        self.inner.next_timer.set(id + 1);
        id
    }

    fn handle(&self, entry: Rc<TimerEntry>) -> TimerHandle {
        TimerHandle {
            entry,
            runtime: Rc::downgrade(&self.inner),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Scheduler for Runtime {
    type Handle = TimerHandle;

    fn ready_len(&self) -> usize {
        self.inner.flush_wakeups();
        self.inner.ready.borrow().len()
    }

    fn next_scheduled(&self) -> Option<TimerHandle> {
        self.inner.peek_timer(false).map(|entry| self.handle(entry))
    }

    fn time_source(&self) -> SharedTimeSource {
        Arc::clone(&self.inner.source.borrow())
    }

    fn rebind_time_source(&self, source: SharedTimeSource) -> SharedTimeSource {
        debug!(?source, "time source rebound");
        self.inner.source.replace(source)
    }

    fn take_callback_failure(&self) -> Option<CallbackPanic> {
        self.inner.failures.borrow_mut().pop_front()
    }

    async fn yield_once(&self) {
        yield_now().await
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("now_ns", &self.now_ns())
            .field("ready", &self.inner.ready.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("tasks", &self.inner.tasks.borrow().len())
            .finish()
    }
}
