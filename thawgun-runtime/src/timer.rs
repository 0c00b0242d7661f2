//! Delayed callbacks and the heap that orders them.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::{Rc, Weak};

use thawgun_core::ScheduledHandle;

use crate::executor::Inner;

pub(crate) type Callback = Box<dyn FnOnce()>;

pub(crate) struct TimerEntry {
    pub(crate) id: u64,
    pub(crate) due_ns: u64,
    cancelled: Cell<bool>,
    completed: Cell<bool>,
    callback: RefCell<Option<Callback>>,
}

impl TimerEntry {
    pub(crate) fn new(id: u64, due_ns: u64, callback: Callback) -> Self {
        Self {
            id,
            due_ns,
            cancelled: Cell::new(false),
            completed: Cell::new(false),
            callback: RefCell::new(Some(callback)),
        }
    }

    /// Neither cancelled nor already run.
    pub(crate) fn is_live(&self) -> bool {
        !self.cancelled.get() && !self.completed.get()
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.get()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    pub(crate) fn cancel(&self) {
        if !self.completed.get() {
            self.cancelled.set(true);
            self.callback.borrow_mut().take();
        }
    }

    /// Runs the callback at most once. A panic inside it propagates.
    pub(crate) fn run(&self) {
        if self.completed.replace(true) || self.cancelled.get() {
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

/// Handle to one delayed callback.
///
/// Returned by [`crate::Runtime::call_later`] and [`crate::Runtime::call_at`],
/// and handed to the controller as the scheduler's [`ScheduledHandle`].
#[derive(Clone)]
pub struct TimerHandle {
    pub(crate) entry: Rc<TimerEntry>,
    pub(crate) runtime: Weak<Inner>,
}

impl TimerHandle {
    /// Prevents the callback from running. No effect once it has run.
    pub fn cancel(&self) {
        self.entry.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.is_cancelled()
    }

    /// The callback ran, or was neutralized after running elsewhere.
    pub fn is_finished(&self) -> bool {
        self.entry.is_completed()
    }

    /// Due time in the runtime's clock, nanoseconds.
    pub fn when(&self) -> u64 {
        self.entry.due_ns
    }
}

impl ScheduledHandle for TimerHandle {
    fn id(&self) -> u64 {
        self.entry.id
    }

    fn due_ns(&self) -> u64 {
        self.entry.due_ns
    }

    fn is_cancelled(&self) -> bool {
        self.entry.is_cancelled()
    }

    fn is_completed(&self) -> bool {
        self.entry.is_completed()
    }

    fn run(&self) {
        if !self.entry.is_live() {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.auditor.timer(self.entry.id);
        }
        self.entry.run();
    }

    fn neutralize(&self) {
        self.entry.neutralize();
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("id", &self.entry.id)
            .field("due_ns", &self.entry.due_ns)
            .field("cancelled", &self.entry.is_cancelled())
            .field("completed", &self.entry.is_completed())
            .finish()
    }
}

/// Heap slot; ordered so that `BinaryHeap` pops the earliest `(due_ns, id)` first.
pub(crate) struct Alarm(pub(crate) Rc<TimerEntry>);

impl Alarm {
    fn key(&self) -> (u64, u64) {
        (self.0.due_ns, self.0.id)
    }
}

impl PartialEq for Alarm {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Alarm {}

impl PartialOrd for Alarm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Alarm {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse the ordering for min-heap
        other.key().cmp(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn entry(id: u64, due_ns: u64) -> Rc<TimerEntry> {
        Rc::new(TimerEntry::new(id, due_ns, Box::new(|| {})))
    }

    fn handle(entry: Rc<TimerEntry>) -> TimerHandle {
        TimerHandle {
            entry,
            runtime: Weak::new(),
        }
    }

    #[test]
    fn heap_pops_earliest_then_oldest() {
        let mut heap = BinaryHeap::new();
        heap.push(Alarm(entry(0, 30)));
        heap.push(Alarm(entry(1, 10)));
        heap.push(Alarm(entry(2, 20)));
        heap.push(Alarm(entry(3, 10)));

        let order: Vec<_> = std::iter::from_fn(|| heap.pop().map(|a| a.0.id)).collect();
        assert_eq!(order, vec![1, 3, 2, 0]);
    }

    #[test]
    fn callback_runs_once() {
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let handle = handle(Rc::new(TimerEntry::new(
            0,
            0,
            Box::new(move || counter.set(counter.get() + 1)),
        )));
        ScheduledHandle::run(&handle);
        ScheduledHandle::run(&handle);
        assert_eq!(hits.get(), 1);
        assert!(handle.is_finished());
    }

    #[test]
    fn neutralized_handle_is_inert() {
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let handle = handle(Rc::new(TimerEntry::new(
            0,
            0,
            Box::new(move || counter.set(counter.get() + 1)),
        )));
        handle.neutralize();
        handle.entry.run();
        assert_eq!(hits.get(), 0);
        assert!(!handle.entry.is_live());
    }

    #[test]
    fn cancel_after_completion_is_ignored() {
        let handle = handle(entry(0, 0));
        handle.entry.run();
        handle.cancel();
        assert!(!handle.is_cancelled());
    }
}
