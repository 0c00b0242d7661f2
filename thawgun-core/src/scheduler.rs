//! Collaborator contract for the cooperative scheduler being driven.
//!
//! The controller never owns the event loop. It needs to look at the two
//! queues, swap the time source, run one delayed callback by hand, and give
//! the loop a single turn. Anything implementing these traits can be driven.

use async_trait::async_trait;

use crate::time::SharedTimeSource;

/// One pending delayed callback, owned by the scheduler.
///
/// Running a handle marks it completed first, so a handle that is run twice,
/// whether by the controller or later by the scheduler's own timer path, only
/// executes its callback once.
pub trait ScheduledHandle {
    /// Identity stable for the life of the handle.
    fn id(&self) -> u64;

    fn due_ns(&self) -> u64;

    fn is_cancelled(&self) -> bool;

    fn is_completed(&self) -> bool;

    /// Executes the callback if it has not run yet. Panics raised by the
    /// callback propagate to the caller.
    fn run(&self);

    /// Marks the handle completed and drops its callback without running it.
    fn neutralize(&self);
}

/// The scheduler surface consumed by the drain loop and the advance controller.
#[async_trait(?Send)]
pub trait Scheduler {
    type Handle: ScheduledHandle;

    /// Number of immediately runnable work items, not counting the caller.
    fn ready_len(&self) -> usize;

    /// Earliest live delayed callback. Completed handles are never returned;
    /// a cancelled one may be.
    fn next_scheduled(&self) -> Option<Self::Handle>;

    /// The time source currently consulted for "now".
    fn time_source(&self) -> SharedTimeSource;

    /// Installs `source` and returns the one it replaced.
    fn rebind_time_source(&self, source: SharedTimeSource) -> SharedTimeSource;

    /// Oldest panic message from a callback the scheduler fired itself.
    fn take_callback_failure(&self) -> Option<CallbackPanic>;

    /// Cedes control for exactly one scheduling quantum.
    async fn yield_once(&self);
}

/// A callback that panicked while the scheduler was firing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPanic {
    pub due_ns: u64,
    pub message: String,
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "callback panicked with a non-string payload".to_string()
    }
}
