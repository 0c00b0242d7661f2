//! # Drain Loop
//!
//! Gives the scheduler single quanta until it reaches a fixed point:
//!
//! - the ready queue is empty,
//! - the front of the delayed queue is the same handle it was one quantum ago,
//! - and that front is not due at or before the drain bound.
//!
//! Both queues are re-read after every quantum. Work readied or scheduled
//! by the quantum just run (re-entrant scheduling) keeps the loop going.
//! Nothing here waits on real time; each quantum is a cooperative yield.

use tracing::trace;

use crate::error::ThawError;
use crate::scheduler::{ScheduledHandle, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Front {
    due_ns: u64,
    id: u64,
    cancelled: bool,
}

impl Front {
    fn of<S: Scheduler>(scheduler: &S) -> Option<Self> {
        scheduler.next_scheduled().map(|handle| Front {
            due_ns: handle.due_ns(),
            id: handle.id(),
            cancelled: handle.is_cancelled(),
        })
    }

    fn is_due(&self, bound_ns: u64) -> bool {
        !self.cancelled && self.due_ns <= bound_ns
    }
}

/// Runs everything runnable at or before `bound_ns` without moving time.
///
/// Returns the number of quanta spent. Callback panics the scheduler caught
/// while firing timers are surfaced as [`ThawError::CallbackFailure`].
pub async fn drain<S: Scheduler>(
    scheduler: &S,
    bound_ns: u64,
    max_quanta: u32,
) -> Result<u32, ThawError> {
    let mut front = Front::of(scheduler);
    let mut quanta = 0u32;

    loop {
        scheduler.yield_once().await;
        quanta += 1;

        if let Some(failure) = scheduler.take_callback_failure() {
            return Err(failure.into());
        }

        let ready = scheduler.ready_len();
        let next = Front::of(scheduler);
        let due = next.is_some_and(|f| f.is_due(bound_ns));

        if ready == 0 && next == front && !due {
            trace!(quanta, bound_ns, "drain settled");
            return Ok(quanta);
        }
        if quanta >= max_quanta {
            return Err(ThawError::DrainLivelock { quanta });
        }
        front = next;
    }
}
