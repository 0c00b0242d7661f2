use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Runtime stalled: {pending_tasks} task(s) pending with nothing ready and no timers armed")]
    Stalled { pending_tasks: usize },

    #[error("Root task failed: {0}")]
    Join(#[from] JoinError),
}

/// Why a spawned task produced no value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JoinError {
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("task was aborted")]
    Aborted,
}

/// Returned by [`crate::Runtime::timeout`] when the deadline passes first.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("deadline has elapsed")]
pub struct Elapsed;
