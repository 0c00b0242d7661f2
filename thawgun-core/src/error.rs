use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThawError {
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Callback due at {due_ns}ns panicked: {message}")]
    CallbackFailure { due_ns: u64, message: String },

    #[error("{operation} called after teardown")]
    TeardownMisuse { operation: &'static str },

    #[error("advance called while another advance is running")]
    AdvanceInProgress,

    #[error("Drain did not settle within {quanta} scheduling quanta")]
    DrainLivelock { quanta: u32 },

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] thawgun_telemetry::MetricsError),
}

impl From<crate::scheduler::CallbackPanic> for ThawError {
    fn from(panic: crate::scheduler::CallbackPanic) -> Self {
        ThawError::CallbackFailure {
            due_ns: panic.due_ns,
            message: panic.message,
        }
    }
}
