//! # thawgun-runtime
//!
//! A single-threaded cooperative executor that can be driven by
//! [`thawgun_core::ThawGun`].
//!
//! Tasks, sleeps, timeouts and plain delayed callbacks all read time through
//! one injectable time source, so installing a virtual clock moves every one
//! of them at once. Every executed item is folded into a `blake3` audit hash
//! for determinism checks.
//!
//! ```no_run
//! use std::time::Duration;
//! use thawgun_runtime::Runtime;
//!
//! let runtime = Runtime::new();
//! let rt = runtime.clone();
//! let answer = runtime
//!     .block_on(async move {
//!         rt.sleep(Duration::from_millis(1)).await;
//!         42
//!     })
//!     .unwrap();
//! assert_eq!(answer, 42);
//! ```

mod audit;
pub mod error;
pub mod executor;
pub mod sleep;
pub mod task;
pub mod timer;

pub use error::{Elapsed, JoinError, RuntimeError};
pub use executor::Runtime;
pub use sleep::{yield_now, Sleep, Timeout, YieldNow};
pub use task::JoinHandle;
pub use timer::TimerHandle;
