//! ## thawgun-runtime::sleep
//! **Timer-backed futures**
//!
//! [`Sleep`] arms a delayed callback on first poll and completes when that
//! callback runs, whether the executor fires it or an advance does.
//! [`Timeout`] races a future against a [`Sleep`]. [`YieldNow`] gives up
//! exactly one quantum.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::Elapsed;
use crate::executor::Runtime;
use crate::timer::TimerHandle;

struct SleepState {
    fired: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

/// Completes once the runtime's clock reaches the deadline.
///
/// Dropping an unfinished sleep cancels its timer.
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    runtime: Runtime,
    deadline_ns: u64,
    state: Rc<SleepState>,
    timer: Option<TimerHandle>,
}

impl Sleep {
    pub(crate) fn new(runtime: Runtime, deadline_ns: u64) -> Self {
        Self {
            runtime,
            deadline_ns,
            state: Rc::new(SleepState {
                fired: Cell::new(false),
                waker: RefCell::new(None),
            }),
            timer: None,
        }
    }

    pub fn deadline_ns(&self) -> u64 {
        self.deadline_ns
    }

    pub fn is_elapsed(&self) -> bool {
        self.state.fired.get()
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.state.fired.get() {
            return Poll::Ready(());
        }
        *self.state.waker.borrow_mut() = Some(cx.waker().clone());

        if self.timer.is_none() {
            let state = Rc::clone(&self.state);
            let timer = self.runtime.call_at(self.deadline_ns, move || {
                state.fired.set(true);
                let waker = state.waker.borrow_mut().take();
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            self.timer = Some(timer);
        }
        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let Some(timer) = &self.timer {
            if !self.state.fired.get() {
                timer.cancel();
            }
        }
    }
}

/// Output of [`Runtime::timeout`].
#[must_use = "futures do nothing unless polled"]
pub struct Timeout<F> {
    future: Pin<Box<F>>,
    sleep: Sleep,
}

impl<F: Future> Timeout<F> {
    pub(crate) fn new(future: F, sleep: Sleep) -> Self {
        Self {
            future: Box::pin(future),
            sleep,
        }
    }
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Poll::Ready(output) = this.future.as_mut().poll(cx) {
            return Poll::Ready(Ok(output));
        }
        match Pin::new(&mut this.sleep).poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(Elapsed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Returns `Pending` once after waking itself.
#[must_use = "futures do nothing unless polled"]
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Cedes control for exactly one quantum.
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}
