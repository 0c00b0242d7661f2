//! Spawned tasks, their wakers and join handles.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crossbeam::queue::SegQueue;
use futures::task::ArcWake;

use crate::error::JoinError;
use crate::executor::Inner;

pub(crate) type TaskId = u64;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Waking pushes the task id onto the injector; the executor moves it into
/// the ready queue after the item it is currently running.
pub(crate) struct TaskWaker {
    pub(crate) id: TaskId,
    pub(crate) injector: Arc<SegQueue<TaskId>>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.injector.push(arc_self.id);
    }
}

pub(crate) struct Task {
    pub(crate) future: BoxFuture,
    pub(crate) waker: Waker,
    /// Delivers a panic or abort to the join handle.
    pub(crate) fail: Box<dyn FnOnce(JoinError)>,
}

pub(crate) struct JoinState<T> {
    result: RefCell<Option<Result<T, JoinError>>>,
    waker: RefCell<Option<Waker>>,
    finished: Cell<bool>,
}

impl<T> JoinState<T> {
    pub(crate) fn new() -> Self {
        Self {
            result: RefCell::new(None),
            waker: RefCell::new(None),
            finished: Cell::new(false),
        }
    }

    pub(crate) fn complete(&self, result: Result<T, JoinError>) {
        if self.finished.replace(true) {
            return;
        }
        *self.result.borrow_mut() = Some(result);
        if let Some(waker) = self.waker.borrow_mut().take() {
            waker.wake();
        }
    }
}

/// Awaitable result of a spawned task.
///
/// Dropping the handle detaches the task; it keeps running.
pub struct JoinHandle<T> {
    pub(crate) id: TaskId,
    pub(crate) state: Rc<JoinState<T>>,
    pub(crate) runtime: Weak<Inner>,
}

impl<T> JoinHandle<T> {
    /// The task returned, panicked or was aborted.
    pub fn is_finished(&self) -> bool {
        self.state.finished.get()
    }

    /// Stops the task at its next suspension point. Awaiting the handle then
    /// yields [`JoinError::Aborted`].
    pub fn abort(&self) {
        if self.is_finished() {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.abort(self.id);
        }
    }

    pub(crate) fn try_take(&self) -> Option<Result<T, JoinError>> {
        self.state.result.borrow_mut().take()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(result) = self.try_take() {
            return Poll::Ready(result);
        }
        *self.state.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> std::fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
