//! Single-assignment result slots shared between one writer and many readers.
//!
//! A submission produces a [`ResultSlot`] (moved into the work queue with the item)
//! and a [`ResultHandle`] (returned to the caller). The worker that scores the item
//! resolves the slot exactly once; every clone of the handle observes the same
//! [`Prediction`], whether it blocks on [`ResultHandle::wait`], registers a callback
//! with [`ResultHandle::on_complete`], or `.await`s the handle from async code.

use std::fmt;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use tracing::error;
use crate::error::ResolveError;
use crate::worker::panic_message;

/// The payload a caller receives for one submitted item.
///
/// `Success` carries the item's output fields in output-column order, and stands
/// for a trailing success flag of `true`. `Failure` is the uniform payload every
/// item of a failed batch receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Prediction<T> {
    Success(Vec<T>),
    Failure,
}

impl<T> Prediction<T> {
    /// The trailing batch-level success flag.
    pub fn is_success(&self) -> bool {
        matches!(self, Prediction::Success(_))
    }

    pub fn fields(&self) -> Option<&[T]> {
        match self {
            Prediction::Success(fields) => Some(fields),
            Prediction::Failure => None,
        }
    }

    pub fn into_fields(self) -> Option<Vec<T>> {
        match self {
            Prediction::Success(fields) => Some(fields),
            Prediction::Failure => None,
        }
    }
}

type Callback<T> = Box<dyn FnOnce(&Prediction<T>) + Send + 'static>;

struct State<T> {
    value: Option<Arc<Prediction<T>>>,
    callbacks: Vec<Callback<T>>,
    wakers: Vec<Waker>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    resolved: Condvar,
}

impl<T> Shared<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                value: None,
                callbacks: Vec::new(),
                wakers: Vec::new(),
            }),
            resolved: Condvar::new(),
        }
    }

    /// Stores the prediction, then wakes blocked readers, async readers and
    /// callbacks, in that order. Callbacks run on the calling thread with the
    /// lock released. A panicking callback is logged and contained, so it
    /// neither skips the remaining callbacks nor unwinds into the resolver.
    fn set(&self, prediction: Prediction<T>) -> Result<(), ResolveError> {
        let value = Arc::new(prediction);
        let (callbacks, wakers) = {
            let mut state = self.state.lock();
            if state.value.is_some() {
                return Err(ResolveError::AlreadyResolved);
            }
            state.value = Some(value.clone());
            (mem::take(&mut state.callbacks), mem::take(&mut state.wakers))
        };
        self.resolved.notify_all();
        wakers.into_iter().for_each(Waker::wake);
        for callback in callbacks {
            run_callback(callback, &value);
        }
        Ok(())
    }
}

fn run_callback<T>(callback: impl FnOnce(&Prediction<T>), value: &Prediction<T>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
        error!(panic = panic_message(&*payload), "result callback panicked");
    }
}

/// Creates a connected writer/reader pair for one work item.
pub fn result_channel<T>() -> (ResultSlot<T>, ResultHandle<T>) {
    let shared = Arc::new(Shared::new());
    (
        ResultSlot { shared: Some(shared.clone()) },
        ResultHandle { shared },
    )
}

/// The writing half of a result. Not `Clone`: there is exactly one writer.
///
/// Dropping a slot that was never resolved resolves it with
/// [`Prediction::Failure`], so readers are released even when the worker
/// that owned the slot unwound mid-batch.
pub struct ResultSlot<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> ResultSlot<T> {
    pub fn resolve(mut self, prediction: Prediction<T>) -> Result<(), ResolveError> {
        match self.shared.take() {
            Some(shared) => shared.set(prediction),
            None => Err(ResolveError::AlreadyResolved),
        }
    }

    pub fn fail(self) -> Result<(), ResolveError> {
        self.resolve(Prediction::Failure)
    }
}

impl<T> Drop for ResultSlot<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            let _ = shared.set(Prediction::Failure);
        }
    }
}

impl<T> fmt::Debug for ResultSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSlot").finish_non_exhaustive()
    }
}

/// The reading half of a result, handed back to the submitting caller.
///
/// Handles are cheap to clone; all clones observe the same resolution.
pub struct ResultHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<T> ResultHandle<T> {
    pub fn is_resolved(&self) -> bool {
        self.shared.state.lock().value.is_some()
    }

    /// Registers a callback invoked exactly once with the prediction.
    ///
    /// The callback runs on the thread that resolves the slot, typically a
    /// worker thread, so it must not block. If the handle is already resolved
    /// the callback runs immediately on the calling thread.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&Prediction<T>) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        match state.value.clone() {
            Some(value) => {
                drop(state);
                run_callback(callback, &value);
            }
            None => state.callbacks.push(Box::new(callback)),
        }
    }
}

impl<T: Clone> ResultHandle<T> {
    /// Blocks the calling thread until the prediction is available.
    ///
    /// Must not be called from inside an async task; `.await` the handle instead.
    pub fn wait(&self) -> Prediction<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(value) = state.value.as_ref() {
                return Prediction::clone(value);
            }
            self.shared.resolved.wait(&mut state);
        }
    }

    /// Blocks for at most `timeout`. Giving up does not cancel the work: the
    /// item is still scored and the handle may resolve later.
    ///
    /// A timeout too large to form a deadline waits without one.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Prediction<T>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut state = self.shared.state.lock();
        loop {
            if let Some(value) = state.value.as_ref() {
                return Some(Prediction::clone(value));
            }
            if self.shared.resolved.wait_until(&mut state, deadline).timed_out() {
                return state.value.as_ref().map(|value| Prediction::clone(value));
            }
        }
    }

    pub fn try_get(&self) -> Option<Prediction<T>> {
        self.shared
            .state
            .lock()
            .value
            .as_ref()
            .map(|value| Prediction::clone(value))
    }
}

impl<T: Clone> Future for ResultHandle<T> {
    type Output = Prediction<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match state.value.as_ref() {
            Some(value) => Poll::Ready(Prediction::clone(value)),
            None => {
                state.wakers.retain(|waker| !waker.will_wake(cx.waker()));
                state.wakers.push(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
