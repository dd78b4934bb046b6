//! Executor abstraction: operation handles, pending results and timers.
//!
//! Every asynchronous step of the client (a remote call, a backoff timer,
//! a retry loop) is submitted to a [`CompletionQueue`] and observed through
//! a [`PendingOp`]. The queue is owned by the caller; the client only
//! borrows it through an `Arc<dyn CompletionQueue>`.

mod manual;
mod tokio_queue;

pub use manual::{ManualCompletionQueue, ManualResponder, ParkedTimer};
pub use tokio_queue::TokioCompletionQueue;

use crate::error::OperationError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use stratus_protocol::Status;
use tokio::sync::{oneshot, watch};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Shared reference to a completion queue.
pub type SharedQueue = Arc<dyn CompletionQueue>;

/// The scheduling facility that runs asynchronous work and timers.
pub trait CompletionQueue: Send + Sync + 'static {
    /// Schedules a timer that fires after `delay`.
    ///
    /// The result is the firing instant, or a `Cancelled` status when the
    /// timer's handle is cancelled first.
    fn make_relative_timer(&self, delay: Duration) -> PendingOp<Instant>;

    /// Runs a task to completion on the queue.
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Submits one asynchronous call to the queue.
///
/// Cancelling the returned handle resolves the call as `Cancelled` unless
/// the call has already produced its result.
pub fn run_async<T, F>(cq: &dyn CompletionQueue, call: F) -> PendingOp<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T, Status>> + Send + 'static,
{
    let (completer, pending) = PendingOp::channel();
    let handle = completer.handle().clone();
    cq.spawn(Box::pin(async move {
        let result = tokio::select! {
            biased;
            result = call => result,
            _ = handle.cancelled() => Err(Status::cancelled("call cancelled")),
        };
        completer.complete(result);
    }));
    pending
}

type CancelHook = Box<dyn Fn() + Send + Sync>;

struct HandleState {
    cancel_tx: watch::Sender<bool>,
    finished: AtomicBool,
    hook: Option<CancelHook>,
}

/// Cancelable token for submitted work.
///
/// Cloning shares the token. `cancel()` may be called any number of times
/// from any thread; once the work has finished it is a no-op.
#[derive(Clone)]
pub struct OperationHandle {
    state: Arc<HandleState>,
}

impl OperationHandle {
    /// Creates a fresh, uncancelled handle.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a handle that also runs `hook` every time it is cancelled.
    pub fn with_cancel_hook(hook: impl Fn() + Send + Sync + 'static) -> Self {
        Self::build(Some(Box::new(hook)))
    }

    fn build(hook: Option<CancelHook>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            state: Arc::new(HandleState {
                cancel_tx,
                finished: AtomicBool::new(false),
                hook,
            }),
        }
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        self.state.cancel_tx.send_replace(true);
        if let Some(hook) = &self.state.hook {
            hook();
        }
    }

    /// Returns true once `cancel()` took effect.
    pub fn is_cancelled(&self) -> bool {
        *self.state.cancel_tx.borrow()
    }

    /// Returns true once the work produced its result.
    pub fn is_finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    /// Waits until the handle is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.cancel_tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    fn mark_finished(&self) {
        self.state.finished.store(true, Ordering::Release);
    }
}

impl Default for OperationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Error used when the producer of a result goes away without completing.
pub trait AbandonedError {
    /// Value reported for an abandoned operation.
    fn abandoned() -> Self;
}

impl AbandonedError for Status {
    fn abandoned() -> Self {
        Status::cancelled("operation abandoned before completion")
    }
}

impl AbandonedError for OperationError {
    fn abandoned() -> Self {
        OperationError::Cancelled {
            location: "abandoned operation",
        }
    }
}

/// Handle plus the eventual result of submitted work.
#[must_use = "a pending operation does nothing unless awaited or cancelled"]
pub struct PendingOp<T, E = Status> {
    handle: OperationHandle,
    rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> PendingOp<T, E> {
    /// Creates a connected producer/consumer pair with a fresh handle.
    pub fn channel() -> (Completer<T, E>, PendingOp<T, E>) {
        Self::with_handle(OperationHandle::new())
    }

    /// Creates a connected pair sharing `handle`.
    pub fn with_handle(handle: OperationHandle) -> (Completer<T, E>, PendingOp<T, E>) {
        let (tx, rx) = oneshot::channel();
        let completer = Completer {
            handle: handle.clone(),
            tx: Some(tx),
        };
        (completer, PendingOp { handle, rx })
    }

    /// Creates an operation that has already completed.
    pub fn ready(result: Result<T, E>) -> Self {
        let (completer, pending) = Self::channel();
        completer.complete(result);
        pending
    }

    /// The operation's handle.
    pub fn handle(&self) -> &OperationHandle {
        &self.handle
    }

    /// Requests cancellation of the operation.
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<T, E: AbandonedError> Future for PendingOp<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(E::abandoned())))
    }
}

impl<T, E> fmt::Debug for PendingOp<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOp")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Producing half of a [`PendingOp`].
///
/// Dropping it without completing resolves the operation as abandoned.
pub struct Completer<T, E = Status> {
    handle: OperationHandle,
    tx: Option<oneshot::Sender<Result<T, E>>>,
}

impl<T, E> Completer<T, E> {
    /// The handle shared with the consumer.
    pub fn handle(&self) -> &OperationHandle {
        &self.handle
    }

    /// Returns true if the consumer asked for cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }

    /// Delivers the result. Later cancellations become no-ops.
    pub fn complete(mut self, result: Result<T, E>) {
        self.handle.mark_finished();
        if let Some(tx) = self.tx.take() {
            // The consumer may have been dropped; nobody is left to notify.
            let _ = tx.send(result);
        }
    }
}

impl<T, E> Drop for Completer<T, E> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.handle.mark_finished();
        }
    }
}

impl<T, E> fmt::Debug for Completer<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
