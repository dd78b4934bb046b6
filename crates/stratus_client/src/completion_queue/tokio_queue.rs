//! Completion queue backed by a tokio runtime.

use super::{BoxFuture, CompletionQueue, PendingOp};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stratus_protocol::Status;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

/// Decrements the pending-operation counter when a task ends.
struct PendingGuard(Arc<AtomicUsize>);

impl PendingGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Production completion queue.
///
/// Either borrows an existing runtime through its [`Handle`] or owns a
/// dedicated multi-threaded runtime.
pub struct TokioCompletionQueue {
    handle: Handle,
    runtime: Mutex<Option<Runtime>>,
    pending: Arc<AtomicUsize>,
}

impl TokioCompletionQueue {
    /// Runs work on an existing runtime.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            runtime: Mutex::new(None),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs work on the runtime of the calling context, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::from_handle)
    }

    /// Creates a queue owning a runtime with `workers` worker threads.
    pub fn with_worker_threads(workers: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name("stratus-cq")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Mutex::new(Some(runtime)),
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of timers and tasks that have not finished yet.
    pub fn pending_operations(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Stops an owned runtime; outstanding work is dropped and resolves as
    /// abandoned. Has no effect on a borrowed runtime.
    pub fn shutdown(&self) {
        if let Some(runtime) = self.runtime.lock().take() {
            debug!(pending = self.pending_operations(), "shutting down completion queue");
            runtime.shutdown_background();
        }
    }
}

impl CompletionQueue for TokioCompletionQueue {
    fn make_relative_timer(&self, delay: Duration) -> PendingOp<Instant> {
        let (completer, pending) = PendingOp::channel();
        let guard = PendingGuard::enter(&self.pending);
        self.handle.spawn(async move {
            let _guard = guard;
            let handle = completer.handle().clone();
            let result = tokio::select! {
                _ = tokio::time::sleep(delay) => Ok(Instant::now()),
                _ = handle.cancelled() => Err(Status::cancelled("timer cancelled")),
            };
            completer.complete(result);
        });
        pending
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) {
        let guard = PendingGuard::enter(&self.pending);
        self.handle.spawn(async move {
            let _guard = guard;
            task.await;
        });
    }
}

impl Drop for TokioCompletionQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
