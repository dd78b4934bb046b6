//! Asynchronous retry engine.
//!
//! [`AsyncRetryOperation`] wraps one unit of work (a [`RetryableCall`]) and
//! drives it through the states
//!
//! ```text
//! Idle -> Attempting -> Succeeded
//!                    -> PermanentlyFailed
//!                    -> Backoff -> Attempting ...
//!                    -> Cancelled
//! ```
//!
//! The loop runs as a single task on the completion queue, so at most one
//! transition of a given operation is in progress at any time. The only
//! state shared with other threads is the cancellation record, which
//! `cancel()` updates and forwards to the in-flight attempt or timer.

use crate::completion_queue::{OperationHandle, PendingOp, SharedQueue};
use crate::error::{ClientResult, OperationError};
use crate::policy::{BackoffPolicy, Idempotency, RetryPolicy};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use stratus_protocol::Status;
use tracing::{debug, warn};

/// Lifecycle of an [`AsyncRetryOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Not started yet.
    Idle,
    /// An attempt is in flight.
    Attempting,
    /// Waiting on the backoff timer.
    Backoff,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure that will not be retried.
    PermanentlyFailed,
    /// Finished because the caller cancelled.
    Cancelled,
}

impl RetryState {
    /// Returns true for the three final states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Succeeded | RetryState::PermanentlyFailed | RetryState::Cancelled
        )
    }
}

/// Classification of one attempt's result.
#[derive(Debug)]
pub enum AttemptVerdict<T> {
    /// The operation is complete.
    Done(T),
    /// The attempt failed.
    Failed {
        /// Status to feed to the retry policy.
        status: Status,
        /// False if the request never left the client.
        dispatched: bool,
    },
}

/// One unit of work that the retry engine may invoke repeatedly.
pub trait RetryableCall: Send + 'static {
    /// Result of a single attempt.
    type Response: Send + 'static;
    /// Result of the whole operation.
    type Output: Send + 'static;

    /// Name used in error messages and logs.
    fn location(&self) -> &'static str;

    /// Whether a dispatched attempt may be repeated.
    fn idempotency(&self) -> Idempotency;

    /// Starts one attempt. An `Err` means the request was never sent.
    fn attempt(&mut self, cq: &SharedQueue) -> Result<PendingOp<Self::Response>, Status>;

    /// Inspects the result of one attempt.
    fn on_attempt(
        &mut self,
        result: Result<Self::Response, Status>,
    ) -> AttemptVerdict<Self::Output>;

    /// Produces the final result once the engine gives up.
    fn finish(self, error: OperationError) -> ClientResult<Self::Output>;
}

#[derive(Debug)]
struct Progress {
    state: RetryState,
    cancelled: bool,
    attempts: u32,
    current: Option<OperationHandle>,
}

#[derive(Debug)]
struct Shared {
    progress: Mutex<Progress>,
}

impl Shared {
    fn cancel(&self) {
        let current = {
            let mut progress = self.progress.lock();
            if progress.state.is_terminal() {
                return;
            }
            progress.cancelled = true;
            progress.current.clone()
        };
        if let Some(handle) = current {
            handle.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.progress.lock().cancelled
    }

    /// Enters `state` waiting on `handle`. Returns true if a cancellation
    /// arrived first, in which case the caller must cancel `handle` itself.
    fn wait_on(&self, state: RetryState, handle: &OperationHandle) -> bool {
        let mut progress = self.progress.lock();
        progress.state = state;
        progress.current = Some(handle.clone());
        progress.cancelled
    }

    fn begin_attempt(&self) -> bool {
        let mut progress = self.progress.lock();
        if progress.cancelled {
            return false;
        }
        progress.state = RetryState::Attempting;
        progress.attempts += 1;
        true
    }

    fn transition(&self, state: RetryState) {
        let mut progress = self.progress.lock();
        progress.state = state;
        progress.current = None;
    }
}

/// Read-only view of a running operation.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    shared: Arc<Shared>,
}

impl RetryTracker {
    /// Current state.
    pub fn state(&self) -> RetryState {
        self.shared.progress.lock().state
    }

    /// Attempts dispatched so far.
    pub fn attempts(&self) -> u32 {
        self.shared.progress.lock().attempts
    }
}

/// Retry state machine around one [`RetryableCall`].
pub struct AsyncRetryOperation<C: RetryableCall> {
    call: C,
    retry_policy: Box<dyn RetryPolicy>,
    backoff_policy: Box<dyn BackoffPolicy>,
    shared: Arc<Shared>,
    handle: OperationHandle,
}

impl<C: RetryableCall> AsyncRetryOperation<C> {
    /// Creates an idle operation. The policies should be fresh per-operation
    /// copies (`clone_box` of a template).
    pub fn new(
        call: C,
        retry_policy: Box<dyn RetryPolicy>,
        backoff_policy: Box<dyn BackoffPolicy>,
    ) -> Self {
        let shared = Arc::new(Shared {
            progress: Mutex::new(Progress {
                state: RetryState::Idle,
                cancelled: false,
                attempts: 0,
                current: None,
            }),
        });
        let hook_target = Arc::clone(&shared);
        let handle = OperationHandle::with_cancel_hook(move || hook_target.cancel());
        Self {
            call,
            retry_policy,
            backoff_policy,
            shared,
            handle,
        }
    }

    /// Handle that cancels this operation; valid before and after `start`.
    pub fn handle(&self) -> OperationHandle {
        self.handle.clone()
    }

    /// Observer for state and attempt count.
    pub fn tracker(&self) -> RetryTracker {
        RetryTracker {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current state.
    pub fn state(&self) -> RetryState {
        self.shared.progress.lock().state
    }

    /// Cancels the operation.
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Starts the operation on `cq`.
    ///
    /// If the operation was cancelled before this call, it resolves as
    /// cancelled without dispatching any attempt.
    pub fn start(self, cq: SharedQueue) -> PendingOp<C::Output, OperationError> {
        let (completer, pending) = PendingOp::with_handle(self.handle.clone());
        if self.shared.is_cancelled() {
            let location = self.call.location();
            self.shared.transition(RetryState::Cancelled);
            completer.complete(self.call.finish(OperationError::Cancelled { location }));
            return pending;
        }

        let queue = Arc::clone(&cq);
        cq.spawn(Box::pin(async move {
            let result = self.run(&queue).await;
            completer.complete(result);
        }));
        pending
    }

    async fn run(mut self, cq: &SharedQueue) -> ClientResult<C::Output> {
        let location = self.call.location();
        loop {
            if !self.shared.begin_attempt() {
                return self.cancelled();
            }

            let (status, dispatched) = match self.call.attempt(cq) {
                Err(status) => (status, false),
                Ok(pending) => {
                    if self.shared.wait_on(RetryState::Attempting, pending.handle()) {
                        pending.cancel();
                    }
                    let result = pending.await;
                    // A result that arrived is honoured even if a cancel
                    // crossed it; cancellation only stops further attempts.
                    match self.call.on_attempt(result) {
                        AttemptVerdict::Done(output) => {
                            self.shared.transition(RetryState::Succeeded);
                            return Ok(output);
                        }
                        AttemptVerdict::Failed { status, dispatched } => (status, dispatched),
                    }
                }
            };

            if self.shared.is_cancelled() {
                return self.cancelled();
            }

            if dispatched && !self.call.idempotency().is_idempotent() {
                warn!(location, %status, "non-idempotent request failed, not retrying");
                return self.fail(OperationError::NonIdempotentFailure { location, status });
            }

            if !self.retry_policy.on_failure(&status) {
                let error = if self.retry_policy.is_permanent_failure(&status) {
                    OperationError::PermanentError { location, status }
                } else {
                    OperationError::TooManyTransientErrors { location, status }
                };
                warn!(location, %error, "giving up");
                return self.fail(error);
            }

            let delay = self.backoff_policy.on_completion();
            debug!(location, %status, ?delay, "attempt failed, backing off");

            let timer = cq.make_relative_timer(delay);
            if self.shared.wait_on(RetryState::Backoff, timer.handle()) {
                timer.cancel();
            }
            let fired = timer.await;
            if self.shared.is_cancelled() || fired.is_err() {
                // A timer that fires after cancel() must not start an attempt.
                return self.cancelled();
            }
        }
    }

    fn cancelled(self) -> ClientResult<C::Output> {
        let location = self.call.location();
        debug!(location, "operation cancelled");
        self.shared.transition(RetryState::Cancelled);
        self.call.finish(OperationError::Cancelled { location })
    }

    fn fail(self, error: OperationError) -> ClientResult<C::Output> {
        self.shared.transition(RetryState::PermanentlyFailed);
        self.call.finish(error)
    }
}

/// Unary remote call factory: given one request, starts one call.
///
/// Returning `Err` means the call could not be started at all.
pub trait UnaryCall<Req, Res>: Send + 'static {
    /// Starts one call.
    fn call(&mut self, cq: &SharedQueue, request: &Req) -> Result<PendingOp<Res>, Status>;
}

impl<Req, Res, F> UnaryCall<Req, Res> for F
where
    F: FnMut(&SharedQueue, &Req) -> Result<PendingOp<Res>, Status> + Send + 'static,
{
    fn call(&mut self, cq: &SharedQueue, request: &Req) -> Result<PendingOp<Res>, Status> {
        self(cq, request)
    }
}

/// Adapts a [`UnaryCall`] and its request into a [`RetryableCall`].
pub struct UnaryRetryCall<Req, Res, F> {
    location: &'static str,
    request: Req,
    idempotency: Idempotency,
    factory: F,
    _response: PhantomData<fn() -> Res>,
}

impl<Req, Res, F> UnaryRetryCall<Req, Res, F>
where
    F: UnaryCall<Req, Res>,
{
    /// Wraps `factory` for `request`.
    pub fn new(location: &'static str, request: Req, idempotency: Idempotency, factory: F) -> Self {
        Self {
            location,
            request,
            idempotency,
            factory,
            _response: PhantomData,
        }
    }
}

impl<Req, Res, F> RetryableCall for UnaryRetryCall<Req, Res, F>
where
    Req: Send + 'static,
    Res: Send + 'static,
    F: UnaryCall<Req, Res>,
{
    type Response = Res;
    type Output = Res;

    fn location(&self) -> &'static str {
        self.location
    }

    fn idempotency(&self) -> Idempotency {
        self.idempotency
    }

    fn attempt(&mut self, cq: &SharedQueue) -> Result<PendingOp<Res>, Status> {
        self.factory.call(cq, &self.request)
    }

    fn on_attempt(&mut self, result: Result<Res, Status>) -> AttemptVerdict<Res> {
        match result {
            Ok(response) => AttemptVerdict::Done(response),
            Err(status) => AttemptVerdict::Failed {
                status,
                dispatched: true,
            },
        }
    }

    fn finish(self, error: OperationError) -> ClientResult<Res> {
        Err(error)
    }
}

/// Builds a retrying unary operation.
pub fn async_retry_unary<Req, Res, F>(
    location: &'static str,
    retry_policy: Box<dyn RetryPolicy>,
    backoff_policy: Box<dyn BackoffPolicy>,
    idempotency: Idempotency,
    request: Req,
    factory: F,
) -> AsyncRetryOperation<UnaryRetryCall<Req, Res, F>>
where
    Req: Send + 'static,
    Res: Send + 'static,
    F: UnaryCall<Req, Res>,
{
    AsyncRetryOperation::new(
        UnaryRetryCall::new(location, request, idempotency, factory),
        retry_policy,
        backoff_policy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion_queue::{ManualCompletionQueue, ManualResponder};
    use crate::policy::{ExponentialBackoffPolicy, LimitedErrorCountRetryPolicy};
    use std::time::Duration;
    use stratus_protocol::StatusCode;

    fn backoff() -> Box<dyn BackoffPolicy> {
        Box::new(ExponentialBackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(10),
            2.0,
        ))
    }

    fn scripted(
        responder: &Arc<ManualResponder<u32>>,
        idempotency: Idempotency,
        max_failures: u32,
    ) -> AsyncRetryOperation<impl RetryableCall<Output = u32>> {
        let responder = Arc::clone(responder);
        async_retry_unary(
            "test call",
            Box::new(LimitedErrorCountRetryPolicy::new(max_failures)),
            backoff(),
            idempotency,
            (),
            move |_cq: &SharedQueue, _req: &()| Ok(responder.issue()),
        )
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let responder = Arc::new(ManualResponder::new());

        let op = scripted(&responder, Idempotency::Idempotent, 3);
        let tracker = op.tracker();
        let pending = op.start(cq);

        responder.next().await.complete(Err(Status::unavailable("busy")));
        manual.next_timer().await.fire();
        responder.next().await.complete(Ok(9));

        assert_eq!(pending.await, Ok(9));
        assert_eq!(tracker.state(), RetryState::Succeeded);
        assert_eq!(tracker.attempts(), 2);
    }

    #[tokio::test]
    async fn exhausted_budget_reports_transient_errors() {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let responder = Arc::new(ManualResponder::new());

        let op = scripted(&responder, Idempotency::Idempotent, 2);
        let pending = op.start(cq);

        for _ in 0..2 {
            responder.next().await.complete(Err(Status::unavailable("busy")));
            manual.next_timer().await.fire();
        }
        responder.next().await.complete(Err(Status::unavailable("still busy")));

        let err = pending.await.unwrap_err();
        assert!(matches!(err, OperationError::TooManyTransientErrors { .. }));
        assert_eq!(responder.issued(), 3);
        assert_eq!(manual.timers_created(), 2);
    }

    #[tokio::test]
    async fn permanent_error_stops_immediately() {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let responder = Arc::new(ManualResponder::new());

        let pending = scripted(&responder, Idempotency::Idempotent, 5).start(cq);
        responder
            .next()
            .await
            .complete(Err(Status::permission_denied("nope")));

        let err = pending.await.unwrap_err();
        assert!(matches!(err, OperationError::PermanentError { .. }));
        assert_eq!(err.code(), StatusCode::PermissionDenied);
        assert_eq!(manual.timers_created(), 0);
    }

    #[tokio::test]
    async fn non_idempotent_request_is_not_retried() {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let responder = Arc::new(ManualResponder::new());

        let pending = scripted(&responder, Idempotency::NonIdempotent, 5).start(cq);
        responder.next().await.complete(Err(Status::unavailable("busy")));

        let err = pending.await.unwrap_err();
        assert!(matches!(err, OperationError::NonIdempotentFailure { .. }));
        assert_eq!(responder.issued(), 1);
    }

    #[tokio::test]
    async fn setup_failure_of_non_idempotent_request_is_retried() {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let responder = Arc::new(ManualResponder::<u32>::new());
        let mut first = true;
        let source = Arc::clone(&responder);

        let op = async_retry_unary(
            "setup",
            Box::new(LimitedErrorCountRetryPolicy::new(3)),
            backoff(),
            Idempotency::NonIdempotent,
            (),
            move |_cq: &SharedQueue, _req: &()| {
                if std::mem::take(&mut first) {
                    Err(Status::unavailable("no channel"))
                } else {
                    Ok(source.issue())
                }
            },
        );
        let pending = op.start(cq);

        manual.next_timer().await.fire();
        responder.next().await.complete(Ok(1));
        assert_eq!(pending.await, Ok(1));
    }

    #[tokio::test]
    async fn cancel_before_start_dispatches_nothing() {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let responder = Arc::new(ManualResponder::new());

        let op = scripted(&responder, Idempotency::Idempotent, 5);
        op.cancel();
        let tracker = op.tracker();
        let err = op.start(cq).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(responder.issued(), 0);
        assert_eq!(tracker.state(), RetryState::Cancelled);
    }

    #[tokio::test]
    async fn cancel_racing_success_reports_success() {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let responder = Arc::new(ManualResponder::new());

        let op = scripted(&responder, Idempotency::Idempotent, 5);
        let handle = op.handle();
        let pending = op.start(cq);

        let attempt = responder.next().await;
        handle.cancel();
        assert!(attempt.is_cancelled());
        attempt.complete(Ok(5));

        assert_eq!(pending.await, Ok(5));
    }

    #[tokio::test]
    async fn cancel_during_attempt_stops_retries() {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let responder = Arc::new(ManualResponder::new());

        let op = scripted(&responder, Idempotency::Idempotent, 5);
        let handle = op.handle();
        let pending = op.start(cq);

        let attempt = responder.next().await;
        handle.cancel();
        attempt.complete(Err(Status::cancelled("call cancelled")));

        assert!(pending.await.unwrap_err().is_cancelled());
        assert_eq!(manual.timers_created(), 0);
    }

    #[tokio::test]
    async fn cancel_during_backoff_wins_even_if_timer_fires() {
        for timer_reports_cancel in [true, false] {
            let manual = Arc::new(ManualCompletionQueue::new());
            let cq: SharedQueue = manual.clone();
            let responder = Arc::new(ManualResponder::new());

            let op = scripted(&responder, Idempotency::Idempotent, 5);
            let handle = op.handle();
            let tracker = op.tracker();
            let pending = op.start(cq);

            responder.next().await.complete(Err(Status::unavailable("busy")));
            let timer = manual.next_timer().await;
            handle.cancel();
            assert!(timer.is_cancelled());
            if timer_reports_cancel {
                timer.report_cancelled();
            } else {
                timer.fire();
            }

            assert!(pending.await.unwrap_err().is_cancelled());
            assert_eq!(responder.issued(), 1);
            assert_eq!(tracker.state(), RetryState::Cancelled);
        }
    }

    #[tokio::test]
    async fn cancel_after_completion_is_noop() {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let responder = Arc::new(ManualResponder::new());

        let op = scripted(&responder, Idempotency::Idempotent, 5);
        let handle = op.handle();
        let tracker = op.tracker();
        let pending = op.start(cq);
        responder.next().await.complete(Ok(3));
        assert_eq!(pending.await, Ok(3));

        handle.cancel();
        handle.cancel();
        assert_eq!(tracker.state(), RetryState::Succeeded);
    }
}
