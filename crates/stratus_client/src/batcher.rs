//! Admission-controlled mutation batcher.
//!
//! Callers admit single row mutations; the batcher groups them into bulk
//! calls. A mutation is appended to the open batch if it fits within the
//! per-batch and outstanding limits, otherwise it waits in a FIFO queue.
//! The open batch is sent as soon as an in-flight slot is free, so batches
//! only grow while every slot is busy.
//!
//! The queue is drained strictly from the front: a small mutation never
//! overtakes a larger one that arrived earlier.
//!
//! All state lives behind one mutex. User callbacks and batch starts are
//! collected while it is held and run after it is released.

use crate::bulk::{async_bulk_apply, FailedMutation};
use crate::completion_queue::{AbandonedError, Completer, PendingOp, SharedQueue};
use crate::config::BatcherConfig;
use crate::error::{ClientResult, OperationError};
use crate::policy::MutationPolicies;
use crate::transport::MutationTransport;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use stratus_protocol::RowMutation;
use tracing::{debug, trace};

/// Runs once a mutation joins a batch.
pub type AdmittedCallback = Box<dyn FnOnce() + Send>;

/// Runs once a mutation reaches its terminal outcome.
pub type CompletedCallback = Box<dyn FnOnce(Result<(), OperationError>) + Send>;

/// Future-based handles for one admitted mutation.
#[derive(Debug)]
pub struct Admission {
    /// Resolves when the mutation joins a batch.
    pub admitted: PendingOp<(), OperationError>,
    /// Resolves with the mutation's terminal outcome.
    pub completed: PendingOp<(), OperationError>,
}

/// Snapshot of batcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Batches sent and not yet finished.
    pub outstanding_batches: usize,
    /// Bytes admitted and not yet completed.
    pub outstanding_size: usize,
    /// Mutations in the open, unsent batch.
    pub open_batch_len: usize,
    /// Mutations waiting for admission.
    pub queued: usize,
    /// Batches sent so far.
    pub batches_flushed: u64,
    /// Mutations whose batch finished, successfully or not.
    pub mutations_completed: u64,
    /// Completed mutations that failed.
    pub mutations_failed: u64,
    /// Mutations refused at admission.
    pub mutations_rejected: u64,
}

struct QueuedMutation {
    mutation: RowMutation,
    size: usize,
    count: usize,
    on_admitted: AdmittedCallback,
    on_completed: CompletedCallback,
}

#[derive(Default)]
struct Batch {
    mutations: Vec<RowMutation>,
    callbacks: Vec<CompletedCallback>,
    size: usize,
    count: usize,
}

impl Batch {
    fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Work collected under the lock and run after it is released.
#[derive(Default)]
struct Deferred {
    admitted: Vec<AdmittedCallback>,
    batches: Vec<Batch>,
    idle: Vec<Completer<(), OperationError>>,
}

#[derive(Default)]
struct BatcherState {
    queue: VecDeque<QueuedMutation>,
    open: Batch,
    outstanding_batches: usize,
    outstanding_size: usize,
    /// Finished batches whose completion callbacks are still running.
    completing: usize,
    idle_waiters: Vec<Completer<(), OperationError>>,
    batches_flushed: u64,
    mutations_completed: u64,
    mutations_failed: u64,
    mutations_rejected: u64,
}

impl BatcherState {
    fn can_append(&self, config: &BatcherConfig, size: usize, count: usize) -> bool {
        self.outstanding_size + size <= config.max_outstanding_size
            && self.open.size + size <= config.max_size_per_batch
            && self.open.count + count <= config.max_mutations_per_batch
    }

    fn append(&mut self, queued: QueuedMutation, deferred: &mut Deferred) {
        self.outstanding_size += queued.size;
        self.open.size += queued.size;
        self.open.count += queued.count;
        self.open.mutations.push(queued.mutation);
        self.open.callbacks.push(queued.on_completed);
        deferred.admitted.push(queued.on_admitted);
    }

    /// Sends the open batch if it has entries and a slot is free.
    fn flush_if_possible(&mut self, config: &BatcherConfig, deferred: &mut Deferred) -> bool {
        if self.open.is_empty() || self.outstanding_batches >= config.max_batches {
            return false;
        }
        self.outstanding_batches += 1;
        self.batches_flushed += 1;
        deferred.batches.push(std::mem::take(&mut self.open));
        true
    }

    fn try_admit(&mut self, config: &BatcherConfig, deferred: &mut Deferred) {
        loop {
            while let Some(front) = self.queue.front() {
                if !self.can_append(config, front.size, front.count) {
                    break;
                }
                if let Some(queued) = self.queue.pop_front() {
                    self.append(queued, deferred);
                }
            }
            if !self.flush_if_possible(config, deferred) {
                return;
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty()
            && self.open.is_empty()
            && self.outstanding_batches == 0
            && self.completing == 0
    }

    fn release_idle_waiters(&mut self, deferred: &mut Deferred) {
        if self.is_idle() {
            deferred.idle.append(&mut self.idle_waiters);
        }
    }
}

struct BatcherInner {
    cq: SharedQueue,
    transport: Arc<dyn MutationTransport>,
    table: String,
    config: BatcherConfig,
    policies: MutationPolicies,
    state: Mutex<BatcherState>,
}

/// Completion callbacks of a sent batch.
///
/// If the task waiting on the batch is dropped, for example by a queue
/// shutdown, the callbacks still run once with an abandoned error.
struct InFlightBatch {
    inner: Arc<BatcherInner>,
    callbacks: Vec<CompletedCallback>,
    size: usize,
}

impl InFlightBatch {
    fn finish(mut self, result: ClientResult<Vec<FailedMutation>>) {
        let callbacks = std::mem::take(&mut self.callbacks);
        self.inner.on_batch_done(callbacks, self.size, result);
    }
}

impl Drop for InFlightBatch {
    fn drop(&mut self) {
        if self.callbacks.is_empty() {
            return;
        }
        let callbacks = std::mem::take(&mut self.callbacks);
        debug!(entries = callbacks.len(), "batch dropped before completion");
        self.inner
            .on_batch_done(callbacks, self.size, Err(OperationError::abandoned()));
    }
}

/// Groups individually admitted mutations into bulk calls.
///
/// Cloning shares the batcher.
#[derive(Clone)]
pub struct MutationBatcher {
    inner: Arc<BatcherInner>,
}

impl MutationBatcher {
    /// Creates a batcher sending to `table` through `transport`.
    ///
    /// `max_size_per_batch` is clamped to `max_outstanding_size`.
    pub fn new(
        cq: SharedQueue,
        transport: Arc<dyn MutationTransport>,
        table: impl Into<String>,
        config: BatcherConfig,
        policies: MutationPolicies,
    ) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                cq,
                transport,
                table: table.into(),
                config: config.effective(),
                policies,
                state: Mutex::new(BatcherState::default()),
            }),
        }
    }

    /// Limits in effect.
    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Admits `mutation`, reporting progress through futures.
    pub fn admit(&self, mutation: RowMutation) -> Admission {
        let (admitted_tx, admitted) = PendingOp::channel();
        let (completed_tx, completed) = PendingOp::channel();
        self.admit_with(
            mutation,
            move || admitted_tx.complete(Ok(())),
            move |result| completed_tx.complete(result),
        );
        Admission {
            admitted,
            completed,
        }
    }

    /// Admits `mutation`, reporting progress through callbacks.
    ///
    /// Never blocks. `on_admitted` runs once the mutation joins a batch and
    /// `on_completed` once its outcome is final. A mutation with no cell
    /// mutations, or one too large for a single batch, is rejected: both
    /// callbacks run before this returns.
    pub fn admit_with(
        &self,
        mutation: RowMutation,
        on_admitted: impl FnOnce() + Send + 'static,
        on_completed: impl FnOnce(Result<(), OperationError>) + Send + 'static,
    ) {
        let size = mutation.wire_size();
        let count = mutation.mutation_count();
        if let Some(error) = self.inner.rejection(size, count) {
            debug!(%error, "mutation rejected");
            self.inner.state.lock().mutations_rejected += 1;
            on_admitted();
            on_completed(Err(error));
            return;
        }

        let queued = QueuedMutation {
            mutation,
            size,
            count,
            on_admitted: Box::new(on_admitted),
            on_completed: Box::new(on_completed),
        };
        let mut deferred = Deferred::default();
        {
            let mut state = self.inner.state.lock();
            if !state.queue.is_empty() || !state.can_append(&self.inner.config, size, count) {
                trace!(size, queued = state.queue.len(), "mutation queued");
                state.queue.push_back(queued);
            } else {
                state.append(queued, &mut deferred);
                state.flush_if_possible(&self.inner.config, &mut deferred);
            }
        }
        self.inner.run_deferred(deferred);
    }

    /// Resolves once every admitted or queued mutation has completed.
    pub fn wait_for_no_pending_requests(&self) -> PendingOp<(), OperationError> {
        let mut state = self.inner.state.lock();
        if state.is_idle() {
            return PendingOp::ready(Ok(()));
        }
        let (completer, pending) = PendingOp::channel();
        state.idle_waiters.push(completer);
        pending
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BatcherStats {
        let state = self.inner.state.lock();
        BatcherStats {
            outstanding_batches: state.outstanding_batches,
            outstanding_size: state.outstanding_size,
            open_batch_len: state.open.mutations.len(),
            queued: state.queue.len(),
            batches_flushed: state.batches_flushed,
            mutations_completed: state.mutations_completed,
            mutations_failed: state.mutations_failed,
            mutations_rejected: state.mutations_rejected,
        }
    }
}

impl fmt::Debug for MutationBatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationBatcher")
            .field("table", &self.inner.table)
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl BatcherInner {
    fn rejection(&self, size: usize, count: usize) -> Option<OperationError> {
        if count == 0 {
            Some(OperationError::rejected("mutation has no cell mutations"))
        } else if size > self.config.max_size_per_batch {
            Some(OperationError::rejected(format!(
                "mutation of {size} bytes exceeds max_size_per_batch of {}",
                self.config.max_size_per_batch
            )))
        } else if count > self.config.max_mutations_per_batch {
            Some(OperationError::rejected(format!(
                "mutation with {count} cell mutations exceeds max_mutations_per_batch of {}",
                self.config.max_mutations_per_batch
            )))
        } else {
            None
        }
    }

    fn run_deferred(self: &Arc<Self>, deferred: Deferred) {
        for on_admitted in deferred.admitted {
            on_admitted();
        }
        for batch in deferred.batches {
            self.start_batch(batch);
        }
        for waiter in deferred.idle {
            waiter.complete(Ok(()));
        }
    }

    fn start_batch(self: &Arc<Self>, batch: Batch) {
        let Batch {
            mutations,
            callbacks,
            size,
            ..
        } = batch;
        debug!(entries = mutations.len(), size, "flushing batch");

        let pending = async_bulk_apply(
            Arc::clone(&self.transport),
            self.table.clone(),
            mutations,
            self.policies.fresh_retry(),
            self.policies.fresh_backoff(),
            self.policies.idempotency.as_ref(),
        )
        .start(Arc::clone(&self.cq));

        let in_flight = InFlightBatch {
            inner: Arc::clone(self),
            callbacks,
            size,
        };
        self.cq.spawn(Box::pin(async move {
            let result = pending.await;
            in_flight.finish(result);
        }));
    }

    fn on_batch_done(
        self: &Arc<Self>,
        callbacks: Vec<CompletedCallback>,
        size: usize,
        result: ClientResult<Vec<FailedMutation>>,
    ) {
        let outcomes = match result {
            Ok(failed) => {
                let mut outcomes = vec![Ok(()); callbacks.len()];
                for failure in failed {
                    if let Some(slot) = outcomes.get_mut(failure.original_index) {
                        *slot = Err(failure.error);
                    }
                }
                outcomes
            }
            Err(error) => vec![Err(error); callbacks.len()],
        };
        let completed = outcomes.len() as u64;
        let failed = outcomes.iter().filter(|o| o.is_err()).count() as u64;
        debug!(completed, failed, "batch finished");

        {
            let mut state = self.state.lock();
            state.outstanding_batches = state.outstanding_batches.saturating_sub(1);
            state.outstanding_size = state.outstanding_size.saturating_sub(size);
            state.mutations_completed += completed;
            state.mutations_failed += failed;
            state.completing += 1;
        }

        // Callbacks see the finished batch released and may admit more.
        for (on_completed, outcome) in callbacks.into_iter().zip(outcomes) {
            on_completed(outcome);
        }

        let mut deferred = Deferred::default();
        {
            let mut state = self.state.lock();
            state.completing -= 1;
            state.flush_if_possible(&self.config, &mut deferred);
            state.try_admit(&self.config, &mut deferred);
            state.release_idle_waiters(&mut deferred);
        }
        self.run_deferred(deferred);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion_queue::{ManualCompletionQueue, ManualResponder, TokioCompletionQueue};
    use crate::policy::{
        ExponentialBackoffPolicy, LimitedErrorCountRetryPolicy, SafeIdempotentMutationPolicy,
    };
    use crate::transport::MockTransport;
    use std::time::Duration;
    use stratus_protocol::{
        BulkMutationRequest, BulkMutationResponse, MutateRowRequest, Mutation, Status,
    };

    fn policies() -> MutationPolicies {
        MutationPolicies::new(
            Box::new(LimitedErrorCountRetryPolicy::new(3)),
            Box::new(ExponentialBackoffPolicy::new(
                Duration::from_millis(1),
                Duration::from_millis(5),
                2.0,
            )),
            Box::new(SafeIdempotentMutationPolicy),
        )
    }

    fn row(key: &str, value_len: usize) -> RowMutation {
        RowMutation::new(
            key.to_string(),
            vec![Mutation::set_cell("cf", "c", 1, vec![b'x'; value_len])],
        )
    }

    /// Bulk transport whose calls stay open until the test answers them.
    #[derive(Debug, Default)]
    struct HeldTransport {
        responder: ManualResponder<BulkMutationResponse>,
        requests: parking_lot::Mutex<Vec<BulkMutationRequest>>,
    }

    impl MutationTransport for HeldTransport {
        fn mutate_row(
            &self,
            _cq: &SharedQueue,
            _request: MutateRowRequest,
        ) -> Result<PendingOp<()>, Status> {
            Err(Status::new(
                stratus_protocol::StatusCode::Unimplemented,
                "unary not supported",
            ))
        }

        fn mutate_rows(
            &self,
            _cq: &SharedQueue,
            request: BulkMutationRequest,
        ) -> Result<PendingOp<BulkMutationResponse>, Status> {
            self.requests.lock().push(request);
            Ok(self.responder.issue())
        }
    }

    fn batcher_with(
        transport: Arc<dyn MutationTransport>,
        config: BatcherConfig,
    ) -> (Arc<ManualCompletionQueue>, MutationBatcher) {
        let manual = Arc::new(ManualCompletionQueue::new());
        let cq: SharedQueue = manual.clone();
        let batcher = MutationBatcher::new(cq, transport, "t", config, policies());
        (manual, batcher)
    }

    #[tokio::test]
    async fn single_mutation_is_flushed_immediately() {
        let transport = Arc::new(MockTransport::new());
        let (_cq, batcher) = batcher_with(transport.clone(), BatcherConfig::default());

        let admission = batcher.admit(row("a", 10));
        assert_eq!(admission.admitted.await, Ok(()));
        assert_eq!(admission.completed.await, Ok(()));
        batcher.wait_for_no_pending_requests().await.unwrap();

        assert_eq!(transport.bulk_requests().len(), 1);
        let stats = batcher.stats();
        assert_eq!(stats.batches_flushed, 1);
        assert_eq!(stats.mutations_completed, 1);
        assert_eq!(stats.outstanding_size, 0);
    }

    #[tokio::test]
    async fn oversized_mutation_is_rejected_without_a_batch() {
        let transport = Arc::new(MockTransport::new());
        let config = BatcherConfig::default().with_max_size_per_batch(64);
        let (_cq, batcher) = batcher_with(transport.clone(), config);

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (a, c) = (Arc::clone(&order), Arc::clone(&order));
        batcher.admit_with(
            row("big", 1000),
            move || a.lock().push("admitted"),
            move |result| {
                assert!(matches!(result, Err(OperationError::Rejected { .. })));
                c.lock().push("completed");
            },
        );

        assert_eq!(*order.lock(), vec!["admitted", "completed"]);
        assert_eq!(batcher.stats().outstanding_batches, 0);
        assert_eq!(batcher.stats().mutations_rejected, 1);
        assert!(transport.bulk_requests().is_empty());
    }

    #[tokio::test]
    async fn empty_and_overcounted_mutations_are_rejected() {
        let transport = Arc::new(MockTransport::new());
        let config = BatcherConfig::default().with_max_mutations_per_batch(1);
        let (_cq, batcher) = batcher_with(transport, config);

        let empty = batcher.admit(RowMutation::new("e", vec![]));
        assert!(empty.completed.await.is_err());

        let two = RowMutation::new("t", vec![Mutation::DeleteFromRow, Mutation::DeleteFromRow]);
        let err = batcher.admit(two).completed.await.unwrap_err();
        assert!(err.to_string().contains("max_mutations_per_batch"));
    }

    #[tokio::test]
    async fn queued_mutations_keep_arrival_order() {
        let transport = Arc::new(HeldTransport::default());
        let config = BatcherConfig::default()
            .with_max_batches(1)
            .with_max_size_per_batch(row("b", 40).wire_size() * 2);
        let (_cq, batcher) = batcher_with(transport.clone(), config);

        let a = batcher.admit(row("a", 40));
        let b = batcher.admit(row("b", 40));
        let c = batcher.admit(row("c", 40));
        let d = batcher.admit(row("d", 40));

        // A went out alone; B and C fill the open batch; D must wait.
        a.admitted.await.unwrap();
        b.admitted.await.unwrap();
        c.admitted.await.unwrap();
        let stats = batcher.stats();
        assert_eq!(stats.outstanding_batches, 1);
        assert_eq!(stats.open_batch_len, 2);
        assert_eq!(stats.queued, 1);

        transport.responder.next().await.complete(Ok(BulkMutationResponse::all_ok(1)));
        a.completed.await.unwrap();
        d.admitted.await.unwrap();

        transport.responder.next().await.complete(Ok(BulkMutationResponse::all_ok(2)));
        b.completed.await.unwrap();
        c.completed.await.unwrap();
        transport.responder.next().await.complete(Ok(BulkMutationResponse::all_ok(1)));
        d.completed.await.unwrap();

        let keys: Vec<Vec<_>> = transport
            .requests
            .lock()
            .iter()
            .map(|r| r.entries.iter().map(|e| e.row_key.clone()).collect())
            .collect();
        assert_eq!(keys, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
        batcher.wait_for_no_pending_requests().await.unwrap();
    }

    #[tokio::test]
    async fn per_entry_failures_reach_their_own_callbacks() {
        let transport = Arc::new(HeldTransport::default());
        let config = BatcherConfig::default().with_max_batches(1);
        let (_cq, batcher) = batcher_with(transport.clone(), config);

        let first = batcher.admit(row("first", 4));
        let ok = batcher.admit(row("ok", 4));
        let bad = batcher.admit(row("bad", 4));

        transport.responder.next().await.complete(Ok(BulkMutationResponse::all_ok(1)));
        first.completed.await.unwrap();

        transport.responder.next().await.complete(Ok(BulkMutationResponse::new()
            .with_entry(0, Status::ok())
            .with_entry(1, Status::permission_denied("no"))));
        ok.completed.await.unwrap();
        let err = bad.completed.await.unwrap_err();
        assert!(matches!(err, OperationError::PermanentError { .. }));

        batcher.wait_for_no_pending_requests().await.unwrap();
        assert_eq!(batcher.stats().mutations_failed, 1);
    }

    #[tokio::test]
    async fn outstanding_size_limits_admission() {
        let transport = Arc::new(HeldTransport::default());
        let size = row("a", 100).wire_size();
        let config = BatcherConfig::default()
            .with_max_batches(4)
            .with_max_outstanding_size(size);
        let (_cq, batcher) = batcher_with(transport.clone(), config);

        let a = batcher.admit(row("a", 100));
        let b = batcher.admit(row("b", 100));
        a.admitted.await.unwrap();
        assert_eq!(batcher.stats().queued, 1);
        assert_eq!(batcher.stats().outstanding_size, size);

        transport.responder.next().await.complete(Ok(BulkMutationResponse::all_ok(1)));
        b.admitted.await.unwrap();
        transport.responder.next().await.complete(Ok(BulkMutationResponse::all_ok(1)));
        b.completed.await.unwrap();
        batcher.wait_for_no_pending_requests().await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_no_pending_requests_resolves_after_drain() {
        let transport = Arc::new(HeldTransport::default());
        let (_cq, batcher) = batcher_with(transport.clone(), BatcherConfig::default());

        batcher.wait_for_no_pending_requests().await.unwrap();
        let admission = batcher.admit(row("a", 1));
        let idle = batcher.wait_for_no_pending_requests();
        assert!(!idle.handle().is_finished());

        transport.responder.next().await.complete(Ok(BulkMutationResponse::all_ok(1)));
        idle.await.unwrap();
        admission.completed.await.unwrap();
    }

    #[tokio::test]
    async fn completion_callbacks_see_the_batch_released() {
        let transport = Arc::new(MockTransport::new());
        let (_cq, batcher) = batcher_with(transport, BatcherConfig::default());

        let (tx, rx) = tokio::sync::oneshot::channel();
        let observer = batcher.clone();
        batcher.admit_with(
            row("a", 4),
            || {},
            move |result| {
                let _ = tx.send((result, observer.stats()));
            },
        );

        let (result, stats) = rx.await.unwrap();
        assert_eq!(result, Ok(()));
        assert_eq!(stats.outstanding_batches, 0);
        assert_eq!(stats.outstanding_size, 0);
        assert_eq!(stats.mutations_completed, 1);
    }

    #[tokio::test]
    async fn completion_callback_can_admit_into_the_freed_slot() {
        let transport = Arc::new(HeldTransport::default());
        let config = BatcherConfig::default().with_max_batches(1);
        let (_cq, batcher) = batcher_with(transport.clone(), config);

        let (tx, rx) = tokio::sync::oneshot::channel();
        let chained = batcher.clone();
        batcher.admit_with(
            row("a", 4),
            || {},
            move |_| {
                let _ = tx.send(chained.admit(row("b", 4)));
            },
        );

        transport.responder.next().await.complete(Ok(BulkMutationResponse::all_ok(1)));
        let follow_up = rx.await.unwrap();
        follow_up.admitted.await.unwrap();
        transport.responder.next().await.complete(Ok(BulkMutationResponse::all_ok(1)));
        follow_up.completed.await.unwrap();

        batcher.wait_for_no_pending_requests().await.unwrap();
        assert_eq!(transport.requests.lock().len(), 2);
        assert_eq!(batcher.stats().batches_flushed, 2);
    }

    #[test]
    fn queue_shutdown_still_completes_every_callback_once() {
        let queue = Arc::new(TokioCompletionQueue::with_worker_threads(1).unwrap());
        let cq: SharedQueue = queue.clone();
        let transport = Arc::new(HeldTransport::default());
        let config = BatcherConfig::default().with_max_batches(1);
        let batcher = MutationBatcher::new(cq, transport, "t", config, policies());

        let (tx, rx) = std::sync::mpsc::channel();
        for key in ["sent", "queued"] {
            let tx = tx.clone();
            batcher.admit_with(
                row(key, 4),
                || {},
                move |result| {
                    let _ = tx.send((key, result));
                },
            );
        }
        drop(tx);
        queue.shutdown();

        let mut outcomes: Vec<_> = (0..2)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        outcomes.sort_by_key(|(key, _)| *key);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, "queued");
        assert_eq!(outcomes[1].0, "sent");
        for (_, result) in outcomes {
            assert!(result.unwrap_err().is_cancelled());
        }
    }
}
