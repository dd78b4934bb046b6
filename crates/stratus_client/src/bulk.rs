//! Bulk mutation merge and the retrying bulk-apply call.
//!
//! A bulk call reports one status per entry. After every attempt the
//! entries are partitioned into succeeded, retryable and failed. Only the
//! retryable subset is sent on the next attempt, but each entry keeps the
//! index it had in the caller's original list so failures are reported in
//! the caller's terms.

use crate::completion_queue::{PendingOp, SharedQueue};
use crate::error::{ClientResult, OperationError};
use crate::policy::{BackoffPolicy, Idempotency, IdempotencyPolicy, RetryPolicy};
use crate::retry::{AsyncRetryOperation, AttemptVerdict, RetryableCall};
use crate::transport::MutationTransport;
use std::sync::Arc;
use stratus_protocol::{BulkMutationRequest, BulkMutationResponse, RowMutation, Status};
use tracing::{debug, warn};

const BULK_LOCATION: &str = "bulk_apply";

/// A mutation that did not ultimately succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMutation {
    /// Position in the caller's original list.
    pub original_index: usize,
    /// The mutation itself.
    pub mutation: RowMutation,
    /// Why it failed.
    pub error: OperationError,
}

impl FailedMutation {
    /// Terminal status of the mutation.
    pub fn status(&self) -> Status {
        self.error.status()
    }
}

/// An entry still waiting for a definitive outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Position in the caller's original list.
    pub original_index: usize,
    /// The mutation.
    pub mutation: RowMutation,
    /// Whether the entry may be resent after a dispatched failure.
    pub idempotent: bool,
    /// Status of the most recent attempt, `Ok` before the first one.
    pub last_status: Status,
}

impl PendingEntry {
    /// Creates an entry that has not been attempted.
    pub fn new(original_index: usize, mutation: RowMutation, idempotent: bool) -> Self {
        Self {
            original_index,
            mutation,
            idempotent,
            last_status: Status::ok(),
        }
    }

    fn retry_after(&self, status: &Status) -> PendingEntry {
        PendingEntry {
            last_status: status.clone(),
            ..self.clone()
        }
    }

    fn fail(&self, error: OperationError) -> FailedMutation {
        FailedMutation {
            original_index: self.original_index,
            mutation: self.mutation.clone(),
            error,
        }
    }
}

/// Partition produced by [`merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Original indices of entries that succeeded.
    pub succeeded: Vec<usize>,
    /// Entries to send again, in their current order.
    pub retryable: Vec<PendingEntry>,
    /// Entries that failed for good.
    pub failed: Vec<FailedMutation>,
}

/// Merges the outcome of one bulk attempt into the pending entries.
///
/// `pending[i]` is the entry sent at position `i` of the request. An entry
/// the response does not mention is undetermined: it is retryable if
/// idempotent and fails otherwise. When `outcome` is a call-level error
/// every entry is undetermined. Only the first status reported for a
/// position counts; positions outside the request are ignored.
///
/// Merging is pure: the same inputs always produce the same partition.
pub fn merge(
    pending: &[PendingEntry],
    outcome: &Result<BulkMutationResponse, Status>,
    classifier: &dyn RetryPolicy,
) -> MergeOutcome {
    let mut reported: Vec<Option<&Status>> = vec![None; pending.len()];
    let undetermined = match outcome {
        Ok(response) => {
            if let Err(error) = response.validate(pending.len()) {
                warn!(%error, "response reports entries outside the request, ignored");
            }
            for entry in &response.entries {
                match reported.get_mut(entry.index) {
                    Some(slot) if slot.is_none() => *slot = Some(&entry.status),
                    Some(_) => debug!(index = entry.index, "duplicate entry status ignored"),
                    None => {}
                }
            }
            Status::unavailable("stream ended before the entry's outcome was reported")
        }
        Err(status) => status.clone(),
    };

    let mut merged = MergeOutcome::default();
    for (entry, status) in pending.iter().zip(reported) {
        match status {
            Some(status) if status.is_ok() => merged.succeeded.push(entry.original_index),
            Some(status) if classifier.is_permanent_failure(status) => {
                merged.failed.push(entry.fail(OperationError::PermanentError {
                    location: BULK_LOCATION,
                    status: status.clone(),
                }))
            }
            Some(status) if entry.idempotent => merged.retryable.push(entry.retry_after(status)),
            Some(status) => merged.failed.push(entry.fail(OperationError::NonIdempotentFailure {
                location: BULK_LOCATION,
                status: status.clone(),
            })),
            None if entry.idempotent => merged.retryable.push(entry.retry_after(&undetermined)),
            None => merged
                .failed
                .push(entry.fail(OperationError::UndeterminedNonIdempotent {
                    status: undetermined.clone(),
                })),
        }
    }
    merged
}

/// Progress of one bulk apply across attempts.
#[derive(Debug)]
pub struct BulkMutatorState {
    table: String,
    pending: Vec<PendingEntry>,
    failed: Vec<FailedMutation>,
    succeeded: usize,
    call_failure: Option<Status>,
    classifier: Box<dyn RetryPolicy>,
}

impl BulkMutatorState {
    /// Starts tracking `mutations`; `classifier` decides which statuses
    /// are permanent.
    pub fn new(
        table: impl Into<String>,
        mutations: Vec<RowMutation>,
        idempotency: &dyn IdempotencyPolicy<RowMutation>,
        classifier: Box<dyn RetryPolicy>,
    ) -> Self {
        let pending = mutations
            .into_iter()
            .enumerate()
            .map(|(index, mutation)| {
                let idempotent = idempotency.is_idempotent(&mutation);
                PendingEntry::new(index, mutation, idempotent)
            })
            .collect();
        Self {
            table: table.into(),
            pending,
            failed: Vec::new(),
            succeeded: 0,
            call_failure: None,
            classifier,
        }
    }

    /// Returns true while some entry has no definitive outcome.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Entries still waiting.
    pub fn pending(&self) -> &[PendingEntry] {
        &self.pending
    }

    /// Number of entries that succeeded so far.
    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    /// Request carrying every pending entry.
    pub fn next_request(&self) -> BulkMutationRequest {
        BulkMutationRequest::new(
            self.table.clone(),
            self.pending.iter().map(|e| e.mutation.clone()).collect(),
        )
    }

    /// Records that the last attempt could not be started.
    pub fn on_setup_failure(&mut self, status: Status) {
        self.call_failure = Some(status);
    }

    /// Folds the outcome of the last attempt into the state.
    pub fn on_attempt(&mut self, outcome: Result<BulkMutationResponse, Status>) {
        let merged = merge(&self.pending, &outcome, self.classifier.as_ref());
        debug!(
            succeeded = merged.succeeded.len(),
            retryable = merged.retryable.len(),
            failed = merged.failed.len(),
            "merged bulk attempt"
        );
        self.succeeded += merged.succeeded.len();
        self.pending = merged.retryable;
        self.failed.extend(merged.failed);
        self.call_failure = outcome.err();
    }

    fn take_failures(&mut self) -> Vec<FailedMutation> {
        let mut failed = std::mem::take(&mut self.failed);
        failed.sort_by_key(|f| f.original_index);
        failed
    }

    /// Ends the apply. Entries still pending fail with a classification
    /// derived from `error`; the result is ordered by original index.
    pub fn finish(mut self, error: OperationError) -> Vec<FailedMutation> {
        let call_failure = self.call_failure.take();
        for entry in std::mem::take(&mut self.pending) {
            let entry_error = match (&error, &call_failure) {
                (OperationError::Cancelled { location }, _) => OperationError::Cancelled {
                    location: *location,
                },
                (_, Some(status)) => OperationError::ConnectionError {
                    status: status.clone(),
                },
                (OperationError::TooManyTransientErrors { location, .. }, None) => {
                    OperationError::TooManyTransientErrors {
                        location: *location,
                        status: entry.last_status.clone(),
                    }
                }
                (other, None) => other.clone(),
            };
            self.failed.push(entry.fail(entry_error));
        }
        self.take_failures()
    }
}

/// Retryable unit of work applying a list of mutations in bulk.
///
/// An attempt counts as successful once no entry is left to retry; a call
/// that completes but leaves retryable entries is reported to the retry
/// engine as a transient failure with an `Ok` status.
pub struct AsyncBulkApply {
    transport: Arc<dyn MutationTransport>,
    state: BulkMutatorState,
}

impl AsyncBulkApply {
    /// Creates the call.
    pub fn new(transport: Arc<dyn MutationTransport>, state: BulkMutatorState) -> Self {
        Self { transport, state }
    }

    /// Current progress.
    pub fn state(&self) -> &BulkMutatorState {
        &self.state
    }
}

impl RetryableCall for AsyncBulkApply {
    type Response = BulkMutationResponse;
    type Output = Vec<FailedMutation>;

    fn location(&self) -> &'static str {
        BULK_LOCATION
    }

    fn idempotency(&self) -> Idempotency {
        // Entry-level idempotency is enforced by the merge.
        Idempotency::Idempotent
    }

    fn attempt(&mut self, cq: &SharedQueue) -> Result<PendingOp<BulkMutationResponse>, Status> {
        let request = self.state.next_request();
        debug!(entries = request.len(), "sending bulk attempt");
        self.transport.mutate_rows(cq, request).map_err(|status| {
            self.state.on_setup_failure(status.clone());
            status
        })
    }

    fn on_attempt(
        &mut self,
        result: Result<BulkMutationResponse, Status>,
    ) -> AttemptVerdict<Vec<FailedMutation>> {
        let status = match &result {
            Ok(_) => Status::ok(),
            Err(status) => status.clone(),
        };
        self.state.on_attempt(result);
        if self.state.has_pending() {
            AttemptVerdict::Failed {
                status,
                dispatched: true,
            }
        } else {
            AttemptVerdict::Done(self.state.take_failures())
        }
    }

    fn finish(self, error: OperationError) -> ClientResult<Vec<FailedMutation>> {
        Ok(self.state.finish(error))
    }
}

/// Builds a retrying bulk apply of `mutations` to `table`.
///
/// The retry policy template doubles as the classifier for per-entry
/// statuses.
pub fn async_bulk_apply(
    transport: Arc<dyn MutationTransport>,
    table: impl Into<String>,
    mutations: Vec<RowMutation>,
    retry_policy: Box<dyn RetryPolicy>,
    backoff_policy: Box<dyn BackoffPolicy>,
    idempotency: &dyn IdempotencyPolicy<RowMutation>,
) -> AsyncRetryOperation<AsyncBulkApply> {
    let state = BulkMutatorState::new(table, mutations, idempotency, retry_policy.clone_box());
    AsyncRetryOperation::new(
        AsyncBulkApply::new(transport, state),
        retry_policy,
        backoff_policy,
    )
}
