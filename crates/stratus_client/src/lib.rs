//! # Stratus Client
//!
//! Reliability layer between application code and a remote data service.
//!
//! This crate provides:
//! - A completion-queue executor abstraction with cancelable operations
//! - Retry, backoff and idempotency policies
//! - `AsyncRetryOperation`, a retry state machine around one remote call
//! - Bulk apply with per-entry merge and partial retry
//! - `MutationBatcher`, an admission-controlled front end for small writes
//!
//! ## Architecture
//!
//! Every remote call is issued through a [`MutationTransport`] and observed
//! as a [`PendingOp`] on a caller-owned [`CompletionQueue`]:
//! 1. An `AsyncRetryOperation` starts an attempt and waits for it
//! 2. On failure it consults the idempotency and retry policies
//! 3. If allowed, it waits on a backoff timer and tries again
//!
//! Bulk applies use the same loop; after every attempt the per-entry
//! outcomes are merged and only the retryable entries are resent.
//!
//! ## Key Invariants
//!
//! - Every operation resolves exactly once
//! - A dispatched non-idempotent request is never resent
//! - A result that arrived wins over a concurrent cancel
//! - A cancel during backoff always wins over the timer
//! - Batcher admission is strictly FIFO

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod batcher;
mod bulk;
mod completion_queue;
mod config;
mod error;
mod policy;
mod retry;
mod table;
mod transport;

pub use batcher::{AdmittedCallback, Admission, BatcherStats, CompletedCallback, MutationBatcher};
pub use bulk::{
    async_bulk_apply, merge, AsyncBulkApply, BulkMutatorState, FailedMutation, MergeOutcome,
    PendingEntry,
};
pub use completion_queue::{
    run_async, AbandonedError, BoxFuture, Completer, CompletionQueue, ManualCompletionQueue,
    ManualResponder, OperationHandle, ParkedTimer, PendingOp, SharedQueue, TokioCompletionQueue,
};
pub use config::{BatcherConfig, ClientConfig, RetryConfig, RetryLimit};
pub use error::{ClientResult, OperationError};
pub use policy::{
    is_transient, AlwaysRetryPolicy, BackoffPolicy, ExponentialBackoffPolicy, Idempotency,
    IdempotencyPolicy, LimitedErrorCountRetryPolicy, LimitedTimeRetryPolicy, MutationPolicies,
    RetryPolicy, SafeIdempotentMutationPolicy,
};
pub use retry::{
    async_retry_unary, AsyncRetryOperation, AttemptVerdict, RetryState, RetryTracker,
    RetryableCall, UnaryCall, UnaryRetryCall,
};
pub use table::Table;
pub use transport::{BulkReply, MockTransport, MutationTransport};
