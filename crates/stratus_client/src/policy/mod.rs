//! Retry, backoff and idempotency strategies.
//!
//! Policies are configured once as templates and cloned into a fresh
//! instance for every operation (`clone_box`), so no state is shared
//! between concurrent operations.

mod backoff;
mod idempotency;
mod retry;

pub use backoff::{BackoffPolicy, ExponentialBackoffPolicy};
pub use idempotency::{AlwaysRetryPolicy, Idempotency, IdempotencyPolicy, SafeIdempotentMutationPolicy};
pub use retry::{
    is_transient, LimitedErrorCountRetryPolicy, LimitedTimeRetryPolicy, RetryPolicy,
};

use stratus_protocol::RowMutation;

/// Policy templates for mutation operations.
#[derive(Debug, Clone)]
pub struct MutationPolicies {
    /// Retry budget template.
    pub retry: Box<dyn RetryPolicy>,
    /// Backoff template.
    pub backoff: Box<dyn BackoffPolicy>,
    /// Which mutations may be resent.
    pub idempotency: Box<dyn IdempotencyPolicy<RowMutation>>,
}

impl MutationPolicies {
    /// Bundles three templates.
    pub fn new(
        retry: Box<dyn RetryPolicy>,
        backoff: Box<dyn BackoffPolicy>,
        idempotency: Box<dyn IdempotencyPolicy<RowMutation>>,
    ) -> Self {
        Self {
            retry,
            backoff,
            idempotency,
        }
    }

    /// Fresh retry policy for one operation.
    pub fn fresh_retry(&self) -> Box<dyn RetryPolicy> {
        self.retry.clone_box()
    }

    /// Fresh backoff policy for one operation.
    pub fn fresh_backoff(&self) -> Box<dyn BackoffPolicy> {
        self.backoff.clone_box()
    }
}
