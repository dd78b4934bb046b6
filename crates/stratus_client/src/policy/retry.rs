//! Retry budgets.

use std::fmt;
use std::time::{Duration, Instant};
use stratus_protocol::{Status, StatusCode};

/// Returns true if a failure with this status may succeed when retried.
///
/// `Ok` counts as transient: a bulk call that completed cleanly but left
/// retryable entries behind still consumes retry budget.
pub fn is_transient(status: &Status) -> bool {
    matches!(
        status.code,
        StatusCode::Ok
            | StatusCode::Aborted
            | StatusCode::DeadlineExceeded
            | StatusCode::Unavailable
    )
}

/// Decides whether a failed attempt may be retried.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Returns a fresh copy with the original, unconsumed budget.
    fn clone_box(&self) -> Box<dyn RetryPolicy>;

    /// Records a failure. Returns true if the operation should be retried.
    fn on_failure(&mut self, status: &Status) -> bool;

    /// Returns true once the budget is used up.
    fn is_exhausted(&self) -> bool;

    /// Returns true if `status` can never succeed on retry.
    fn is_permanent_failure(&self, status: &Status) -> bool {
        !is_transient(status)
    }
}

impl Clone for Box<dyn RetryPolicy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Tolerates a fixed number of transient failures.
#[derive(Debug, Clone)]
pub struct LimitedErrorCountRetryPolicy {
    maximum_failures: u32,
    failure_count: u32,
}

impl LimitedErrorCountRetryPolicy {
    /// Allows up to `maximum_failures` retries.
    pub fn new(maximum_failures: u32) -> Self {
        Self {
            maximum_failures,
            failure_count: 0,
        }
    }

    /// Transient failures recorded so far.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }
}

impl RetryPolicy for LimitedErrorCountRetryPolicy {
    fn clone_box(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::new(self.maximum_failures))
    }

    fn on_failure(&mut self, status: &Status) -> bool {
        if self.is_permanent_failure(status) {
            return false;
        }
        self.failure_count = self.failure_count.saturating_add(1);
        !self.is_exhausted()
    }

    fn is_exhausted(&self) -> bool {
        self.failure_count > self.maximum_failures
    }
}

/// Retries transient failures until a deadline.
///
/// The deadline is measured from construction, or from `clone_box` for a
/// per-operation copy. A duration too large to represent as an `Instant`
/// never expires.
#[derive(Debug, Clone)]
pub struct LimitedTimeRetryPolicy {
    maximum_duration: Duration,
    deadline: Option<Instant>,
}

impl LimitedTimeRetryPolicy {
    /// Allows retries for `maximum_duration` from now.
    pub fn new(maximum_duration: Duration) -> Self {
        Self {
            maximum_duration,
            deadline: Instant::now().checked_add(maximum_duration),
        }
    }

    /// Configured duration.
    pub fn maximum_duration(&self) -> Duration {
        self.maximum_duration
    }

    /// Instant after which no retry is allowed, `None` if unbounded.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl RetryPolicy for LimitedTimeRetryPolicy {
    fn clone_box(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self::new(self.maximum_duration))
    }

    fn on_failure(&mut self, status: &Status) -> bool {
        if self.is_permanent_failure(status) {
            return false;
        }
        !self.is_exhausted()
    }

    fn is_exhausted(&self) -> bool {
        self.deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}
