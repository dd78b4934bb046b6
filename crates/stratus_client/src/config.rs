//! Client configuration.

use crate::policy::{
    BackoffPolicy, ExponentialBackoffPolicy, LimitedErrorCountRetryPolicy,
    LimitedTimeRetryPolicy, RetryPolicy,
};
use std::time::Duration;

/// Configuration for a table client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fully qualified table name.
    pub table: String,
    /// Retry configuration shared by unary and bulk operations.
    pub retry: RetryConfig,
    /// Default batcher limits.
    pub batcher: BatcherConfig,
}

impl ClientConfig {
    /// Creates a configuration for `table` with default policies.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            retry: RetryConfig::default(),
            batcher: BatcherConfig::default(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the default batcher limits.
    pub fn with_batcher(mut self, batcher: BatcherConfig) -> Self {
        self.batcher = batcher;
        self
    }
}

/// How long an operation may keep retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryLimit {
    /// Up to this many transient failures.
    Failures(u32),
    /// Until this much time has passed since the operation started.
    Duration(Duration),
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry budget.
    pub limit: RetryLimit,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a configuration that tolerates `max_failures` transient
    /// failures.
    pub fn new(max_failures: u32) -> Self {
        Self {
            limit: RetryLimit::Failures(max_failures),
            ..Self::default()
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            limit: RetryLimit::Failures(0),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the retry budget.
    pub fn with_limit(mut self, limit: RetryLimit) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Builds a retry policy template.
    pub fn retry_policy(&self) -> Box<dyn RetryPolicy> {
        match self.limit {
            RetryLimit::Failures(max) => Box::new(LimitedErrorCountRetryPolicy::new(max)),
            RetryLimit::Duration(duration) => Box::new(LimitedTimeRetryPolicy::new(duration)),
        }
    }

    /// Builds a backoff policy template.
    pub fn backoff_policy(&self) -> Box<dyn BackoffPolicy> {
        Box::new(ExponentialBackoffPolicy::new(
            self.initial_delay,
            self.max_delay,
            self.backoff_multiplier,
        ))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            limit: RetryLimit::Duration(Duration::from_secs(600)),
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }
}

/// Limits for a mutation batcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherConfig {
    /// Maximum cell mutations per batch.
    pub max_mutations_per_batch: usize,
    /// Maximum wire bytes per batch.
    pub max_size_per_batch: usize,
    /// Maximum batches in flight at once.
    pub max_batches: usize,
    /// Maximum wire bytes admitted but not yet completed.
    pub max_outstanding_size: usize,
}

impl BatcherConfig {
    /// Default per-batch mutation limit.
    pub const DEFAULT_MAX_MUTATIONS_PER_BATCH: usize = 100_000;
    /// Default per-batch size limit.
    pub const DEFAULT_MAX_SIZE_PER_BATCH: usize = 4 * 1024 * 1024;
    /// Default number of batches in flight.
    pub const DEFAULT_MAX_BATCHES: usize = 4;
    /// Default outstanding size limit.
    pub const DEFAULT_MAX_OUTSTANDING_SIZE: usize = 24 * 1024 * 1024;

    /// Sets the per-batch mutation limit.
    pub fn with_max_mutations_per_batch(mut self, max: usize) -> Self {
        self.max_mutations_per_batch = max;
        self
    }

    /// Sets the per-batch size limit.
    pub fn with_max_size_per_batch(mut self, max: usize) -> Self {
        self.max_size_per_batch = max;
        self
    }

    /// Sets the number of batches in flight.
    pub fn with_max_batches(mut self, max: usize) -> Self {
        self.max_batches = max;
        self
    }

    /// Sets the outstanding size limit.
    pub fn with_max_outstanding_size(mut self, max: usize) -> Self {
        self.max_outstanding_size = max;
        self
    }

    /// Limits actually enforced: a batch can never be larger than the
    /// outstanding size, and at least one batch may be in flight.
    pub fn effective(&self) -> Self {
        Self {
            max_mutations_per_batch: self.max_mutations_per_batch.max(1),
            max_size_per_batch: self.max_size_per_batch.min(self.max_outstanding_size),
            max_batches: self.max_batches.max(1),
            max_outstanding_size: self.max_outstanding_size,
        }
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_mutations_per_batch: Self::DEFAULT_MAX_MUTATIONS_PER_BATCH,
            max_size_per_batch: Self::DEFAULT_MAX_SIZE_PER_BATCH,
            max_batches: Self::DEFAULT_MAX_BATCHES,
            max_outstanding_size: Self::DEFAULT_MAX_OUTSTANDING_SIZE,
        }
    }
}
