//! Test fixtures and client helpers.
//!
//! Provides row builders and ready-made clients wired to an
//! [`InMemoryDataService`].

use crate::in_memory::InMemoryDataService;
use std::sync::Arc;
use std::time::Duration;
use stratus_client::{
    ClientConfig, ManualCompletionQueue, RetryConfig, SharedQueue, Table, TokioCompletionQueue,
};
use stratus_protocol::{Mutation, RowMutation};
use tracing_subscriber::EnvFilter;

/// Table name used by fixtures.
pub const TEST_TABLE: &str = "projects/test/instances/test/tables/fixture";

/// Installs a `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call has an effect.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Retry configuration with millisecond delays and `max_failures` retries.
pub fn fast_retry(max_failures: u32) -> RetryConfig {
    RetryConfig::new(max_failures)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(8))
}

/// An idempotent write of `value` into `cf:c`.
pub fn set_row(key: &str, value: &str) -> RowMutation {
    RowMutation::new(
        key.to_string(),
        vec![Mutation::set_cell("cf", "c", 1_000, value.to_string())],
    )
}

/// A write of `len` filler bytes, for size-driven scenarios.
pub fn sized_row(key: &str, len: usize) -> RowMutation {
    RowMutation::new(
        key.to_string(),
        vec![Mutation::set_cell("cf", "c", 1_000, vec![b'x'; len])],
    )
}

/// A non-idempotent counter increment of `cf:n`.
pub fn increment_row(key: &str, delta: i64) -> RowMutation {
    RowMutation::new(key.to_string(), vec![Mutation::increment("cf", "n", delta)])
}

/// A table over `service` driven by a step-by-step completion queue.
pub fn manual_table(
    service: &InMemoryDataService,
    retry: RetryConfig,
) -> (Arc<ManualCompletionQueue>, Table) {
    let manual = Arc::new(ManualCompletionQueue::new());
    let cq: SharedQueue = manual.clone();
    let table = Table::new(
        cq,
        Arc::new(service.clone()),
        ClientConfig::new(TEST_TABLE).with_retry(retry),
    );
    (manual, table)
}

/// A table over `service` driven by an owned tokio runtime.
pub fn tokio_table(
    service: &InMemoryDataService,
    retry: RetryConfig,
    workers: usize,
) -> std::io::Result<(Arc<TokioCompletionQueue>, Table)> {
    let queue = Arc::new(TokioCompletionQueue::with_worker_threads(workers)?);
    let cq: SharedQueue = queue.clone();
    let table = Table::new(
        cq,
        Arc::new(service.clone()),
        ClientConfig::new(TEST_TABLE).with_retry(retry),
    );
    Ok((queue, table))
}
