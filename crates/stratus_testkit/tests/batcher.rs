//! Mutation batcher against the in-memory service.

use proptest::prelude::*;
use std::time::Duration;
use stratus_client::{BatcherConfig, OperationError, PendingOp};
use stratus_protocol::StatusCode;
use stratus_testkit::prelude::*;

fn block_on<T>(pending: PendingOp<T, OperationError>) -> Result<T, OperationError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    runtime
        .block_on(async { tokio::time::timeout(Duration::from_secs(10), pending).await })
        .unwrap()
}

#[tokio::test]
async fn entries_complete_with_their_own_outcome() {
    let service = InMemoryDataService::new();
    service
        .fail_row("flaky", 1, StatusCode::Unavailable)
        .fail_row("denied", 1, StatusCode::PermissionDenied)
        .fail_row("counter", 1, StatusCode::Unavailable);
    let (cq, table) = manual_table(&service, fast_retry(3));
    let batcher = table.mutation_batcher(BatcherConfig::default().with_max_batches(1));

    let gate = batcher.admit(set_row("gate", "0"));
    let flaky = batcher.admit(set_row("flaky", "1"));
    let denied = batcher.admit(set_row("denied", "2"));
    let counter = batcher.admit(increment_row("counter", 1));

    assert_eq!(gate.completed.await, Ok(()));
    // The second batch needs one backoff for "flaky".
    let timer = cq.next_timer().await;
    timer.fire();

    assert_eq!(flaky.completed.await, Ok(()));
    assert!(matches!(
        denied.completed.await,
        Err(OperationError::PermanentError { .. })
    ));
    assert!(matches!(
        counter.completed.await,
        Err(OperationError::NonIdempotentFailure { .. })
    ));
    assert_eq!(service.counter(b"counter", "cf", b"n"), None);

    batcher.wait_for_no_pending_requests().await.unwrap();
    let stats = batcher.stats();
    assert_eq!(stats.batches_flushed, 2);
    assert_eq!(stats.mutations_completed, 4);
    assert_eq!(stats.mutations_failed, 2);
}

#[tokio::test]
async fn oversized_mutation_never_creates_a_batch() {
    let service = InMemoryDataService::new();
    let (_cq, table) = manual_table(&service, fast_retry(3));
    let batcher = table.mutation_batcher(BatcherConfig::default().with_max_size_per_batch(128));

    let admission = batcher.admit(sized_row("huge", 4096));
    assert_eq!(admission.admitted.await, Ok(()));
    let err = admission.completed.await.unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidArgument);

    assert_eq!(batcher.stats().batches_flushed, 0);
    assert_eq!(service.bulk_calls(), 0);
    batcher.wait_for_no_pending_requests().await.unwrap();
}

#[test]
fn concurrent_admission_resolves_every_mutation_once() {
    let config = StressConfig {
        mutations_per_thread: 200,
        threads: 4,
        ..StressConfig::default()
    };
    let result = run_concurrent_admissions(&config).unwrap();
    result.print_summary("concurrent admission");

    assert_eq!(result.total_ops, 800);
    assert_eq!(result.failed_ops, 0);
    assert_eq!(result.duplicate_completions, 0);
    assert!(result.batches >= 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn admission_order_is_preserved_across_batches(
        sizes in prop::collection::vec(1usize..300, 1..40),
        max_batch in 500usize..1200,
    ) {
        let service = InMemoryDataService::new();
        let (_queue, table) = tokio_table(&service, fast_retry(3), 1).unwrap();
        let batcher = table.mutation_batcher(
            BatcherConfig::default()
                .with_max_batches(1)
                .with_max_size_per_batch(max_batch),
        );

        let keys: Vec<String> = (0..sizes.len()).map(|i| format!("row{i:03}")).collect();
        let admissions: Vec<_> = keys
            .iter()
            .zip(&sizes)
            .map(|(key, len)| batcher.admit(sized_row(key, *len)))
            .collect();
        block_on(batcher.wait_for_no_pending_requests()).unwrap();
        for admission in admissions {
            prop_assert_eq!(block_on(admission.completed), Ok(()));
        }

        let log = service.bulk_log();
        let sent: Vec<String> = log
            .iter()
            .flatten()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .collect();
        prop_assert_eq!(&sent, &keys);
        let sizes_by_key: std::collections::HashMap<_, _> = keys
            .iter()
            .zip(&sizes)
            .map(|(key, len)| (key.clone(), sized_row(key, *len).wire_size()))
            .collect();
        for batch in &log {
            prop_assert!(!batch.is_empty());
            let total: usize = batch
                .iter()
                .map(|key| sizes_by_key[&*String::from_utf8_lossy(key)])
                .sum();
            prop_assert!(total <= max_batch);
        }
    }
}
