//! Mutation batcher admission benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::mpsc;
use std::time::Duration;
use stratus_bench::generate_rows;
use stratus_client::BatcherConfig;
use stratus_testkit::{fast_retry, tokio_table, InMemoryDataService};

/// Benchmark admitting a burst of mutations and waiting for all of them.
fn bench_admit_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("admit_burst");
    group.sample_size(20);

    for count in [100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let service = InMemoryDataService::new();
            let (_queue, table) = tokio_table(&service, fast_retry(3), 2).unwrap();
            let batcher = table.mutation_batcher(BatcherConfig::default().with_max_batches(4));
            let rows = generate_rows(count, 128, 0);

            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                for row in &rows {
                    let tx = tx.clone();
                    batcher.admit_with(
                        black_box(row.clone()),
                        || {},
                        move |result| {
                            let _ = tx.send(result.is_ok());
                        },
                    );
                }
                drop(tx);
                let ok = rx
                    .iter()
                    .take(count)
                    .filter(|ok| *ok)
                    .count();
                assert_eq!(ok, count);
            });
        });
    }
    group.finish();
}

/// Benchmark one bulk apply round trip through the in-memory service.
fn bench_bulk_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_apply");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let service = InMemoryDataService::new();
            let (_queue, table) = tokio_table(&service, fast_retry(3), 1).unwrap();
            let rows = generate_rows(count, 128, 0);

            b.iter(|| {
                let pending = table.bulk_apply(black_box(rows.clone()));
                let failed = runtime
                    .block_on(async { tokio::time::timeout(Duration::from_secs(5), pending).await })
                    .unwrap()
                    .unwrap();
                assert!(failed.is_empty());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_admit_burst, bench_bulk_apply);
criterion_main!(benches);
