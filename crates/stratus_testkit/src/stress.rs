//! Stress harness for concurrent batcher admission.
//!
//! Many threads admit mutations into one batcher at once; the harness
//! checks that every mutation resolves exactly once.

use crate::fixtures::{fast_retry, set_row, tokio_table};
use crate::in_memory::InMemoryDataService;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use stratus_client::BatcherConfig;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total mutations admitted.
    pub total_ops: usize,
    /// Mutations that completed successfully.
    pub successful_ops: usize,
    /// Mutations that completed with an error.
    pub failed_ops: usize,
    /// Completion callbacks that ran more than once for one mutation.
    pub duplicate_completions: usize,
    /// Batches sent.
    pub batches: u64,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Mutations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    fn new(successful: usize, failed: usize, duplicates: usize, batches: u64, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duplicate_completions: duplicates,
            batches,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total mutations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Batches: {}", self.batches);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} mutations/sec", self.ops_per_second);
    }
}

/// Configuration for a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Mutations admitted by each thread.
    pub mutations_per_thread: usize,
    /// Admitting threads.
    pub threads: usize,
    /// Completion queue worker threads.
    pub workers: usize,
    /// Batcher limits.
    pub batcher: BatcherConfig,
    /// Every n-th row fails transiently once; 0 disables injection.
    pub flaky_every: usize,
    /// Upper bound on the whole run.
    pub timeout: Duration,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            mutations_per_thread: 500,
            threads: 4,
            workers: 2,
            batcher: BatcherConfig::default()
                .with_max_batches(2)
                .with_max_mutations_per_batch(64),
            flaky_every: 7,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Admits mutations from `config.threads` threads into one batcher and
/// waits for every completion.
pub fn run_concurrent_admissions(config: &StressConfig) -> std::io::Result<StressTestResult> {
    let service = InMemoryDataService::new();
    if config.flaky_every > 0 {
        for thread_id in 0..config.threads {
            for i in (0..config.mutations_per_thread).step_by(config.flaky_every) {
                service.fail_row(
                    format!("t{thread_id}-{i}"),
                    1,
                    stratus_protocol::StatusCode::Unavailable,
                );
            }
        }
    }
    let (_queue, table) = tokio_table(&service, fast_retry(5), config.workers)?;
    let batcher = table.mutation_batcher(config.batcher.clone());

    let total = config.threads * config.mutations_per_thread;
    let completions: Arc<Vec<AtomicUsize>> =
        Arc::new((0..total).map(|_| AtomicUsize::new(0)).collect());
    let (tx, rx) = mpsc::channel::<bool>();

    let start = Instant::now();
    thread::scope(|scope| {
        for thread_id in 0..config.threads {
            let batcher = batcher.clone();
            let completions = Arc::clone(&completions);
            let tx = tx.clone();
            let per_thread = config.mutations_per_thread;
            scope.spawn(move || {
                for i in 0..per_thread {
                    let slot = thread_id * per_thread + i;
                    let completions = Arc::clone(&completions);
                    let tx = tx.clone();
                    batcher.admit_with(
                        set_row(&format!("t{thread_id}-{i}"), "v"),
                        || {},
                        move |result| {
                            completions[slot].fetch_add(1, Ordering::SeqCst);
                            let _ = tx.send(result.is_ok());
                        },
                    );
                }
            });
        }
    });
    drop(tx);

    let mut successful = 0;
    let mut failed = 0;
    let deadline = start + config.timeout;
    while successful + failed < total {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(true) => successful += 1,
            Ok(false) => failed += 1,
            Err(_) => break,
        }
    }
    let duration = start.elapsed();

    let duplicates = completions
        .iter()
        .filter(|c| c.load(Ordering::SeqCst) > 1)
        .count();
    Ok(StressTestResult::new(
        successful,
        failed,
        duplicates,
        batcher.stats().batches_flushed,
        duration,
    ))
}
