//! Step-by-step completion queue for deterministic tests.

use super::{BoxFuture, Completer, CompletionQueue, PendingOp};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use stratus_protocol::Status;
use tokio::sync::Notify;

/// A timer parked by [`ManualCompletionQueue`] until the test decides how it
/// ends.
#[derive(Debug)]
pub struct ParkedTimer {
    delay: Duration,
    completer: Completer<Instant>,
}

impl ParkedTimer {
    /// Requested delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns true if the owner cancelled the timer.
    pub fn is_cancelled(&self) -> bool {
        self.completer.is_cancelled()
    }

    /// Reports that the timer fired.
    pub fn fire(self) {
        self.completer.complete(Ok(Instant::now()));
    }

    /// Reports that the timer was cancelled.
    pub fn report_cancelled(self) {
        self.completer
            .complete(Err(Status::cancelled("timer cancelled")));
    }
}

/// Completion queue whose timers only complete when the test says so.
///
/// Tasks are spawned on the ambient tokio runtime, so the queue must be used
/// from within one.
#[derive(Debug, Default)]
pub struct ManualCompletionQueue {
    timers: Mutex<VecDeque<ParkedTimer>>,
    timer_added: Notify,
    timers_created: AtomicUsize,
}

impl ManualCompletionQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers waiting for the test.
    pub fn parked_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Total number of timers ever requested.
    pub fn timers_created(&self) -> usize {
        self.timers_created.load(Ordering::SeqCst)
    }

    /// Takes the oldest parked timer, if any.
    pub fn try_next_timer(&self) -> Option<ParkedTimer> {
        self.timers.lock().pop_front()
    }

    /// Waits for the next timer request and takes it.
    pub async fn next_timer(&self) -> ParkedTimer {
        loop {
            let notified = self.timer_added.notified();
            if let Some(timer) = self.try_next_timer() {
                return timer;
            }
            notified.await;
        }
    }
}

impl CompletionQueue for ManualCompletionQueue {
    fn make_relative_timer(&self, delay: Duration) -> PendingOp<Instant> {
        let (completer, pending) = PendingOp::channel();
        self.timers.lock().push_back(ParkedTimer { delay, completer });
        self.timers_created.fetch_add(1, Ordering::SeqCst);
        self.timer_added.notify_one();
        pending
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) {
        // Outside a runtime (e.g. while one is being torn down) the task is
        // dropped and its completers resolve as abandoned.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(task);
        }
    }
}

/// Issues pending results and parks their producers for a test to resolve.
///
/// Stands in for a remote endpoint whose replies are scripted one step at a
/// time.
#[derive(Debug)]
pub struct ManualResponder<T, E = Status> {
    parked: Mutex<VecDeque<Completer<T, E>>>,
    added: Notify,
    issued: AtomicUsize,
}

impl<T, E> ManualResponder<T, E> {
    /// Creates a responder with nothing issued.
    pub fn new() -> Self {
        Self {
            parked: Mutex::new(VecDeque::new()),
            added: Notify::new(),
            issued: AtomicUsize::new(0),
        }
    }

    /// Issues a new pending result.
    pub fn issue(&self) -> PendingOp<T, E> {
        let (completer, pending) = PendingOp::channel();
        self.parked.lock().push_back(completer);
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.added.notify_one();
        pending
    }

    /// Total number of results issued.
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    /// Takes the oldest unresolved producer, if any.
    pub fn try_next(&self) -> Option<Completer<T, E>> {
        self.parked.lock().pop_front()
    }

    /// Waits for the next issued result and takes its producer.
    pub async fn next(&self) -> Completer<T, E> {
        loop {
            let notified = self.added.notified();
            if let Some(completer) = self.try_next() {
                return completer;
            }
            notified.await;
        }
    }
}

impl<T, E> Default for ManualResponder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}
