//! Retry Scheduler
//!
//! Runs submitted tasks with at most `concurrency` attempts in flight,
//! admitted FIFO. A failed attempt gives its slot back, waits out its
//! backoff delay without a slot, then queues again at the tail. Every task
//! ends in exactly one terminal outcome delivered through its
//! [`TaskHandle`].

use anyhow::anyhow;
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use super::backoff::{backoff_delay, RetryConfig};
use super::run_queue::{RunQueue, SlotPermit};
use super::TaskId;
use crate::config::SchedulerConfig;
use crate::error::{Result, TallyError, TaskError};

#[derive(Default)]
struct Counters {
    attempts_started: AtomicU64,
    retries: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

struct Shared {
    queue: Arc<RunQueue>,
    concurrency: usize,
    default_retry: RetryConfig,
    rng: Mutex<StdRng>,
    next_id: AtomicU64,
    closed: AtomicBool,
    live: watch::Sender<usize>,
    counters: Counters,
}

impl Shared {
    fn next_delay(&self, attempt: u32, config: &RetryConfig) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        backoff_delay(attempt, config, &mut *rng)
    }
}

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Attempts currently holding a slot
    pub in_flight: usize,
    /// Attempts waiting for a slot
    pub pending: usize,
    /// Tasks submitted and not yet resolved (includes tasks in backoff)
    pub live_tasks: usize,
    pub attempts_started: u64,
    pub retries: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Bounded-concurrency task runner with retry and backoff
///
/// Cloning is cheap; all clones share one run queue. Dropping every clone
/// stops nothing: tasks already submitted still run to their outcome.
#[derive(Clone)]
pub struct RetryScheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("concurrency", &self.shared.concurrency)
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl RetryScheduler {
    /// Create a scheduler with entropy-seeded jitter
    pub fn new(concurrency: usize, default_retry: RetryConfig) -> Result<Self> {
        Self::build(concurrency, default_retry, None)
    }

    /// Create a scheduler whose jitter sequence is reproducible
    pub fn with_seed(concurrency: usize, default_retry: RetryConfig, seed: u64) -> Result<Self> {
        Self::build(concurrency, default_retry, Some(seed))
    }

    pub fn from_config(scheduler: &SchedulerConfig, retry: &RetryConfig) -> Result<Self> {
        Self::build(scheduler.concurrency, retry.clone(), scheduler.jitter_seed)
    }

    fn build(concurrency: usize, default_retry: RetryConfig, seed: Option<u64>) -> Result<Self> {
        if concurrency < 1 {
            return Err(TallyError::InvalidConfig(format!(
                "scheduler.concurrency must be >= 1, got {}",
                concurrency
            )));
        }
        default_retry.validate()?;

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (live, _) = watch::channel(0usize);

        info!(
            "Retry scheduler ready: concurrency={}, max_attempts={}, delay={}..{}ms x{}, jitter={}",
            concurrency,
            default_retry.max_attempts,
            default_retry.min_delay_ms,
            default_retry.max_delay_ms,
            default_retry.factor,
            default_retry.jitter
        );

        Ok(Self {
            shared: Arc::new(Shared {
                queue: RunQueue::new(concurrency),
                concurrency,
                default_retry,
                rng: Mutex::new(rng),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                live,
                counters: Counters::default(),
            }),
        })
    }

    /// Submit a task with the scheduler's default retry settings.
    ///
    /// `task` receives the 1-based attempt number and may be invoked again
    /// after a failure, so it must be safe to re-run. Attempt 1 is queued
    /// before this returns, which keeps first attempts in submission order.
    ///
    /// The returned handle resolves to the task's value or to
    /// [`TaskError::Exhausted`]. Callers must await it (or hand it to
    /// [`observe`]); the scheduler does not report terminal failures to
    /// anyone else.
    pub fn submit<F, Fut, T>(&self, label: impl Into<String>, task: F) -> Result<TaskHandle<T>>
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let config = self.shared.default_retry.clone();
        self.submit_with_config(label, config, task)
    }

    /// Submit a task with its own retry settings
    pub fn submit_with_config<F, Fut, T>(
        &self,
        label: impl Into<String>,
        config: RetryConfig,
        task: F,
    ) -> Result<TaskHandle<T>>
    where
        F: FnMut(u32) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();
        if self.is_closed() {
            return Err(TallyError::SchedulerClosed(label));
        }
        config.validate()?;

        let task_id = TaskId::from_raw(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let live = LiveTask::register(&self.shared, task_id);
        let first_admission = self.shared.queue.enqueue(task_id, 1);
        let (done_tx, done_rx) = oneshot::channel();

        debug!(task_id = %task_id, label = %label, "task submitted");

        tokio::spawn(drive(
            Arc::clone(&self.shared),
            live,
            label.clone(),
            config,
            task,
            first_admission,
            done_tx,
        ));

        Ok(TaskHandle {
            task_id,
            label,
            rx: done_rx,
        })
    }

    /// Stop accepting new tasks; live tasks keep running and retrying
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            info!(
                "Retry scheduler closed with {} live task(s)",
                *self.shared.live.borrow()
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Wait until every submitted task has reached its terminal outcome
    pub async fn drain(&self) {
        let mut live = self.shared.live.subscribe();
        let _ = live.wait_for(|count| *count == 0).await;
    }

    /// `drain` bounded by `timeout`; returns false if tasks were still live
    pub async fn drain_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.drain()).await.is_ok()
    }

    /// Attempt number currently recorded for a live task
    pub fn current_attempt(&self, task_id: TaskId) -> Option<u32> {
        self.shared.queue.current_attempt(task_id)
    }

    pub fn stats(&self) -> SchedulerStats {
        let queue = self.shared.queue.snapshot();
        let counters = &self.shared.counters;
        SchedulerStats {
            in_flight: queue.in_flight,
            pending: queue.pending,
            live_tasks: *self.shared.live.borrow(),
            attempts_started: counters.attempts_started.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            succeeded: counters.succeeded.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }
}

/// Registration of a task that has not reached a terminal outcome yet
struct LiveTask {
    shared: Arc<Shared>,
    task_id: TaskId,
}

impl LiveTask {
    fn register(shared: &Arc<Shared>, task_id: TaskId) -> Self {
        shared.live.send_modify(|count| *count += 1);
        Self {
            shared: Arc::clone(shared),
            task_id,
        }
    }
}

impl Drop for LiveTask {
    fn drop(&mut self) {
        self.shared.queue.forget(self.task_id);
        self.shared
            .live
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Attempt loop for one task
async fn drive<F, Fut, T>(
    shared: Arc<Shared>,
    live: LiveTask,
    label: String,
    config: RetryConfig,
    mut task: F,
    first_admission: oneshot::Receiver<SlotPermit>,
    done: oneshot::Sender<std::result::Result<T, TaskError>>,
) where
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let task_id = live.task_id;
    let mut attempt: u32 = 1;
    let mut admission = first_admission;

    let outcome = loop {
        let permit = match admission.await {
            Ok(permit) => permit,
            Err(_) => {
                break Err(TaskError::Abandoned {
                    task_id,
                    label: label.clone(),
                })
            }
        };

        shared.counters.attempts_started.fetch_add(1, Ordering::Relaxed);
        debug!(task_id = %task_id, label = %label, attempt, "attempt started");

        let result = match AssertUnwindSafe(async { task(attempt).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(anyhow!(
                "attempt panicked: {}",
                panic_message(payload.as_ref())
            )),
        };
        drop(permit);

        match result {
            Ok(value) => {
                debug!(task_id = %task_id, label = %label, attempt, "task succeeded");
                break Ok(value);
            }
            Err(err) if attempt >= config.max_attempts => {
                error!(
                    task_id = %task_id,
                    attempts = attempt,
                    "Task {} ultimately failed after {} attempts: {:#}",
                    label, attempt, err
                );
                break Err(TaskError::Exhausted {
                    task_id,
                    label: label.clone(),
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) => {
                let delay = shared.next_delay(attempt + 1, &config);
                warn!(
                    task_id = %task_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Task {} failed on attempt {}: {:#}",
                    label, attempt, err
                );
                shared.counters.retries.fetch_add(1, Ordering::Relaxed);

                // Backoff holds no slot
                tokio::time::sleep(delay).await;
                attempt += 1;
                admission = shared.queue.enqueue(task_id, attempt);
            }
        }
    };

    match &outcome {
        Ok(_) => shared.counters.succeeded.fetch_add(1, Ordering::Relaxed),
        Err(_) => shared.counters.failed.fetch_add(1, Ordering::Relaxed),
    };
    drop(live);

    if let Err(Err(err)) = done.send(outcome) {
        warn!("Terminal failure of task {} was not observed: {}", task_id, err);
    }
}

/// Handle to the terminal outcome of a submitted task
#[must_use = "an unobserved task handle silently drops terminal failures; await it or pass it to `observe`"]
pub struct TaskHandle<T> {
    task_id: TaskId,
    label: String,
    rx: oneshot::Receiver<std::result::Result<T, TaskError>>,
}

impl<T> TaskHandle<T> {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .field("label", &self.label)
            .finish()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = std::result::Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Abandoned {
                task_id: this.task_id,
                label: this.label.clone(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Attach a failure observer to a handle the caller will not await itself.
///
/// Terminal failures are logged; the join handle yields the value on
/// success.
pub fn observe<T: Send + 'static>(handle: TaskHandle<T>) -> tokio::task::JoinHandle<Option<T>> {
    tokio::spawn(async move {
        let label = handle.label().to_string();
        match handle.await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("{} :: all retries failed: {}", label, e);
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::AtomicUsize;

    /// Records attempt start/end order and the peak number of overlapping attempts
    #[derive(Clone, Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<String>>>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        attempts: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn task(
            &self,
            name: &'static str,
            succeed_at: u32,
        ) -> impl FnMut(u32) -> BoxFuture<'static, anyhow::Result<u32>> + Send + 'static {
            let rec = self.clone();
            move |attempt| {
                let rec = rec.clone();
                async move {
                    rec.attempts.fetch_add(1, Ordering::SeqCst);
                    let now = rec.running.fetch_add(1, Ordering::SeqCst) + 1;
                    rec.peak.fetch_max(now, Ordering::SeqCst);
                    rec.push(format!("{name}:start:{attempt}"));
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    rec.push(format!("{name}:end:{attempt}"));
                    rec.running.fetch_sub(1, Ordering::SeqCst);
                    if attempt >= succeed_at {
                        Ok(attempt)
                    } else {
                        Err(anyhow!("{name} failed attempt {attempt}"))
                    }
                }
                .boxed()
            }
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn position(&self, event: &str) -> usize {
            self.events()
                .iter()
                .position(|e| e == event)
                .unwrap_or_else(|| panic!("missing event {event}"))
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            min_delay_ms: 20,
            max_delay_ms: 200,
            factor: 2.0,
            jitter: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let scheduler = RetryScheduler::new(1, fast_retry()).unwrap();
        let rec = Recorder::default();

        let value = scheduler.submit("ok", rec.task("A", 1)).unwrap().await.unwrap();

        assert_eq!(value, 1);
        assert_eq!(rec.attempts.load(Ordering::SeqCst), 1);
        let stats = scheduler.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.live_tasks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_task_reports_max_attempts() {
        let scheduler = RetryScheduler::new(1, fast_retry()).unwrap();
        let rec = Recorder::default();

        let err = scheduler
            .submit_with_config("doomed", fast_retry().with_max_attempts(3), rec.task("A", u32::MAX))
            .unwrap()
            .await
            .unwrap_err();

        assert_eq!(rec.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts(), 3);
        assert!(matches!(err, TaskError::Exhausted { .. }));
        let msg = err.to_string();
        assert!(msg.contains("after 3 attempts"), "{msg}");
        assert!(msg.contains("A failed attempt 3"), "{msg}");
        assert_eq!(scheduler.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_kth_attempt_records_k_attempts() {
        let scheduler = RetryScheduler::new(1, fast_retry()).unwrap();
        let rec = Recorder::default();

        let value = scheduler.submit("flaky", rec.task("A", 4)).unwrap().await.unwrap();

        assert_eq!(value, 4);
        assert_eq!(rec.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(scheduler.stats().retries, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_one_serializes_attempts() {
        let scheduler = RetryScheduler::new(1, fast_retry()).unwrap();
        let rec = Recorder::default();

        let a = scheduler.submit("A", rec.task("A", 2)).unwrap();
        let b = scheduler.submit("B", rec.task("B", 1)).unwrap();
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), 2);
        assert_eq!(b.unwrap(), 1);

        assert!(rec.position("B:start:1") > rec.position("A:end:1"));
        assert_eq!(rec.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_wait_does_not_hold_a_slot() {
        let slow_retry = RetryConfig {
            min_delay_ms: 1_000,
            max_delay_ms: 1_000,
            ..fast_retry()
        };
        let scheduler = RetryScheduler::new(1, slow_retry).unwrap();
        let rec = Recorder::default();

        let a = scheduler.submit("A", rec.task("A", 2)).unwrap();
        let b = scheduler.submit("B", rec.task("B", 1)).unwrap();
        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        assert_eq!(
            rec.events(),
            vec!["A:start:1", "A:end:1", "B:start:1", "B:end:1", "A:start:2", "A:end:2"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempts_follow_submission_order() {
        let scheduler = RetryScheduler::new(1, fast_retry()).unwrap();
        let rec = Recorder::default();

        let handles: Vec<_> = ["A", "B", "C", "D"]
            .into_iter()
            .map(|name| scheduler.submit(name, rec.task(name, 1)).unwrap())
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let starts: Vec<_> = rec
            .events()
            .into_iter()
            .filter(|e| e.contains(":start:"))
            .collect();
        assert_eq!(starts, vec!["A:start:1", "B:start:1", "C:start:1", "D:start:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_n_bounds_overlap() {
        let scheduler = RetryScheduler::new(3, fast_retry()).unwrap();
        let rec = Recorder::default();

        let handles: Vec<_> = (0..10)
            .map(|i| scheduler.submit(format!("t{i}"), rec.task("T", 1)).unwrap())
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(rec.peak.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.stats().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_does_not_block_siblings() {
        let scheduler = RetryScheduler::new(1, fast_retry().with_max_attempts(2)).unwrap();
        let rec = Recorder::default();

        let doomed = scheduler.submit("doomed", rec.task("X", u32::MAX)).unwrap();
        let fine = scheduler.submit("fine", rec.task("Y", 1)).unwrap();

        assert!(doomed.await.is_err());
        assert_eq!(fine.await.unwrap(), 1);

        let late = scheduler.submit("late", rec.task("Z", 1)).unwrap();
        assert_eq!(late.await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_attempt_counts_as_failure() {
        let scheduler = RetryScheduler::new(1, fast_retry()).unwrap();

        let handle = scheduler
            .submit("panicky", |attempt| async move {
                if attempt == 1 {
                    panic!("boom");
                }
                Ok(attempt)
            })
            .unwrap();

        assert_eq!(handle.await.unwrap(), 2);
        assert_eq!(scheduler.stats().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_scheduler_rejects_but_finishes_live_tasks() {
        let scheduler = RetryScheduler::new(1, fast_retry()).unwrap();
        let rec = Recorder::default();

        let live = scheduler.submit("live", rec.task("A", 3)).unwrap();
        scheduler.close();

        let rejected = scheduler.submit("rejected", rec.task("B", 1));
        assert!(matches!(rejected, Err(TallyError::SchedulerClosed(_))));

        assert!(scheduler.drain_timeout(Duration::from_secs(10)).await);
        assert_eq!(live.await.unwrap(), 3);
        assert_eq!(scheduler.stats().live_tasks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_attempt_is_tracked_while_live() {
        let scheduler = RetryScheduler::new(1, fast_retry()).unwrap();
        let rec = Recorder::default();

        let handle = scheduler.submit("tracked", rec.task("A", 2)).unwrap();
        let id = handle.task_id();
        assert_eq!(scheduler.current_attempt(id), Some(1));

        handle.await.unwrap();
        assert_eq!(scheduler.current_attempt(id), None);
    }

    #[tokio::test]
    async fn test_invalid_configuration_fails_fast() {
        assert!(matches!(
            RetryScheduler::new(0, RetryConfig::default()),
            Err(TallyError::InvalidConfig(_))
        ));

        let inverted = RetryConfig {
            min_delay_ms: 10_000,
            max_delay_ms: 10,
            ..RetryConfig::default()
        };
        assert!(RetryScheduler::new(1, inverted.clone()).is_err());

        let scheduler = RetryScheduler::new(1, RetryConfig::default()).unwrap();
        let result = scheduler.submit_with_config("bad", inverted, |_| async { Ok(()) });
        assert!(matches!(result, Err(TallyError::InvalidConfig(_))));
        assert_eq!(scheduler.stats().live_tasks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observe_swallows_terminal_failure() {
        let scheduler = RetryScheduler::new(1, fast_retry().with_max_attempts(1)).unwrap();
        let rec = Recorder::default();

        let observed = observe(scheduler.submit("doomed", rec.task("A", u32::MAX)).unwrap());
        assert_eq!(observed.await.unwrap(), None);
    }
}
