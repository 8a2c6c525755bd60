//! Worker: a job plus its exclusivity, recurrence and completion settings.
//!
//! A [`Worker`] is configured once through [`WorkerBuilder`] and is
//! immutable afterwards; clones share the same configuration snapshot.
//! It exposes two entry points:
//!
//! - [`Worker::run`]: optional immediate run, then the schedule (if any)
//!   until cancellation, or a single run when nothing else is configured.
//! - [`Worker::run_once`]: exactly one invocation, ignoring schedule and
//!   the immediate flag. Used for on-demand triggering.
//!
//! The lock always wraps the bare job, inside the schedule, so it is taken
//! and released around every invocation and never held across the loop.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono_tz::Tz;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cron::CronSchedule;
use crate::lock::{self, Locker};
use crate::schedule::{Schedule, Ticker, Timer};
use crate::{Job, WorkerError};

const DEFAULT_WORKER_NAME: &str = "worker";

type DoneFn = Arc<dyn Fn(&mut Completion) + Send + Sync>;

/// How a worker run ended, handed to the completion callback.
///
/// If the run panicked the payload is kept here. Unless the callback calls
/// [`Completion::recover`], the panic resumes after the callback returns.
pub struct Completion {
    panic: Option<Box<dyn Any + Send>>,
    interrupted: bool,
}

impl Completion {
    /// The job panicked and the panic has not been recovered yet.
    pub fn is_panicked(&self) -> bool {
        self.panic.is_some()
    }

    /// The run future was dropped before it finished (e.g. its task was aborted).
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Panic message, when the payload is a string.
    pub fn panic_message(&self) -> Option<&str> {
        let payload = self.panic.as_ref()?;
        payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
    }

    /// Take the panic payload, suppressing the fault.
    pub fn recover(&mut self) -> Option<Box<dyn Any + Send>> {
        self.panic.take()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("panicked", &self.is_panicked())
            .field("interrupted", &self.interrupted)
            .finish()
    }
}

/// Runs the completion callback on every exit path.
///
/// The normal path goes through `complete`; `Drop` covers runs whose future
/// is dropped before finishing.
struct DoneGuard {
    done: Option<DoneFn>,
}

impl DoneGuard {
    fn complete(&mut self, panic: Option<Box<dyn Any + Send>>) {
        let Some(done) = self.done.take() else {
            return;
        };
        let mut completion = Completion {
            panic,
            interrupted: false,
        };
        done(&mut completion);
        if let Some(payload) = completion.panic {
            panic::resume_unwind(payload);
        }
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if let Some(done) = self.done.take() {
            done(&mut Completion {
                panic: None,
                interrupted: true,
            });
        }
    }
}

struct WorkerConfig {
    name: String,
    job: Job,
    schedule: Option<Arc<dyn Schedule>>,
    locker: Option<Arc<dyn Locker>>,
    done: Option<DoneFn>,
    immediately: bool,
}

impl WorkerConfig {
    fn locked_job(&self) -> Job {
        match &self.locker {
            Some(locker) => lock::with_lock(locker.clone(), self.job.clone()),
            None => self.job.clone(),
        }
    }
}

/// Fluent configuration for a [`Worker`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use taskline::{Job, LocalLocker, Worker};
///
/// let locker = Arc::new(LocalLocker::new());
/// let worker = Worker::builder(Job::new(|_token| async {}))
///     .name("cleanup")
///     .by_ticker(Duration::from_secs(60))
///     .immediately(true)
///     .with_lock(locker)
///     .with_done(|completion| {
///         if completion.is_panicked() {
///             completion.recover();
///         }
///     })
///     .build();
/// assert_eq!(worker.name(), "cleanup");
/// ```
pub struct WorkerBuilder {
    config: WorkerConfig,
}

impl WorkerBuilder {
    /// Name used in log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Repeat the job with a custom schedule.
    pub fn by_schedule(mut self, schedule: impl Schedule) -> Self {
        self.config.schedule = Some(Arc::new(schedule));
        self
    }

    /// Repeat the job `period` after each run finished.
    pub fn by_timer(self, period: Duration) -> Self {
        self.by_schedule(Timer::new(period))
    }

    /// Repeat the job every `period`.
    pub fn by_ticker(self, period: Duration) -> Self {
        self.by_schedule(Ticker::new(period))
    }

    /// Repeat the job according to a cron-style spec, evaluated in UTC.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::InvalidSchedule` when the spec can never fire.
    /// This is a configuration error: the worker is never built.
    pub fn by_cron_spec(self, spec: &str) -> Result<Self, WorkerError> {
        self.by_cron_spec_in(spec, Tz::UTC)
    }

    /// Same as [`by_cron_spec`](Self::by_cron_spec), evaluated in `tz`.
    pub fn by_cron_spec_in(self, spec: &str, tz: Tz) -> Result<Self, WorkerError> {
        let schedule = CronSchedule::parse_in(spec, tz)?;
        Ok(self.by_schedule(schedule))
    }

    /// Also run the job once as soon as `Worker::run` is called.
    pub fn immediately(mut self, execute_on_run: bool) -> Self {
        self.config.immediately = execute_on_run;
        self
    }

    /// Callback invoked when a run ends, however it ends.
    pub fn with_done<F>(mut self, done: F) -> Self
    where
        F: Fn(&mut Completion) + Send + Sync + 'static,
    {
        self.config.done = Some(Arc::new(done));
        self
    }

    /// Skip invocations that cannot acquire `locker`.
    pub fn with_lock(mut self, locker: Arc<dyn Locker>) -> Self {
        self.config.locker = Some(locker);
        self
    }

    /// Finalize the configuration.
    pub fn build(self) -> Worker {
        Worker {
            config: Arc::new(self.config),
        }
    }
}

/// An immutable, runnable worker configuration.
#[derive(Clone)]
pub struct Worker {
    config: Arc<WorkerConfig>,
}

impl Worker {
    /// Worker that runs `job` once per `run`.
    pub fn new(job: Job) -> Self {
        Self::builder(job).build()
    }

    /// Start configuring a worker around `job`.
    pub fn builder(job: Job) -> WorkerBuilder {
        WorkerBuilder {
            config: WorkerConfig {
                name: DEFAULT_WORKER_NAME.to_string(),
                job,
                schedule: None,
                locker: None,
                done: None,
                immediately: false,
            },
        }
    }

    /// Name used in log events.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run the worker until its schedule ends or `token` is cancelled.
    pub async fn run(&self, token: CancellationToken) {
        let config = self.config.clone();
        self.finish(async move {
            let job = config.locked_job();

            if config.immediately {
                job.run(token.clone()).await;
                if config.schedule.is_none() || token.is_cancelled() {
                    return;
                }
            }

            match &config.schedule {
                Some(schedule) => schedule.wrap(token.clone(), job).run(token).await,
                None => job.run(token).await,
            }
        })
        .await
    }

    /// Invoke the job exactly once, ignoring schedule and immediate flag.
    pub async fn run_once(&self, token: CancellationToken) {
        let job = self.config.locked_job();
        self.finish(job.run(token)).await
    }

    async fn finish<F>(&self, run: F)
    where
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        debug!(worker = %self.config.name, "Worker started");

        match self.config.done.clone() {
            Some(done) => {
                let mut guard = DoneGuard { done: Some(done) };
                let outcome = AssertUnwindSafe(run).catch_unwind().await;
                guard.complete(outcome.err());
            }
            None => run.await,
        }

        debug!(
            worker = %self.config.name,
            duration_ms = start.elapsed().as_millis() as u64,
            "Worker finished"
        );
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.config.name)
            .field("scheduled", &self.config.schedule.is_some())
            .field("locked", &self.config.locker.is_some())
            .field("immediately", &self.config.immediately)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use crate::LocalLocker;

    fn counting_job(counter: Arc<AtomicU32>) -> Job {
        Job::new(move |_token| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    /// Schedule that runs the job one more time
    fn once_more(_token: CancellationToken, job: Job) -> Job {
        Job::new(move |token| {
            let job = job.clone();
            async move { job.run(token).await }
        })
    }

    #[tokio::test]
    async fn test_plain_worker_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        Worker::new(counting_job(counter.clone()))
            .run(CancellationToken::new())
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediately_without_schedule_runs_once() {
        let counter = Arc::new(AtomicU32::new(0));
        Worker::builder(counting_job(counter.clone()))
            .immediately(true)
            .build()
            .run(CancellationToken::new())
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediately_with_schedule_runs_twice() {
        let counter = Arc::new(AtomicU32::new(0));
        Worker::builder(counting_job(counter.clone()))
            .immediately(true)
            .by_schedule(once_more)
            .build()
            .run(CancellationToken::new())
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_after_immediate_run_skips_schedule() {
        let counter = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let c = counter.clone();
        let t = token.clone();
        // The immediate run itself cancels the scope
        let job = Job::new(move |_token| {
            let c = c.clone();
            let t = t.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                t.cancel();
            }
        });

        Worker::builder(job)
            .immediately(true)
            .by_schedule(once_more)
            .build()
            .run(token)
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_once_ignores_schedule_and_immediate() {
        let counter = Arc::new(AtomicU32::new(0));
        let worker = Worker::builder(counting_job(counter.clone()))
            .immediately(true)
            .by_ticker(Duration::from_millis(1))
            .build();

        worker.run_once(CancellationToken::new()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_done_runs_after_normal_return() {
        let done = Arc::new(AtomicU32::new(0));
        let d = done.clone();
        let worker = Worker::builder(Job::new(|_token| async {}))
            .with_done(move |completion| {
                assert!(!completion.is_panicked());
                assert!(!completion.is_interrupted());
                d.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        worker.run(CancellationToken::new()).await;
        worker.run_once(CancellationToken::new()).await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_done_can_recover_from_panic() {
        let message = Arc::new(std::sync::Mutex::new(None));
        let m = message.clone();
        let worker = Worker::builder(Job::new(|_token| async {
            panic!("boom");
        }))
        .with_done(move |completion| {
            *m.lock().unwrap() = completion.panic_message().map(str::to_string);
            completion.recover();
        })
        .build();

        // Recovered: the task completes normally
        tokio::spawn(async move { worker.run(CancellationToken::new()).await })
            .await
            .unwrap();
        assert_eq!(message.lock().unwrap().as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_unrecovered_panic_propagates_after_done() {
        let saw_panic = Arc::new(AtomicBool::new(false));
        let s = saw_panic.clone();
        let worker = Worker::builder(Job::new(|_token| async {
            panic!("boom");
        }))
        .with_done(move |completion| {
            s.store(completion.is_panicked(), Ordering::SeqCst);
        })
        .build();

        let result = tokio::spawn(async move { worker.run(CancellationToken::new()).await }).await;
        assert!(result.unwrap_err().is_panic());
        assert!(saw_panic.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_done_runs_when_aborted() {
        let interrupted = Arc::new(AtomicBool::new(false));
        let i = interrupted.clone();
        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
        let worker = Worker::builder(Job::new(move |token: CancellationToken| {
            let started_tx = started_tx.clone();
            async move {
                let _ = started_tx.send(());
                token.cancelled().await;
            }
        }))
        .with_done(move |completion| {
            i.store(completion.is_interrupted(), Ordering::SeqCst);
        })
        .build();

        let handle = tokio::spawn(async move { worker.run(CancellationToken::new()).await });
        started_rx.recv().await.unwrap();
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(interrupted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_lock_is_released_between_scheduled_runs() {
        let locker = Arc::new(LocalLocker::new());
        let held_during_run = Arc::new(AtomicU32::new(0));
        let runs = Arc::new(AtomicU32::new(0));

        let l = locker.clone();
        let h = held_during_run.clone();
        let r = runs.clone();
        let job = Job::new(move |_token| {
            let l = l.clone();
            let h = h.clone();
            let r = r.clone();
            async move {
                if l.is_locked() {
                    h.fetch_add(1, Ordering::SeqCst);
                }
                r.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Schedule checks the lock state between invocations
        let l = locker.clone();
        let free_between = Arc::new(AtomicU32::new(0));
        let f = free_between.clone();
        let three_times = move |_token: CancellationToken, job: Job| {
            let l = l.clone();
            let f = f.clone();
            Job::new(move |token| {
                let job = job.clone();
                let l = l.clone();
                let f = f.clone();
                async move {
                    for _ in 0..3 {
                        job.run(token.clone()).await;
                        if !l.is_locked() {
                            f.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            })
        };

        Worker::builder(job)
            .with_lock(locker.clone())
            .by_schedule(three_times)
            .build()
            .run(CancellationToken::new())
            .await;

        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(held_during_run.load(Ordering::SeqCst), 3);
        assert_eq!(free_between.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_locked_out_worker_skips_job() {
        let locker = Arc::new(LocalLocker::new());
        let counter = Arc::new(AtomicU32::new(0));
        let done = Arc::new(AtomicU32::new(0));
        let d = done.clone();

        locker.acquire().unwrap();
        Worker::builder(counting_job(counter.clone()))
            .with_lock(locker.clone())
            .with_done(move |_| {
                d.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .run_once(CancellationToken::new())
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        // Skipping is not a fault: done still fires
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_cron_spec_fails_at_configuration() {
        for spec in ["tomorrow", "*", "@today"] {
            let result = Worker::builder(Job::new(|_token| async {})).by_cron_spec(spec);
            assert!(matches!(result, Err(WorkerError::InvalidSchedule(_))));
        }
    }

    #[test]
    fn test_debug_output() {
        let worker = Worker::builder(Job::new(|_token| async {}))
            .name("reporter")
            .by_timer(Duration::from_secs(1))
            .build();
        let debug = format!("{:?}", worker);
        assert!(debug.contains("reporter"));
        assert!(debug.contains("scheduled: true"));
    }
}
