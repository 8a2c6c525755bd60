//! Pool of jobs driven by external tick sources.
//!
//! A lighter layer than [`Group`](crate::Group): there is no schedule,
//! locking or pending phase. Each pool job runs its handler once per tick
//! received from its own [`TickSource`] and runs an optional cleanup when
//! it exits.

use std::fmt;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::tick::{self, TickSource};
use crate::{Job, WorkerError};

const INTAKE_CAPACITY: usize = 16;

/// Cleanup run once when a pool job exits.
pub type Canceler = Box<dyn FnOnce() + Send>;

/// A job registered with a [`Pool`].
pub struct PoolJob {
    /// Invoked once per received tick.
    pub handler: Job,
    /// Runs after the last handler invocation, on every exit path.
    pub canceler: Option<Canceler>,
    /// Ticks driving the handler; closing it ends the job.
    pub ticks: TickSource,
}

impl PoolJob {
    /// Pool job without cleanup.
    pub fn new(handler: Job, ticks: TickSource) -> Self {
        Self {
            handler,
            canceler: None,
            ticks,
        }
    }

    /// Run `canceler` once the job exits.
    pub fn with_canceler<F>(mut self, canceler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.canceler = Some(Box::new(canceler));
        self
    }
}

impl fmt::Debug for PoolJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolJob")
            .field("handler", &self.handler)
            .field("canceler", &self.canceler.is_some())
            .finish_non_exhaustive()
    }
}

/// Runs the canceler when dropped, including on panic or abort.
struct CancelerGuard(Option<Canceler>);

impl Drop for CancelerGuard {
    fn drop(&mut self) {
        if let Some(canceler) = self.0.take() {
            canceler();
        }
    }
}

struct Submission {
    job: PoolJob,
    accepted: oneshot::Sender<()>,
}

/// Handle to a pool bound to one cancellation token.
///
/// Clones refer to the same pool. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct Pool {
    intake: mpsc::Sender<Submission>,
    closed: CancellationToken,
}

impl Pool {
    /// Create a pool that stops accepting jobs once `token` is cancelled.
    pub fn new(token: CancellationToken) -> Self {
        let (intake, submissions) = mpsc::channel(INTAKE_CAPACITY);
        let closed = CancellationToken::new();
        tokio::spawn(supervise(submissions, token, closed.clone()));
        Self { intake, closed }
    }

    /// Start `job` within the pool.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::GroupStopped` when the pool token is cancelled
    /// before the job was accepted. A rejected job's canceler is dropped
    /// without running, since the job never started.
    pub async fn add_job(&self, job: PoolJob) -> Result<(), WorkerError> {
        if self.closed.is_cancelled() {
            return Err(WorkerError::GroupStopped);
        }

        let (accepted, ack) = oneshot::channel();
        self.intake
            .send(Submission { job, accepted })
            .await
            .map_err(|_| WorkerError::GroupStopped)?;
        ack.await.map_err(|_| WorkerError::GroupStopped)
    }

    /// Wait until the token is cancelled and every job has exited.
    ///
    /// Same deadline semantics as [`Group::wait`](crate::Group::wait).
    pub async fn wait(&self, deadline: Option<Duration>) -> Result<(), WorkerError> {
        match deadline {
            None => {
                self.closed.cancelled().await;
                Ok(())
            }
            Some(deadline) => tokio::time::timeout(deadline, self.closed.cancelled())
                .await
                .map_err(|_| WorkerError::WaitTimeout(deadline)),
        }
    }

    /// Whether every job has exited after cancellation.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_job(job: PoolJob, token: CancellationToken) {
    let PoolJob {
        handler,
        canceler,
        mut ticks,
    } = job;
    let _cleanup = CancelerGuard(canceler);
    tick::drive(&handler, &token, &mut ticks).await;
}

async fn supervise(
    mut submissions: mpsc::Receiver<Submission>,
    token: CancellationToken,
    closed: CancellationToken,
) {
    let tracker = TaskTracker::new();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            submission = submissions.recv() => match submission {
                Some(Submission { job, accepted }) => {
                    tracker.spawn(run_job(job, token.clone()));
                    let _ = accepted.send(());
                }
                None => {
                    token.cancelled().await;
                    break;
                }
            },
        }
    }

    drop(submissions);
    tracker.close();
    debug!(in_flight = tracker.len(), "Pool draining");
    tracker.wait().await;

    closed.cancel();
    debug!("Pool closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use chrono::Utc;

    use crate::interval_ticks;

    fn counting_job(counter: Arc<AtomicU32>) -> Job {
        Job::new(move |_token| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_runs_per_tick_then_cleans_up() {
        let token = CancellationToken::new();
        let pool = Pool::new(token.clone());
        let counter = Arc::new(AtomicU32::new(0));
        let cleaned = Arc::new(AtomicU32::new(0));

        let (ticks, _handle) = interval_ticks(Duration::from_secs(1));
        let c = cleaned.clone();
        pool.add_job(PoolJob::new(counting_job(counter.clone()), ticks).with_canceler(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        token.cancel();
        pool.wait(None).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_source_ends_job_before_cancellation() {
        let token = CancellationToken::new();
        let pool = Pool::new(token.clone());
        let counter = Arc::new(AtomicU32::new(0));
        let (cleaned_tx, mut cleaned_rx) = mpsc::channel(1);

        let (tx, ticks) = tick::tick_channel();
        pool.add_job(
            PoolJob::new(counting_job(counter.clone()), ticks).with_canceler(move || {
                let _ = cleaned_tx.try_send(());
            }),
        )
        .await
        .unwrap();

        tx.send(Utc::now()).await.unwrap();
        drop(tx);

        // Cleanup fires while the pool itself is still running
        cleaned_rx.recv().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!pool.is_closed());

        token.cancel();
        pool.wait(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_after_drain_fails() {
        let token = CancellationToken::new();
        let pool = Pool::new(token.clone());
        token.cancel();
        pool.wait(None).await.unwrap();

        let (_tx, ticks) = tick::tick_channel();
        let result = pool.add_job(PoolJob::new(Job::new(|_token| async {}), ticks)).await;
        assert!(matches!(result, Err(WorkerError::GroupStopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_deadline_with_hung_handler() {
        let token = CancellationToken::new();
        let pool = Pool::new(token.clone());
        let (started_tx, mut started_rx) = mpsc::channel(1);

        let (tx, ticks) = tick::tick_channel();
        let hung = Job::new(move |_token| {
            let started_tx = started_tx.clone();
            async move {
                let _ = started_tx.send(()).await;
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
        pool.add_job(PoolJob::new(hung, ticks)).await.unwrap();
        tx.send(Utc::now()).await.unwrap();
        started_rx.recv().await.unwrap();

        token.cancel();
        let result = pool.wait(Some(Duration::from_secs(4))).await;
        assert!(matches!(result, Err(WorkerError::WaitTimeout(_))));

        pool.wait(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_canceler_runs_when_handler_panics() {
        let token = CancellationToken::new();
        let pool = Pool::new(token.clone());
        let (cleaned_tx, mut cleaned_rx) = mpsc::channel(1);

        let (tx, ticks) = tick::tick_channel();
        let panicking = Job::new(|_token| async { panic!("handler fault") });
        pool.add_job(PoolJob::new(panicking, ticks).with_canceler(move || {
            let _ = cleaned_tx.try_send(());
        }))
        .await
        .unwrap();
        tx.send(Utc::now()).await.unwrap();

        cleaned_rx.recv().await.unwrap();
        token.cancel();
        pool.wait(None).await.unwrap();
    }
}
