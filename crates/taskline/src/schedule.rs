//! Schedule strategies.
//!
//! A schedule turns a one-shot [`Job`] into a job that repeats it
//! until the cancellation token fires. Built-in strategies are time based,
//! but the [`Schedule`] trait makes no such assumption: any closure of shape
//! `Fn(CancellationToken, Job) -> Job` is a schedule too.

use std::time::Duration;

use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::tick::MIN_TICK_PERIOD;
use crate::Job;

/// Strategy that wraps a job into a repeating job.
///
/// The returned job must return once `token` is cancelled.
///
/// # Example
///
/// ```
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
/// use taskline::{Job, Schedule};
/// use tokio_util::sync::CancellationToken;
///
/// // Repeat until the counter reaches zero
/// let remaining = Arc::new(AtomicI32::new(3));
/// let countdown = move |_token: CancellationToken, job: Job| {
///     let remaining = remaining.clone();
///     Job::new(move |token| {
///         let job = job.clone();
///         let remaining = remaining.clone();
///         async move {
///             while remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
///                 job.run(token.clone()).await;
///             }
///         }
///     })
/// };
/// # fn assert_schedule<S: Schedule>(_: &S) {}
/// # assert_schedule(&countdown);
/// ```
pub trait Schedule: Send + Sync + 'static {
    /// Wrap `job` into a job repeating it according to this strategy.
    fn wrap(&self, token: CancellationToken, job: Job) -> Job;
}

impl<F> Schedule for F
where
    F: Fn(CancellationToken, Job) -> Job + Send + Sync + 'static,
{
    fn wrap(&self, token: CancellationToken, job: Job) -> Job {
        self(token, job)
    }
}

/// Fixed-delay schedule.
///
/// Waits `period`, runs the job, and only then starts the next wait, so a
/// slow job pushes every following run later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    period: Duration,
}

impl Timer {
    /// Create a timer with the given delay between runs. A zero delay is
    /// raised to [`MIN_TICK_PERIOD`].
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(MIN_TICK_PERIOD),
        }
    }

    /// Delay between the end of one run and the start of the next.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Schedule for Timer {
    fn wrap(&self, _token: CancellationToken, job: Job) -> Job {
        let period = self.period;
        Job::new(move |token| {
            let job = job.clone();
            async move {
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = sleep(period) => {}
                    }
                    job.run(token.clone()).await;
                }
            }
        })
    }
}

/// Fixed-interval schedule.
///
/// Runs the job on a wall-clock cadence of `period`. Ticks that fall while
/// the job is still running are skipped, never queued. A zero period is
/// raised to one millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticker {
    period: Duration,
}

impl Ticker {
    /// Create a ticker with the given period.
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(MIN_TICK_PERIOD),
        }
    }

    /// Interval between ticks.
    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Schedule for Ticker {
    fn wrap(&self, _token: CancellationToken, job: Job) -> Job {
        let period = self.period;
        Job::new(move |token| {
            let job = job.clone();
            async move {
                let mut interval = interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = interval.tick() => {}
                    }
                    job.run(token.clone()).await;
                }
            }
        })
    }
}
