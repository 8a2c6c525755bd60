//! Command implementations for the taskline daemon.
//!
//! Each scenario starts its workers, blocks until the shutdown token is
//! cancelled, then stops and drains them within the configured deadline.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use taskline::{
    cron_ticks, interval_ticks, Group, Job, LocalLocker, Pool, PoolJob, Schedule, Worker,
    WorkerError,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::Commands;
use crate::settings::Settings;

/// Deadline of the grace scenario, shorter than its hung worker.
const GRACE_DEADLINE: Duration = Duration::from_secs(4);

/// How a scenario's workers finished after shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every job returned.
    Complete,
    /// The deadline elapsed with jobs still running.
    TimedOut(Duration),
}

impl Drain {
    /// Classify the result of `Group::wait` or `Pool::wait`.
    ///
    /// Any error other than an elapsed deadline is passed through.
    pub fn from_wait(result: Result<(), WorkerError>) -> Result<Self, WorkerError> {
        match result {
            Ok(()) => Ok(Drain::Complete),
            Err(WorkerError::WaitTimeout(deadline)) => Ok(Drain::TimedOut(deadline)),
            Err(e) => Err(e),
        }
    }
}

/// Initialize logging; RUST_LOG takes precedence over the configured level.
pub fn init_tracing(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run one scenario until `shutdown` is cancelled.
pub async fn run_command(
    command: Commands,
    settings: &Settings,
    shutdown: CancellationToken,
) -> Result<()> {
    info!("Taskline daemon starting...");
    info!("  Default timezone: {}", settings.runtime.default_timezone);
    info!("  Shutdown timeout: {}s", settings.runtime.shutdown_timeout_secs);

    let drain = match command {
        Commands::Simple { interval } => run_simple(interval, settings, shutdown).await?,
        Commands::Cron { spec } => run_cron(&spec, settings, shutdown).await?,
        Commands::Chain => run_chain(settings, shutdown).await?,
        Commands::Grace => run_grace(shutdown).await?,
        Commands::Locker => run_locker(settings, shutdown).await?,
        Commands::OnDemand { delay } => run_on_demand(delay, settings, shutdown).await?,
    };

    match drain {
        Drain::Complete => info!("Stopped"),
        Drain::TimedOut(deadline) => {
            warn!(deadline_secs = deadline.as_secs(), "Error while stopping workers: deadline exceeded")
        }
    }
    Ok(())
}

/// Pool job on an interval tick source, with a cleanup callback.
pub async fn run_simple(
    interval_secs: u64,
    settings: &Settings,
    shutdown: CancellationToken,
) -> Result<Drain> {
    let pool = Pool::new(shutdown.clone());

    let (ticks, handle) = interval_ticks(Duration::from_secs(interval_secs));
    let handler = Job::new(|_token| async {
        info!(at = %Utc::now().to_rfc3339(), "Do something");
    });
    pool.add_job(PoolJob::new(handler, ticks).with_canceler(move || {
        handle.stop();
        info!("Worker #1: closed");
    }))
    .await?;

    shutdown.cancelled().await;
    info!("Stopping...");
    Ok(Drain::from_wait(pool.wait(settings.runtime.shutdown_timeout()).await)?)
}

/// Pool job fed by a cron tick source.
pub async fn run_cron(spec: &str, settings: &Settings, shutdown: CancellationToken) -> Result<Drain> {
    let tz = settings.runtime.parse_timezone()?;
    let (ticks, handle) =
        cron_ticks(spec, tz).with_context(|| format!("Failed to schedule '{}'", spec))?;

    let pool = Pool::new(shutdown.clone());
    let handler = Job::new(|_token| async {
        info!(at = %Utc::now().to_rfc3339(), "Do something");
    });
    pool.add_job(PoolJob::new(handler, ticks).with_canceler(move || handle.stop()))
        .await?;

    shutdown.cancelled().await;
    info!("Stopping...");
    Ok(Drain::from_wait(pool.wait(settings.runtime.shutdown_timeout()).await)?)
}

/// Outer group with a nested group whose worker lingers after cancellation.
pub async fn run_chain(settings: &Settings, shutdown: CancellationToken) -> Result<Drain> {
    let value = Arc::new(AtomicI32::new(1));

    let w1 = Worker::builder(increment_job("job1", value.clone(), 2))
        .by_cron_spec("@every 2s")?
        .build();
    let w2 = Worker::builder(increment_job("job2", value.clone(), -1))
        .by_cron_spec("@every 1s")?
        .build();
    let w3 = Worker::builder(Job::new(|token| async move {
        info!("job3 start");
        token.cancelled().await;
        info!("job3 freezes for 5 seconds");
        tokio::time::sleep(Duration::from_secs(5)).await;
    }))
    .by_cron_spec("@every 1s")?
    .build();

    let outer = Group::new(&shutdown);
    outer.add([w1, w2]).await?;

    // Independent lifecycle, stopped only through the outer group
    let inner = Group::new(&CancellationToken::new());
    inner.add([w3]).await?;
    outer.add_group([inner.clone()]).await?;

    outer.run().await;
    inner.run().await;

    shutdown.cancelled().await;
    info!("Stopping...");
    outer.stop();
    Ok(Drain::from_wait(outer.wait(settings.runtime.shutdown_timeout()).await)?)
}

/// Group stopped by one of its own jobs, with a worker that ignores cancellation.
pub async fn run_grace(shutdown: CancellationToken) -> Result<Drain> {
    let value = Arc::new(AtomicI32::new(1));
    let stop = shutdown.child_token();

    let w1 = Worker::builder(increment_job("job1", value.clone(), 2))
        .by_cron_spec("@every 2s")?
        .build();
    let w2 = Worker::builder(increment_job("job2", value.clone(), -1))
        .by_cron_spec("@every 1s")?
        .build();

    let stopper = stop.clone();
    let w3 = Worker::builder(Job::new(move |_token| {
        let stopper = stopper.clone();
        async move {
            info!("job3 start, send command stop");
            stopper.cancel();
        }
    }))
    .by_cron_spec("@every 10s")?
    .build();

    let w4 = Worker::builder(Job::new(|token| async move {
        info!("job4 start");
        token.cancelled().await;
        info!("job4 freezes for a minute");
        tokio::time::sleep(Duration::from_secs(60)).await;
        info!("job4 exit");
    }))
    .with_done(|_| info!("Worker #4 was run"))
    .by_cron_spec("@every 1s")?
    .build();

    let group = Group::new(&CancellationToken::new());
    group.add([w1, w2, w3, w4]).await?;
    group.run().await;

    stop.cancelled().await;
    info!("Stopping...");
    group.stop();
    Ok(Drain::from_wait(group.wait(Some(GRACE_DEADLINE)).await)?)
}

/// Countdown schedules, two of which share a lock.
pub async fn run_locker(settings: &Settings, shutdown: CancellationToken) -> Result<Drain> {
    let counters: Vec<Arc<AtomicI32>> = (1..=4).map(|n| Arc::new(AtomicI32::new(n))).collect();
    let locker = Arc::new(LocalLocker::new());

    let workers = counters.iter().enumerate().map(|(i, counter)| {
        let name = format!("job{}", i + 1);
        let builder = Worker::builder(increment_job(&name, counter.clone(), -1))
            .name(name)
            .by_schedule(countdown(counter.clone()));
        // job2 and job3 never overlap
        match i {
            1 | 2 => builder.with_lock(locker.clone()).build(),
            _ => builder.build(),
        }
    });

    let group = Group::new(&shutdown);
    group.add(workers).await?;
    group.run().await;

    shutdown.cancelled().await;
    info!("Stopping...");
    Ok(Drain::from_wait(group.wait(settings.runtime.shutdown_timeout()).await)?)
}

/// Periodic workers plus a worker triggered once after `delay_secs`.
pub async fn run_on_demand(
    delay_secs: u64,
    settings: &Settings,
    shutdown: CancellationToken,
) -> Result<Drain> {
    let value = Arc::new(AtomicI32::new(1));

    let w1 = Worker::builder(increment_job("job1", value.clone(), 2))
        .by_ticker(Duration::from_secs(2))
        .build();
    let w2 = Worker::builder(increment_job("job2", value.clone(), -1))
        .by_cron_spec("@every 1s")?
        .build();
    let w3 = Worker::builder(increment_job("job3", value.clone(), 10))
        .with_done(|_| info!("Worker #3 was run"))
        .build();

    let group = Group::new(&CancellationToken::new());
    group.add([w1, w2]).await?;
    group.run().await;

    let trigger = group.on_demand(w3);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        if let Err(e) = trigger.run().await {
            warn!(error = %e, "On-demand trigger rejected");
        }
    });

    shutdown.cancelled().await;
    info!("Stopping...");
    group.stop();
    Ok(Drain::from_wait(group.wait(settings.runtime.shutdown_timeout()).await)?)
}

fn increment_job(name: &str, target: Arc<AtomicI32>, delta: i32) -> Job {
    let name: Arc<str> = name.into();
    Job::new(move |_token| {
        let name = name.clone();
        let target = target.clone();
        async move {
            let before = target.fetch_add(delta, Ordering::SeqCst);
            info!(job = %name, before, after = before + delta, "Job start");
        }
    })
}

/// Schedule repeating the job until `target` reaches zero.
fn countdown(target: Arc<AtomicI32>) -> impl Schedule {
    move |_token: CancellationToken, job: Job| {
        let target = target.clone();
        Job::new(move |token| {
            let job = job.clone();
            let target = target.clone();
            async move {
                while target.load(Ordering::SeqCst) > 0 && !token.is_cancelled() {
                    job.run(token.clone()).await;
                    // Locked-out runs return at once
                    tokio::task::yield_now().await;
                }
            }
        })
    }
}
