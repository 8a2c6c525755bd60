//! Periodic and on-demand background workers for tokio services.
//!
//! This crate runs jobs on timers, tickers and cron specifications, with
//! optional mutual exclusion, completion callbacks and supervised groups
//! that shut down gracefully.
//!
//! # Features
//!
//! - Fixed-delay ([`Timer`]) and fixed-rate ([`Ticker`]) schedules, or any
//!   custom [`Schedule`]
//! - Cron specifications, `@every` durations and `@daily`-style descriptors
//!   via [`CronSchedule`], evaluated in a chosen timezone
//! - Non-blocking locking per execution through [`Locker`]
//! - Completion callbacks that observe, and may recover, job panics
//! - [`Group`]s with pending/running phases, nested groups and bounded waits
//! - A tick-driven [`Pool`] for jobs fed by external tick sources
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use taskline::{Group, Job, Worker};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), taskline::WorkerError> {
//! let shutdown = CancellationToken::new();
//! let group = Group::new(&shutdown);
//!
//! let cleanup = Worker::builder(Job::new(|_token| async { /* sweep */ }))
//!     .name("cleanup")
//!     .by_cron_spec("@every 1s")?
//!     .immediately(true)
//!     .build();
//!
//! group.add([cleanup]).await?;
//! group.run().await;
//!
//! shutdown.cancel();
//! group.wait(Some(Duration::from_secs(5))).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod cron;
mod error;
mod group;
mod job;
mod lock;
mod on_demand;
mod pool;
mod schedule;
mod tick;
mod worker;

pub use config::{parse_timezone, RuntimeConfig};
pub use cron::{cron_ticks, validate_cron_expression, CronSchedule};
pub use error::WorkerError;
pub use group::Group;
pub use job::{Job, JobFuture};
pub use lock::{with_lock, LocalLocker, Locker};
pub use on_demand::OnDemand;
pub use pool::{Canceler, Pool, PoolJob};
pub use schedule::{Schedule, Ticker, Timer};
pub use tick::{interval_ticks, TickHandle, TickSource, MIN_TICK_PERIOD};
pub use worker::{Completion, Worker, WorkerBuilder};
