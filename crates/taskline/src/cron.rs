//! Cron-spec driven schedules.
//!
//! Spec strings are parsed when a worker is configured, never at the first
//! tick, so a typo fails loudly instead of producing a schedule that never
//! fires. Accepted forms:
//!
//! - `@every <duration>`, e.g. `@every 1s`, `@every 1m30s`, `@every 250ms`
//! - `@yearly` (`@annually`), `@monthly`, `@weekly`, `@daily` (`@midnight`), `@hourly`
//! - 5-field cron (`min hour dom month dow`) or 6-field cron with seconds
//!
//! Cron expressions are evaluated by `tokio-cron-scheduler`, which acts as
//! an external engine feeding a [`TickSource`].

use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::mpsc;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::schedule::{Schedule, Ticker};
use crate::tick::{self, TickHandle, TickSource};
use crate::{Job, WorkerError};

/// Validate a cron expression.
///
/// Checks that the expression is syntactically valid for the cron engine.
/// The expression should use 6-field format: second minute hour
/// day-of-month month day-of-week.
///
/// # Errors
///
/// Returns `WorkerError::InvalidSchedule` if the expression is not valid.
///
/// # Example
///
/// ```
/// use taskline::validate_cron_expression;
///
/// assert!(validate_cron_expression("0 0 * * * *").is_ok());  // Every hour
/// assert!(validate_cron_expression("0 30 4 * * *").is_ok()); // 4:30 AM daily
///
/// assert!(validate_cron_expression("invalid").is_err());
/// assert!(validate_cron_expression("").is_err());
/// ```
pub fn validate_cron_expression(expr: &str) -> Result<(), WorkerError> {
    // tokio-cron-scheduler parses with croner when the job is built
    match CronJob::new_async(expr, |_uuid, _lock| Box::pin(async {})) {
        Ok(_) => Ok(()),
        Err(e) => Err(WorkerError::InvalidSchedule(format!("'{}': {}", expr, e))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CronKind {
    /// `@every` shorthand, a plain fixed interval
    Every(Duration),
    /// Normalized 6-field cron expression
    Expression { expr: String, tz: Tz },
}

/// Schedule parsed from a cron-style spec string.
///
/// # Example
///
/// ```
/// use taskline::CronSchedule;
///
/// assert!(CronSchedule::parse("@every 2s").is_ok());
/// assert!(CronSchedule::parse("*/5 * * * *").is_ok());
/// assert!(CronSchedule::parse("tomorrow").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    spec: String,
    kind: CronKind,
}

impl CronSchedule {
    /// Parse a spec string, evaluating cron expressions in UTC.
    pub fn parse(spec: &str) -> Result<Self, WorkerError> {
        Self::parse_in(spec, Tz::UTC)
    }

    /// Parse a spec string, evaluating cron expressions in `tz`.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::InvalidSchedule` for anything that cannot
    /// produce ticks: unknown descriptors, zero or malformed `@every`
    /// durations, wrong field counts and expressions the engine rejects.
    pub fn parse_in(spec: &str, tz: Tz) -> Result<Self, WorkerError> {
        let trimmed = spec.trim();
        let invalid = |reason: &str| WorkerError::InvalidSchedule(format!("'{}': {}", spec, reason));

        let kind = if let Some(every) = trimmed.strip_prefix("@every") {
            let period = parse_every(every).ok_or_else(|| invalid("bad @every duration"))?;
            if period.is_zero() {
                return Err(invalid("@every duration must be positive"));
            }
            CronKind::Every(period)
        } else if trimmed.starts_with('@') {
            let expr = descriptor(trimmed).ok_or_else(|| invalid("unknown descriptor"))?;
            CronKind::Expression {
                expr: expr.to_string(),
                tz,
            }
        } else {
            let expr = match trimmed.split_whitespace().count() {
                5 => format!("0 {}", trimmed),
                6 | 7 => trimmed.to_string(),
                n => return Err(invalid(&format!("expected 5 or 6 fields, got {}", n))),
            };
            validate_cron_expression(&expr)?;
            CronKind::Expression { expr, tz }
        };

        Ok(Self {
            spec: spec.to_string(),
            kind,
        })
    }

    /// The spec string this schedule was parsed from.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Fixed period for `@every` specs, `None` for calendar expressions.
    pub fn interval(&self) -> Option<Duration> {
        match self.kind {
            CronKind::Every(period) => Some(period),
            CronKind::Expression { .. } => None,
        }
    }

    /// Start producing ticks for this schedule.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ticks(&self) -> (TickSource, TickHandle) {
        match &self.kind {
            CronKind::Every(period) => tick::interval_ticks(*period),
            CronKind::Expression { expr, tz } => {
                let (tx, rx) = tick::tick_channel();
                let token = CancellationToken::new();
                tokio::spawn(run_cron_engine(expr.clone(), *tz, tx, token.clone()));
                (rx, TickHandle::new(token))
            }
        }
    }
}

impl Schedule for CronSchedule {
    fn wrap(&self, token: CancellationToken, job: Job) -> Job {
        if let CronKind::Every(period) = self.kind {
            return Ticker::new(period).wrap(token, job);
        }

        let schedule = self.clone();
        Job::new(move |token| {
            let job = job.clone();
            let schedule = schedule.clone();
            async move {
                let (mut ticks, handle) = schedule.ticks();
                let _stop = handle.token().drop_guard();
                tick::drive(&job, &token, &mut ticks).await;
                if !token.is_cancelled() {
                    warn!(cron = %schedule.spec, "Cron tick source ended before cancellation");
                }
            }
        })
    }
}

/// Parse a spec and start its tick producer.
///
/// This is the external-engine counterpart of [`CronSchedule`] for the
/// tick-driven [`Pool`](crate::Pool).
pub fn cron_ticks(spec: &str, tz: Tz) -> Result<(TickSource, TickHandle), WorkerError> {
    Ok(CronSchedule::parse_in(spec, tz)?.ticks())
}

async fn run_cron_engine(
    expr: String,
    tz: Tz,
    tx: mpsc::Sender<chrono::DateTime<Utc>>,
    token: CancellationToken,
) {
    if let Err(e) = cron_engine(&expr, tz, tx, token).await {
        error!(cron = %expr, error = %e, "Cron tick source failed");
    }
}

async fn cron_engine(
    expr: &str,
    tz: Tz,
    tx: mpsc::Sender<chrono::DateTime<Utc>>,
    token: CancellationToken,
) -> Result<(), WorkerError> {
    let mut scheduler = JobScheduler::new().await?;

    let sender = tx.clone();
    let job = CronJob::new_async_tz(expr, tz, move |_uuid, _lock| {
        let sender = sender.clone();
        Box::pin(async move {
            // Full means the previous tick is still pending
            let _ = sender.try_send(Utc::now());
        })
    })
    .map_err(|e| WorkerError::InvalidSchedule(format!("'{}': {}", expr, e)))?;

    let job_id: Uuid = scheduler.add(job).await?;
    scheduler.start().await?;
    debug!(cron = %expr, job_id = %job_id, timezone = %tz.name(), "Cron tick source started");

    tokio::select! {
        _ = token.cancelled() => {}
        _ = tx.closed() => {}
    }

    scheduler.shutdown().await?;
    debug!(cron = %expr, job_id = %job_id, "Cron tick source stopped");
    Ok(())
}

fn descriptor(name: &str) -> Option<&'static str> {
    match name {
        "@yearly" | "@annually" => Some("0 0 0 1 1 *"),
        "@monthly" => Some("0 0 0 1 * *"),
        "@weekly" => Some("0 0 0 * * SUN"),
        "@daily" | "@midnight" => Some("0 0 0 * * *"),
        "@hourly" => Some("0 0 * * * *"),
        _ => None,
    }
}

/// Parse durations such as `1s`, `250ms`, `1h30m`.
fn parse_every(text: &str) -> Option<Duration> {
    let mut rest = text.trim();
    if rest.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        rest = &rest[unit_len..];
        total = total.checked_add(part)?;
    }
    Some(total)
}
