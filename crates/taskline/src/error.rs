//! Error types for the taskline crate.
//!
//! Covers schedule configuration, group lifecycle and lock contention.

use std::time::Duration;

use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;

/// Errors that can occur while configuring or supervising workers.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The group (or pool) was stopped and accepts nothing new. It may still
    /// be draining.
    #[error("Group is already stopped")]
    GroupStopped,

    /// `wait` gave up before the group drained. The group keeps draining.
    #[error("Wait deadline exceeded after {0:?}")]
    WaitTimeout(Duration),

    /// A `Locker` could not obtain exclusivity right now.
    #[error("Lock not acquired")]
    LockNotAcquired,

    /// Schedule spec that can never fire (bad cron expression, zero interval...)
    #[error("Invalid schedule specification: {0}")]
    InvalidSchedule(String),

    /// Invalid timezone string
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Error from the underlying tokio-cron-scheduler engine
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<JobSchedulerError> for WorkerError {
    fn from(err: JobSchedulerError) -> Self {
        WorkerError::Scheduler(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkerError::GroupStopped;
        assert!(err.to_string().contains("already stopped"));

        let err = WorkerError::WaitTimeout(Duration::from_secs(4));
        assert!(err.to_string().contains("deadline exceeded"));
        assert!(err.to_string().contains("4s"));

        let err = WorkerError::LockNotAcquired;
        assert!(err.to_string().contains("not acquired"));

        let err = WorkerError::InvalidSchedule("tomorrow".to_string());
        assert!(err.to_string().contains("Invalid schedule"));
        assert!(err.to_string().contains("tomorrow"));

        let err = WorkerError::InvalidTimezone("Bad/Zone".to_string());
        assert!(err.to_string().contains("Invalid timezone"));
    }
}
