//! Settings for the worker runtime: which zone cron specs are read in, and
//! how long a stopped group or pool may take to drain.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::WorkerError;

/// Knobs shared by cron workers and group shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Zone used when a cron spec is given without one, as an IANA name.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Seconds a stopped group or pool may take to drain; 0 waits forever.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl RuntimeConfig {
    /// Zone for `WorkerBuilder::by_cron_spec_in` and `cron_ticks`.
    ///
    /// Fails with `WorkerError::InvalidTimezone` for an unknown zone name.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, WorkerError> {
        parse_timezone(&self.default_timezone)
    }

    /// Deadline to pass to `Group::wait`, `None` when the timeout is disabled.
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        match self.shutdown_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Resolve an IANA zone name such as `"Europe/Berlin"`.
pub fn parse_timezone(tz_str: &str) -> Result<chrono_tz::Tz, WorkerError> {
    tz_str
        .parse()
        .map_err(|_| WorkerError::InvalidTimezone(tz_str.to_string()))
}
