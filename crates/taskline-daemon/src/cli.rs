//! CLI argument parsing for the taskline daemon.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Taskline Daemon
///
/// Runs background worker scenarios until Ctrl+C or SIGTERM.
#[derive(Parser, Debug)]
#[command(name = "taskline-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/taskline/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Default timezone for cron specs (IANA name, e.g. Europe/Berlin)
    #[arg(long, global = true)]
    pub timezone: Option<String>,

    /// Seconds to wait for workers after shutdown (0 = no deadline)
    #[arg(long, global = true)]
    pub shutdown_timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Demo scenarios
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Tick-driven pool job with a cleanup callback
    Simple {
        /// Seconds between ticks
        #[arg(short, long, default_value = "2")]
        interval: u64,
    },

    /// Tick-driven pool job fed by a cron spec
    Cron {
        /// Cron spec, descriptor or @every duration
        #[arg(short, long, default_value = "@every 2s")]
        spec: String,
    },

    /// Nested groups drained from the outermost one
    Chain,

    /// Bounded shutdown wait with a worker that ignores cancellation
    Grace,

    /// Countdown schedules sharing a lock
    Locker,

    /// Periodic workers plus a delayed on-demand trigger
    OnDemand {
        /// Seconds before the on-demand worker is triggered
        #[arg(short, long, default_value = "5")]
        delay: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_simple_default_interval() {
        let cli = Cli::parse_from(["taskline-daemon", "simple"]);
        match cli.command {
            Commands::Simple { interval } => assert_eq!(interval, 2),
            _ => panic!("Expected Simple command"),
        }
    }

    #[test]
    fn test_cli_cron_with_spec() {
        let cli = Cli::parse_from(["taskline-daemon", "cron", "--spec", "0 */5 * * * *"]);
        match cli.command {
            Commands::Cron { spec } => assert_eq!(spec, "0 */5 * * * *"),
            _ => panic!("Expected Cron command"),
        }
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["taskline-daemon", "--config", "/path/to/config.toml", "chain"]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
        assert!(matches!(cli.command, Commands::Chain));
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "taskline-daemon",
            "grace",
            "--log-level",
            "debug",
            "--timezone",
            "Europe/Berlin",
            "--shutdown-timeout",
            "0",
        ]);
        assert!(matches!(cli.command, Commands::Grace));
        assert_eq!(cli.log_level, Some("debug".to_string()));
        assert_eq!(cli.timezone, Some("Europe/Berlin".to_string()));
        assert_eq!(cli.shutdown_timeout, Some(0));
    }

    #[test]
    fn test_cli_on_demand_delay() {
        let cli = Cli::parse_from(["taskline-daemon", "on-demand", "-d", "1"]);
        match cli.command {
            Commands::OnDemand { delay } => assert_eq!(delay, 1),
            _ => panic!("Expected OnDemand command"),
        }
    }

    #[test]
    fn test_cli_locker() {
        let cli = Cli::parse_from(["taskline-daemon", "locker"]);
        assert!(matches!(cli.command, Commands::Locker));
    }
}
