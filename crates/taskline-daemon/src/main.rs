//! Taskline Daemon
//!
//! Runs one of the worker demo scenarios until Ctrl+C or SIGTERM, then
//! drains its workers.
//!
//! # Usage
//!
//! ```bash
//! taskline-daemon simple [--interval SECS]
//! taskline-daemon cron [--spec SPEC]
//! taskline-daemon chain | grace | locker
//! taskline-daemon on-demand [--delay SECS]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/taskline/config.toml)
//! 3. Config file given with --config
//! 4. Environment variables (TASKLINE_*)
//! 5. CLI flags

use anyhow::{Context, Result};
use clap::Parser;

use taskline_daemon::{init_tracing, run_command, shutdown_token, Cli, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    settings
        .apply_overrides(
            cli.log_level.as_deref(),
            cli.timezone.as_deref(),
            cli.shutdown_timeout,
        )
        .context("Invalid command-line overrides")?;

    init_tracing(&settings)?;

    run_command(cli.command, &settings, shutdown_token()).await
}
