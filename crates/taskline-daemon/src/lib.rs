//! Taskline daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Demo scenarios and logging setup
//! - `settings`: Layered configuration
//! - `shutdown`: Ctrl+C / SIGTERM handling

pub mod cli;
pub mod commands;
pub mod settings;
pub mod shutdown;

pub use cli::{Cli, Commands};
pub use commands::{init_tracing, run_command, Drain};
pub use settings::{Settings, SettingsError};
pub use shutdown::shutdown_token;
