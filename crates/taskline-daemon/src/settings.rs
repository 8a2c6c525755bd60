//! Layered daemon settings.

use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use taskline::{RuntimeConfig, WorkerError};
use thiserror::Error;

/// Errors raised while loading settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid runtime settings: {0}")]
    Runtime(#[from] WorkerError),
}

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(flatten)]
    pub runtime: RuntimeConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/taskline/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (TASKLINE_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, SettingsError> {
        let defaults = RuntimeConfig::default();

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())?
            .set_default("default_timezone", defaults.default_timezone)?
            .set_default("shutdown_timeout_secs", defaults.shutdown_timeout_secs as i64)?
            .add_source(File::with_name(&default_config_path().to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // TASKLINE_LOG_LEVEL, TASKLINE_DEFAULT_TIMEZONE, TASKLINE_SHUTDOWN_TIMEOUT_SECS
        builder = builder.add_source(Environment::with_prefix("TASKLINE").try_parsing(true));

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply CLI flag overrides (highest precedence).
    pub fn apply_overrides(
        &mut self,
        log_level: Option<&str>,
        timezone: Option<&str>,
        shutdown_timeout_secs: Option<u64>,
    ) -> Result<(), SettingsError> {
        if let Some(log_level) = log_level {
            self.log_level = log_level.to_string();
        }
        if let Some(timezone) = timezone {
            self.runtime.default_timezone = timezone.to_string();
        }
        if let Some(secs) = shutdown_timeout_secs {
            self.runtime.shutdown_timeout_secs = secs;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), SettingsError> {
        self.runtime.parse_timezone()?;
        Ok(())
    }
}

/// Location of the per-user config file, without extension.
fn default_config_path() -> PathBuf {
    ProjectDirs::from("", "", "taskline")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
        .join("config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use tempfile::TempDir;

    fn write_config(dir: &TempDir, contents: &str) -> String {
        let path = dir.path().join("taskline.toml");
        fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.runtime.default_timezone, "UTC");
        assert_eq!(settings.runtime.shutdown_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_from_cli_config_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "default_timezone = \"Europe/Berlin\"\nshutdown_timeout_secs = 4\n",
        );

        let settings = Settings::load(Some(path.as_str())).unwrap();
        assert_eq!(settings.runtime.default_timezone, "Europe/Berlin");
        assert_eq!(settings.runtime.shutdown_timeout(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_missing_cli_config_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml").to_string_lossy().into_owned();
        let result = Settings::load(Some(path.as_str()));
        assert!(matches!(result, Err(SettingsError::Config(_))));
    }

    #[test]
    fn test_invalid_timezone_in_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "default_timezone = \"Mars/Olympus\"\n");
        let result = Settings::load(Some(path.as_str()));
        assert!(matches!(result, Err(SettingsError::Runtime(WorkerError::InvalidTimezone(_)))));
    }

    #[test]
    fn test_cli_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(Some("debug"), Some("Asia/Tokyo"), Some(0))
            .unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.runtime.default_timezone, "Asia/Tokyo");
        assert_eq!(settings.runtime.shutdown_timeout(), None);

        let result = settings.apply_overrides(None, Some("Nowhere/City"), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_default_config_path_name() {
        assert!(default_config_path().ends_with("config"));
    }
}
