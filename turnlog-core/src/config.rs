//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/turnlog/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/turnlog/` (~/.config/turnlog/)
//! - Data: `$XDG_DATA_HOME/turnlog/` (~/.local/share/turnlog/)
//! - State/Logs: `$XDG_STATE_HOME/turnlog/` (~/.local/state/turnlog/)

use crate::error::{Error, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name prefix of the daily rotated log
pub const LOG_FILE_PREFIX: &str = "turnlog.log";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Turn interpretation rules
    #[serde(default)]
    pub rules: TurnRules,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Database location override
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Constants that change how turns are classified and timed.
///
/// The attempt-start turn id was 0 in early versions of the tutoring client
/// and 1 afterwards. It is fixed here at 1; turn id 0 is then treated as a
/// filler turn that only the rollup's legacy mode drops.
#[derive(Debug, Deserialize, Clone)]
pub struct TurnRules {
    /// `TurnID` value that marks the first turn of an attempt
    #[serde(default = "default_attempt_start_turn_id")]
    pub attempt_start_turn_id: i64,

    /// Gap forced between a turn and its predecessor during timestamp repair
    #[serde(default = "default_timestamp_margin_ms")]
    pub timestamp_margin_ms: f64,

    /// Drop turn-id 0 filler turns before building attempt rollups
    #[serde(default = "default_skip_filler_turns")]
    pub skip_filler_turns: bool,
}

impl Default for TurnRules {
    fn default() -> Self {
        Self {
            attempt_start_turn_id: default_attempt_start_turn_id(),
            timestamp_margin_ms: default_timestamp_margin_ms(),
            skip_filler_turns: default_skip_filler_turns(),
        }
    }
}

impl TurnRules {
    /// Validate rule values, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if !self.timestamp_margin_ms.is_finite() || self.timestamp_margin_ms < 0.0 {
            return Err(Error::Config(
                "rules.timestamp_margin_ms must be a non-negative number".to_string(),
            ));
        }
        if self.skip_filler_turns && self.attempt_start_turn_id == 0 {
            return Err(Error::Config(
                "rules.skip_filler_turns cannot be used when attempt_start_turn_id is 0"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn default_attempt_start_turn_id() -> i64 {
    1
}

fn default_timestamp_margin_ms() -> f64 {
    200.0
}

fn default_skip_filler_turns() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// Database configuration
#[derive(Debug, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Override for the SQLite file location
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.rules.validate()?;
        Ok(config)
    }

    /// Database file to open: the configured override or the XDG default
    pub fn resolved_database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(Self::database_path)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/turnlog/config.toml` (~/.config/turnlog/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("turnlog").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/turnlog/` (~/.local/share/turnlog/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("turnlog")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/turnlog/` (~/.local/state/turnlog/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("turnlog")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/turnlog/data.db` (~/.local/share/turnlog/data.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("data.db")
    }

    /// Returns the log file written on `date`
    ///
    /// Logs rotate daily, so the file carries the UTC date as a suffix:
    /// `$XDG_STATE_HOME/turnlog/turnlog.log.YYYY-MM-DD`
    pub fn log_path(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!("{}.{}", LOG_FILE_PREFIX, date.format("%Y-%m-%d")))
    }
}
