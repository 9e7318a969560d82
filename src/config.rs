//! Configuration loading.
//!
//! Courier reads a single TOML file (default `~/.courier/config.toml`).
//! Every section and key is optional. Environment variables override file
//! values, and file values override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database location and pool size.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Outgoing pipeline limits.
    #[serde(default)]
    pub outgoing: OutgoingConfig,

    /// Send-job runner behaviour.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file. Relative paths resolve against the working directory.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Read connection pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Outgoing pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingConfig {
    /// Inline body limit in bytes; longer bodies become an attachment.
    #[serde(default = "default_oversize_text_threshold")]
    pub oversize_text_threshold: usize,

    /// Bounded queue depth in front of the single writer.
    #[serde(default = "default_writer_channel_capacity")]
    pub writer_channel_capacity: usize,

    /// How long after sending a message may still be edited.
    #[serde(default = "default_edit_window_secs")]
    pub edit_window_secs: u64,

    /// Maximum edit revisions per message.
    #[serde(default = "default_max_edit_revisions")]
    pub max_edit_revisions: u32,

    /// Directory for spooled oversize text. Kept in memory when unset.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

impl OutgoingConfig {
    /// The edit window as a [`Duration`].
    pub fn edit_window(&self) -> Duration {
        Duration::from_secs(self.edit_window_secs)
    }
}

impl Default for OutgoingConfig {
    fn default() -> Self {
        Self {
            oversize_text_threshold: default_oversize_text_threshold(),
            writer_channel_capacity: default_writer_channel_capacity(),
            edit_window_secs: default_edit_window_secs(),
            max_edit_revisions: default_max_edit_revisions(),
            spool_dir: None,
        }
    }
}

/// Send-job runner settings.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Attempts before a job is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles per attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on the retry delay.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// How often the runner polls for due jobs when not woken.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Jobs attempted per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Directory for JSON log files. Console only when unset.
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,
}

// Default value functions for serde

fn default_database_path() -> PathBuf {
    PathBuf::from("courier.db")
}
fn default_max_connections() -> u32 {
    4
}
fn default_oversize_text_threshold() -> usize {
    crate::outgoing::content::DEFAULT_OVERSIZE_TEXT_THRESHOLD
}
fn default_writer_channel_capacity() -> usize {
    crate::store::WRITER_CHANNEL_CAPACITY
}
fn default_edit_window_secs() -> u64 {
    24 * 60 * 60
}
fn default_max_edit_revisions() -> u32 {
    crate::outgoing::edits::DEFAULT_MAX_EDIT_REVISIONS
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    60_000
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_batch_size() -> u32 {
    32
}

impl Config {
    /// Apply `COURIER_*` overrides resolved through `env`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("COURIER_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(v);
        }
        if let Some(v) = env("COURIER_OVERSIZE_TEXT_THRESHOLD") {
            match v.parse() {
                Ok(n) => self.outgoing.oversize_text_threshold = n,
                Err(_) => tracing::warn!(
                    var = "COURIER_OVERSIZE_TEXT_THRESHOLD",
                    value = %v,
                    "invalid override, ignoring"
                ),
            }
        }
        if let Some(v) = env("COURIER_MAX_ATTEMPTS") {
            match v.parse() {
                Ok(n) => self.jobs.max_attempts = n,
                Err(_) => tracing::warn!(
                    var = "COURIER_MAX_ATTEMPTS",
                    value = %v,
                    "invalid override, ignoring"
                ),
            }
        }
        if let Some(v) = env("COURIER_LOGS_DIR") {
            self.logging.logs_dir = Some(PathBuf::from(v));
        }
    }
}

/// Load the config from a TOML file and apply environment overrides.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse config at {}: {e}", path.display()))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Config::default()
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            ))
        }
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    Ok(config)
}

/// Resolve the default config directory (`~/.courier/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".courier"))
}
