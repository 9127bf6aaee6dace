use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Options for one parallel run. Every field has a default, so a partial
/// `[parallel]` table (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelOptions {
    /// Maximum number of jobs running at once.
    pub throttle: usize,
    /// How often the scheduler re-checks job status; also the backoff while saturated.
    pub poll_interval_ms: u64,
    /// Per-job wall-clock limit in seconds (0 = unbounded).
    pub job_timeout_secs: u64,
    /// Maximum number of undrained job records before dispatch pauses.
    /// When unset: `throttle` if a timeout is configured, else `throttle * 3`.
    pub max_queue: Option<usize>,
    /// Leave a timed-out worker alone instead of cancelling and disposing it.
    pub no_close_on_timeout: bool,
    /// Seed workers with a snapshot of the process environment (taken once, lazily).
    pub capture_environment: bool,
    /// Suppress progress updates.
    pub quiet: bool,
    /// Audit log file (one row per finished job). No log when unset.
    pub log_destination: Option<PathBuf>,
    /// Append to an existing audit log instead of starting a fresh one.
    pub append_log: bool,
    /// Stack size in bytes for worker threads; platform default when unset.
    pub worker_stack_size: Option<usize>,
    /// What the inputs are called in progress text.
    pub object_name_label: String,
    /// Progress activity title.
    pub activity_label: String,
    /// Progress status text.
    pub status_label: String,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            throttle: 20,
            poll_interval_ms: 200,
            job_timeout_secs: 0,
            max_queue: None,
            no_close_on_timeout: false,
            capture_environment: false,
            quiet: false,
            log_destination: None,
            append_log: false,
            worker_stack_size: None,
            object_name_label: "input objects".to_string(),
            activity_label: "Running Query".to_string(),
            status_label: "Starting threads".to_string(),
        }
    }
}

impl ParallelOptions {
    /// Max queue after applying the default: `throttle` when a timeout is set,
    /// `throttle * 3` otherwise.
    pub fn effective_max_queue(&self) -> usize {
        match self.max_queue {
            Some(n) => n,
            None if self.job_timeout_secs > 0 => self.throttle,
            None => self.throttle.saturating_mul(3),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-job timeout, `None` when unbounded.
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle == 0 {
            return Err(ConfigError::ZeroThrottle);
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.effective_max_queue() == 0 {
            return Err(ConfigError::ZeroMaxQueue);
        }
        Ok(())
    }
}

/// Global configuration loaded from `~/.config/fanout/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Defaults for every run; CLI flags override individual fields.
    #[serde(default)]
    pub parallel: ParallelOptions,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fanout")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<FanoutConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = FanoutConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }
    load_from_path(&path)
}

/// Load configuration from an explicit file.
pub fn load_from_path(path: &Path) -> Result<FanoutConfig> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    let cfg: FanoutConfig =
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?;
    Ok(cfg)
}
