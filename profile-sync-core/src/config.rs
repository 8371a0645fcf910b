//! Tuning configuration for the orchestrator and popup manager.
//!
//! # Storage layout
//!
//! ```text
//! ~/.profile-sync/
//!   config.yaml   (optional, every field has a default)
//! ```
//!
//! Like the rest of the workspace, loading has two forms:
//! - `load_at(home)`: explicit home; used in tests with `TempDir`
//! - `load()`: derives home from `dirs::home_dir()`, delegates to `load_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

/// Integrity checksum used by the serializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// 32-bit rolling hash; corruption detection only.
    #[default]
    Rolling,
    Sha256,
}

/// Orchestrator tuning constants. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Cool-down after an immediate send, per key.
    pub throttle_delay_ms: u64,
    /// Quiet gap required before a debounced key is sent.
    pub debounce_delay_ms: u64,
    /// Window in which different keys are coalesced into one batch.
    pub batch_window_ms: u64,
    pub batching_enabled: bool,
    /// Rolling window for the per-key frequency counter.
    pub frequency_window_ms: u64,
    /// Events per window above which a key is debounced.
    pub high_frequency_threshold: u32,
    pub max_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_queue_size: usize,
    pub max_failed_events: usize,
    pub max_tracked_keys: usize,
    /// `0` disables periodic reachability probing.
    pub probe_interval_ms: u64,
    /// Consecutive probe failures before the network is declared offline.
    pub probe_failure_threshold: u32,
    pub channel_name: String,
    pub storage_key: String,
    pub checksum: ChecksumAlgorithm,
    pub popup: PopupConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            throttle_delay_ms: 100,
            debounce_delay_ms: 300,
            batch_window_ms: 50,
            batching_enabled: true,
            frequency_window_ms: 1000,
            high_frequency_threshold: 5,
            max_retry_attempts: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 10_000,
            max_queue_size: 100,
            max_failed_events: 50,
            max_tracked_keys: 500,
            probe_interval_ms: 30_000,
            probe_failure_threshold: 3,
            channel_name: "profile-sync".to_string(),
            storage_key: "profile-sync:event".to_string(),
            checksum: ChecksumAlgorithm::Rolling,
            popup: PopupConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn throttle_delay(&self) -> Duration {
        Duration::from_millis(self.throttle_delay_ms)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_ms > 0).then(|| Duration::from_millis(self.probe_interval_ms))
    }

    /// Backoff before retry number `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `retry_max_delay_ms`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .retry_base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Reject configurations that would break the bounded-memory or retry
    /// guarantees.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let capacities = [
            ("max_queue_size", self.max_queue_size),
            ("max_failed_events", self.max_failed_events),
            ("max_tracked_keys", self.max_tracked_keys),
        ];
        for (name, value) in capacities {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        if self.max_retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_retry_attempts must be greater than 0".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }
        if self.probe_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "probe_failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.frequency_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "frequency_window_ms must be greater than 0".to_string(),
            ));
        }
        if self.channel_name.trim().is_empty() || self.storage_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "channel_name and storage_key must not be empty".to_string(),
            ));
        }
        self.popup.validate()
    }
}

/// Popup manager tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopupConfig {
    /// Liveness poll interval for an open popup.
    pub poll_interval_ms: u64,
    /// Viewports narrower than this use the modal fallback directly.
    pub mobile_breakpoint_px: u32,
    /// Profile editor route on the popup origin.
    pub edit_path: String,
}

impl Default for PopupConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            mobile_breakpoint_px: 768,
            edit_path: "/profile/edit".to_string(),
        }
    }
}

impl PopupConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "popup.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if !self.edit_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "popup.edit_path must start with '/', got '{}'",
                self.edit_path
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// `<home>/.profile-sync/config.yaml`, pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".profile-sync").join("config.yaml")
}

/// Load and validate the config under `home`; a missing file yields defaults.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    load_file(&path)
}

/// Load and validate a config from an explicit file.
pub fn load_file(path: &Path) -> Result<SyncConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let config: SyncConfig = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

/// Write `config` to `<home>/.profile-sync/config.yaml` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    config.validate()?;
    let path = config_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid config path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let yaml = serde_yaml::to_string(config)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}
