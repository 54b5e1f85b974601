//! Bridge settings
//!
//! Host-imposed limits and well-known names, serializable to/from JSON so the
//! native layer can override them without a rebuild. Every field has a
//! default matching the host work scheduler's documented limits.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Reserved identifier of the singleton periodic fetch task.
pub const DEFAULT_FETCH_TASK_ID: &str = "react-native-background-fetch";

/// Work scheduler extension ability that receives the work callbacks.
pub const DEFAULT_ABILITY_NAME: &str = "MyWorkSchedulerExtensionAbility";

/// Common event channel carrying fetch deliveries.
pub const DEFAULT_EVENT_NAME: &str = "fetch";

/// Complete bridge settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Ability name placed on every work descriptor
    pub ability_name: String,

    /// Reserved task id of the periodic fetch task (never evicted)
    pub fetch_task_id: String,

    /// Event name used both for the host subscription and the outbound device event
    pub event_name: String,

    /// Maximum outstanding work items the host accepts per application
    pub max_works: usize,

    /// Floor applied to every repeat cycle (milliseconds)
    pub min_repeat_cycle_ms: u64,

    /// Window during which repeated configuration of one task id is ignored
    pub dedupe_window_ms: u64,

    /// How long the caller has to `finish` a delivered fetch
    pub fetch_timeout_ms: u64,

    /// Minimum fetch interval used when the caller leaves it unset (minutes)
    pub default_fetch_interval_min: u32,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            ability_name: DEFAULT_ABILITY_NAME.to_string(),
            fetch_task_id: DEFAULT_FETCH_TASK_ID.to_string(),
            event_name: DEFAULT_EVENT_NAME.to_string(),
            max_works: 10,
            min_repeat_cycle_ms: 1_200_000,
            dedupe_window_ms: 1_000,
            fetch_timeout_ms: 60_000,
            default_fetch_interval_min: 20,
        }
    }
}

impl BridgeSettings {
    /// Validate settings
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.ability_name.trim().is_empty() {
            return Err(SettingsError::ConfigError(
                "ability_name cannot be empty".to_string(),
            ));
        }

        if self.fetch_task_id.is_empty() {
            return Err(SettingsError::ConfigError(
                "fetch_task_id cannot be empty".to_string(),
            ));
        }

        if self.event_name.trim().is_empty() {
            return Err(SettingsError::ConfigError(
                "event_name cannot be empty".to_string(),
            ));
        }

        if self.max_works == 0 {
            return Err(SettingsError::ConfigError(
                "max_works must be at least 1".to_string(),
            ));
        }

        if self.fetch_timeout_ms == 0 {
            return Err(SettingsError::ConfigError(
                "fetch_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn dedupe_window(&self) -> Duration {
        Duration::from_millis(self.dedupe_window_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Parse and validate settings from a JSON document
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load settings from a file, falling back to defaults when it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No settings at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Save settings to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        self.validate()?;
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
