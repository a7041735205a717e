use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Scheduler configuration, typically parsed from TOML.
///
/// Environment overrides (`TICKWORK_TICK_INTERVAL_MS`, `TICKWORK_THREAD_NAME`)
/// are applied after parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick interval in milliseconds for callers starting from config.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Name given to the clock thread.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_thread_name() -> String {
    "tickwork-clock".into()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            thread_name: default_thread_name(),
        }
    }
}

impl SchedulerConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!(path = %path.as_ref().display(), "loading scheduler config");
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TICKWORK_TICK_INTERVAL_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                self.tick_interval_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("TICKWORK_THREAD_NAME") {
            if !v.is_empty() {
                self.thread_name = v;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be greater than zero".into(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::Invalid("thread_name must not be empty".into()));
        }
        Ok(())
    }
}
