//! Application configuration.
//!
//! Stored as JSON. Every section is optional and falls back to its default.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use inkpad_common::{Error, Result};
use inkpad_sync::{RetryConfig, SyncConfig};

/// Default config file name inside the data directory.
pub const CONFIG_FILENAME: &str = "inkpad.json";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub retry: RetrySettings,
    pub sync: SyncConfig,
}

/// Primary backend plus an optional failover target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub primary: BackendConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<BackendConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            primary: BackendConfig::local(default_data_dir()),
            secondary: None,
        }
    }
}

/// One backend: a registry kind and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: String,
    #[serde(default)]
    pub options: Value,
}

impl BackendConfig {
    pub fn memory() -> Self {
        Self {
            kind: "memory".to_string(),
            options: Value::Null,
        }
    }

    pub fn local(root: impl AsRef<Path>) -> Self {
        Self {
            kind: "local".to_string(),
            options: serde_json::json!({ "root": root.as_ref() }),
        }
    }
}

/// Retry settings in config-file units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
            jitter: defaults.jitter,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
            .with_jitter(self.jitter)
    }
}

impl AppConfig {
    /// Config backed by a single in-memory store.
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig {
                primary: BackendConfig::memory(),
                secondary: None,
            },
            ..Self::default()
        }
    }

    /// Config backed by a local directory.
    pub fn local(root: impl AsRef<Path>) -> Self {
        Self {
            storage: StorageConfig {
                primary: BackendConfig::local(root),
                secondary: None,
            },
            ..Self::default()
        }
    }

    /// Parse from JSON.
    ///
    /// # Errors
    /// - `Serialization` if the JSON is malformed
    /// - `InvalidInput` if a value is out of range
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Load from a file if it exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(Error::from)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.retry.backoff_multiplier < 1.0 || !self.retry.backoff_multiplier.is_finite() {
            return Err(Error::InvalidInput(
                "retry.backoff_multiplier must be a finite number >= 1".to_string(),
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(Error::InvalidInput(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Platform data directory for Inkpad, or `./inkpad` when there is none.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("inkpad")
}

/// Default config file location.
pub fn default_config_path() -> PathBuf {
    default_data_dir().join(CONFIG_FILENAME)
}
