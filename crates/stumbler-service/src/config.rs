//! Service configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use stumbler_store::{StoreConfig, ValidationError};

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Report store settings.
    pub storage: StoreConfig,
    /// Retention sweep settings.
    pub retention: RetentionConfig,
    /// Drain settings.
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Storage limits are non-zero and the base directory is set
    /// - The retention sweep interval is within bounds (1 minute - 1 day)
    /// - The outbox path is not empty
    ///
    /// # Example
    ///
    /// ```
    /// use stumbler_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        errors.extend(self.storage.validate());
        errors.extend(self.retention.validate());
        errors.extend(self.upload.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Minimum sweep interval in seconds (1 minute).
pub const MIN_SWEEP_INTERVAL: u64 = 60;
/// Maximum sweep interval in seconds (1 day).
pub const MAX_SWEEP_INTERVAL: u64 = 86_400;

/// Retention sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Seconds between retention sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3600,
        }
    }
}

impl RetentionConfig {
    /// Sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Validate retention configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.sweep_interval_secs < MIN_SWEEP_INTERVAL {
            errors.push(ValidationError::new(
                "retention.sweep_interval_secs",
                format!(
                    "sweep interval {} is too short (minimum {} seconds)",
                    self.sweep_interval_secs, MIN_SWEEP_INTERVAL
                ),
            ));
        } else if self.sweep_interval_secs > MAX_SWEEP_INTERVAL {
            errors.push(ValidationError::new(
                "retention.sweep_interval_secs",
                format!(
                    "sweep interval {} is too long (maximum {} seconds / 1 day)",
                    self.sweep_interval_secs, MAX_SWEEP_INTERVAL
                ),
            ));
        }

        errors
    }
}

/// Drain configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Directory that drained batches are copied into.
    pub outbox: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            outbox: stumbler_store::default_data_dir().join("outbox"),
        }
    }
}

impl UploadConfig {
    /// Validate drain configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.outbox.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "upload.outbox",
                "outbox path cannot be empty",
            ));
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stumbler")
        .join("service.toml")
}
