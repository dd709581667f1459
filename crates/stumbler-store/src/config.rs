//! Store configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the directory holding batch files, relative to the base dir.
pub const REPORTS_DIR: &str = "reports";
/// Name of the sync statistics file, relative to the base dir.
pub const STATS_FILE: &str = "upload_stats.ini";

/// Default disk quota (250 KiB).
pub const DEFAULT_MAX_BYTES_STORED_ON_DISK: u64 = 256_000;
/// Default retention ceiling in weeks.
pub const DEFAULT_MAX_WEEKS_DATA_STORED: u32 = 2;
/// Default accumulator size that triggers an eager flush.
pub const DEFAULT_MAX_REPORTS_IN_MEMORY: usize = 50;
/// Default idle delay before the accumulator is flushed to disk (3 minutes).
pub const DEFAULT_FLUSH_DELAY_SECS: u64 = 180;

/// How report payloads are joined inside a batch before compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFraming {
    /// One report per line.
    #[default]
    Lines,
    /// `{"items":[r1,r2,...]}`, for collectors that take a JSON envelope.
    JsonItems,
}

/// Report store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Base directory; batches go to `<base_dir>/reports`.
    pub base_dir: PathBuf,
    /// Once batch files take more than this many bytes, new batches are dropped.
    pub max_bytes_stored_on_disk: u64,
    /// If any batch is older than this, every batch is purged.
    pub max_weeks_data_stored: u32,
    /// Accumulator size that triggers a synchronous flush.
    pub max_reports_in_memory: usize,
    /// Idle delay before the accumulator is flushed to disk.
    pub flush_delay_secs: u64,
    /// Payload framing inside a batch.
    pub framing: BatchFraming,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_dir: crate::default_data_dir(),
            max_bytes_stored_on_disk: DEFAULT_MAX_BYTES_STORED_ON_DISK,
            max_weeks_data_stored: DEFAULT_MAX_WEEKS_DATA_STORED,
            max_reports_in_memory: DEFAULT_MAX_REPORTS_IN_MEMORY,
            flush_delay_secs: DEFAULT_FLUSH_DELAY_SECS,
            framing: BatchFraming::default(),
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `base_dir`.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Directory holding the batch files.
    pub fn reports_dir(&self) -> PathBuf {
        self.base_dir.join(REPORTS_DIR)
    }

    /// Path of the sync statistics file.
    pub fn stats_path(&self) -> PathBuf {
        self.base_dir.join(STATS_FILE)
    }

    /// Idle flush delay as a [`Duration`].
    pub fn flush_delay(&self) -> Duration {
        Duration::from_secs(self.flush_delay_secs)
    }

    /// Retention window in milliseconds.
    pub fn retention_window_ms(&self) -> u64 {
        u64::from(self.max_weeks_data_stored) * 7 * 24 * 60 * 60 * 1000
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.base_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.base_dir",
                "base directory cannot be empty",
            ));
        }
        if self.max_bytes_stored_on_disk == 0 {
            errors.push(ValidationError::new(
                "storage.max_bytes_stored_on_disk",
                "disk quota must be greater than 0",
            ));
        }
        if self.max_weeks_data_stored == 0 {
            errors.push(ValidationError::new(
                "storage.max_weeks_data_stored",
                "retention must be at least 1 week",
            ));
        }
        if self.max_reports_in_memory == 0 {
            errors.push(ValidationError::new(
                "storage.max_reports_in_memory",
                "must hold at least 1 report in memory",
            ));
        }
        if self.flush_delay_secs == 0 {
            errors.push(ValidationError::new(
                "storage.flush_delay_secs",
                "flush delay must be greater than 0",
            ));
        }

        errors
    }
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `storage.max_bytes_stored_on_disk`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for `field`.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
