//! Error types for stumbler-store.

use std::path::PathBuf;

/// Result type for stumbler-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stumbler-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Compressing a batch failed. Nothing was persisted.
    #[error("Failed to compress batch: {0}")]
    Encode(#[source] std::io::Error),

    /// Decompressing a batch failed.
    #[error("Failed to decompress batch: {0}")]
    Decode(#[source] std::io::Error),

    /// Failed to create the storage directory.
    #[error("Failed to create storage directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a batch or stats file.
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to read a batch or stats file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to delete a batch file.
    #[error("Failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A sync statistics value is not a number.
    #[error("Invalid sync stats value for '{key}': {value}")]
    InvalidStats { key: String, value: String },
}
