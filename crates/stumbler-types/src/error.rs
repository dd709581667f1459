//! Error types for data parsing in stumbler-types.

use thiserror::Error;

/// Errors that can occur when decoding stumbler metadata.
///
/// This error type is storage-agnostic and does not include filesystem
/// errors (those belong in stumbler-store).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A batch filename did not follow the `reports-t..-r..-w..-c...gz` format.
    #[error("Invalid batch name '{name}': {reason}")]
    InvalidBatchName {
        /// The offending name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl ParseError {
    pub(crate) fn batch_name(name: &str, reason: impl Into<String>) -> Self {
        ParseError::InvalidBatchName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using stumbler-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
