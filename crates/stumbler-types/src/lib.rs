//! Platform-agnostic types for staged stumbler report batches.
//!
//! This crate provides the data types shared by the report store
//! (stumbler-store) and anything that consumes its batches, such as an
//! uploader.
//!
//! # Features
//!
//! - Report, batch and queued-count types
//! - The batch filename codec (metadata lives in the filename)
//! - Cumulative sync statistics
//! - Error types for metadata parsing
//!
//! # Example
//!
//! ```
//! use stumbler_types::{BatchName, BatchSource};
//!
//! let name: BatchName = "reports-t1406863343313-r4-w25-c7.gz".parse()?;
//! assert_eq!(name.reports, 4);
//! assert_eq!(BatchSource::File(name).to_string(), "reports-t1406863343313-r4-w25-c7.gz");
//! # Ok::<(), stumbler_types::ParseError>(())
//! ```

pub mod error;
pub mod naming;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use naming::{BatchName, now_ms};
pub use types::{Batch, BatchSource, QueuedCounts, Report, SYNC_STATS_VERSION, SyncStats};
