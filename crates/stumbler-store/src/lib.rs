//! Bounded, durable staging store for stumbler reports.
//!
//! Reports are produced faster than they can be uploaded. This crate
//! buffers them in memory, spills them to gzip batch files on local disk,
//! and hands batches to an uploader one at a time, from memory or disk.
//!
//! # Features
//!
//! - In-memory accumulator with an eager flush at a size threshold and a
//!   deferred flush after a quiet period
//! - Batch metadata encoded in filenames; no separate index file
//! - Disk quota with lossy backpressure
//! - All-or-nothing retention purge after a number of weeks
//! - Cumulative upload statistics
//!
//! # Example
//!
//! ```no_run
//! use stumbler_store::{ReportStore, StoreConfig};
//! use stumbler_types::Report;
//!
//! let store = ReportStore::open(StoreConfig::new("/var/lib/stumbler"))?;
//! store.insert(Report::new(r#"{"timestamp":1406863343313}"#, 3, 1));
//!
//! if let Some(batch) = store.get_first_batch()? {
//!     // upload batch.data ...
//!     store.delete(&batch.source)?;
//!     store.increment_sync_stats(
//!         batch.len() as u64,
//!         u64::from(batch.reports),
//!         u64::from(batch.cells),
//!         u64::from(batch.wifis),
//!     )?;
//! }
//! store.shutdown()?;
//! # Ok::<(), stumbler_store::Error>(())
//! ```

mod config;
mod encoder;
mod error;
mod index;
mod retention;
mod stats;
mod store;
mod timer;

pub use config::{
    BatchFraming, DEFAULT_FLUSH_DELAY_SECS, DEFAULT_MAX_BYTES_STORED_ON_DISK,
    DEFAULT_MAX_REPORTS_IN_MEMORY, DEFAULT_MAX_WEEKS_DATA_STORED, REPORTS_DIR, STATS_FILE,
    StoreConfig, ValidationError,
};
pub use encoder::{ReportBatchBuilder, compress, decode_batch};
pub use error::{Error, Result};
pub use index::{BatchIndex, DirectoryAggregate, DirectoryIndex};
pub use retention::RetentionOutcome;
pub use stats::SyncStatsStore;
pub use store::{EmptyStateTracker, ReportStore};

/// Default base directory following platform conventions.
///
/// - Linux: `~/.local/share/stumbler`
/// - macOS: `~/Library/Application Support/stumbler`
/// - Windows: `C:\Users\<user>\AppData\Local\stumbler`
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("stumbler")
}
