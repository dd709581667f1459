//! Directory uploader.
//!
//! Drains the store into an outbox directory that an external transport
//! picks up. Each batch is written to the outbox before it is deleted from
//! the store, so a crash between the two duplicates a batch rather than
//! losing it.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use stumbler_store::ReportStore;
use stumbler_types::{Batch, BatchName, BatchSource};

/// Drain errors.
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error("Failed to create outbox {path}: {source}")]
    CreateOutbox {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] stumbler_store::Error),
}

/// Totals of a drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DrainSummary {
    /// Batches written to the outbox.
    pub batches: u64,
    /// Reports in those batches.
    pub reports: u64,
    /// Wifi observations in those batches.
    pub wifis: u64,
    /// Cell observations in those batches.
    pub cells: u64,
    /// Compressed bytes written.
    pub bytes: u64,
}

/// Move every queued batch into `outbox` and record the upload statistics.
///
/// Stops at the first error; batches not yet written stay queued.
pub fn drain(store: &ReportStore, outbox: &Path) -> Result<DrainSummary, DrainError> {
    fs::create_dir_all(outbox).map_err(|e| DrainError::CreateOutbox {
        path: outbox.to_path_buf(),
        source: e,
    })?;

    let mut summary = DrainSummary::default();
    let mut next = store.get_first_batch()?;

    while let Some(batch) = next {
        let path = deliver(outbox, &batch)?;
        debug!("Delivered {} to {}", batch.source, path.display());

        if !store.delete(&batch.source)? {
            warn!("{} was already gone after delivery", batch.source);
        }
        store.increment_sync_stats(
            batch.len() as u64,
            u64::from(batch.reports),
            u64::from(batch.cells),
            u64::from(batch.wifis),
        )?;

        summary.batches += 1;
        summary.reports += u64::from(batch.reports);
        summary.wifis += u64::from(batch.wifis);
        summary.cells += u64::from(batch.cells);
        summary.bytes += batch.len() as u64;

        next = store.get_next_batch()?;
    }

    info!(
        "Drained {} batch(es), {} report(s), {} bytes into {}",
        summary.batches,
        summary.reports,
        summary.bytes,
        outbox.display()
    );
    Ok(summary)
}

/// Write a batch into the outbox under its batch filename.
fn deliver(outbox: &Path, batch: &Batch) -> Result<PathBuf, DrainError> {
    let mut name = match batch.source {
        BatchSource::File(name) => name,
        BatchSource::SendBuffer => BatchName::now(batch.reports, batch.wifis, batch.cells),
    };
    while outbox.join(name.to_string()).exists() {
        name = name.with_timestamp(name.timestamp_ms + 1);
    }

    let path = outbox.join(name.to_string());
    let tmp_path = outbox.join(format!("{}.tmp", name));
    fs::write(&tmp_path, &batch.data).map_err(|e| DrainError::Write {
        path: tmp_path.clone(),
        source: e,
    })?;
    fs::rename(&tmp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        DrainError::Write {
            path: path.clone(),
            source: e,
        }
    })?;

    Ok(path)
}
