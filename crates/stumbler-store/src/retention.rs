//! Age-based retention.
//!
//! Retention is all-or-nothing: once the oldest batch on disk is older than
//! the configured number of weeks, every batch is deleted, not just the
//! expired ones.

use tracing::{debug, info};

use stumbler_types::now_ms;

use crate::error::Result;
use crate::store::ReportStore;

/// Result of a retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionOutcome {
    /// There were no batch files.
    Empty,
    /// The oldest batch is still within the retention window.
    Retained {
        /// Timestamp of the oldest batch, ms since the Unix epoch.
        oldest_ms: u64,
    },
    /// The oldest batch had expired and every batch file was deleted.
    Purged {
        /// Number of files deleted.
        files: usize,
        /// Timestamp of the batch that triggered the purge.
        oldest_ms: u64,
    },
}

impl ReportStore {
    /// Whether the oldest batch is older than the retention window at `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        let state = self.shared.lock();
        if state.index.is_empty() {
            return false;
        }
        let oldest = state.index.aggregate().oldest_timestamp_ms();
        now_ms.saturating_sub(oldest) > self.config().retention_window_ms()
    }

    /// Purge all batch files if the oldest one has expired.
    pub fn sweep_expired(&self) -> Result<RetentionOutcome> {
        self.sweep_expired_at(now_ms())
    }

    /// [`sweep_expired`](Self::sweep_expired) against an explicit clock.
    pub fn sweep_expired_at(&self, now_ms: u64) -> Result<RetentionOutcome> {
        let window = self.config().retention_window_ms();
        let mut state = self.shared.lock();
        state.index.refresh();

        if state.index.is_empty() {
            state.update_tracker();
            return Ok(RetentionOutcome::Empty);
        }

        let oldest_ms = state.index.aggregate().oldest_timestamp_ms();
        let age_ms = now_ms.saturating_sub(oldest_ms);
        if age_ms <= window {
            debug!(
                "Oldest batch is {} ms old, within the {} ms window",
                age_ms, window
            );
            return Ok(RetentionOutcome::Retained { oldest_ms });
        }

        let result = state.index.remove_all();
        state.update_tracker();
        let files = result?;

        info!(
            "Purged {} batch file(s); oldest was {} ms old (limit {} week(s))",
            files,
            age_ms,
            self.max_weeks_stored()
        );
        Ok(RetentionOutcome::Purged { files, oldest_ms })
    }
}
