//! Core types for staged report data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::naming::BatchName;

/// One serialized observation report plus the sub-counts it contributes.
///
/// The payload is opaque to the store; it is only ever concatenated and
/// compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Report {
    /// Serialized report text.
    pub payload: String,
    /// Wifi access points observed in this report.
    pub wifis: u32,
    /// Cell towers observed in this report.
    pub cells: u32,
}

impl Report {
    /// Create a new report.
    pub fn new(payload: impl Into<String>, wifis: u32, cells: u32) -> Self {
        Self {
            payload: payload.into(),
            wifis,
            cells,
        }
    }
}

/// Where a [`Batch`] came from, and the token used to delete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BatchSource {
    /// The single in-memory send buffer.
    SendBuffer,
    /// A batch file on disk.
    File(BatchName),
}

impl BatchSource {
    /// Returns true for the in-memory send buffer.
    #[must_use]
    pub fn is_send_buffer(&self) -> bool {
        matches!(self, BatchSource::SendBuffer)
    }
}

impl fmt::Display for BatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchSource::SendBuffer => write!(f, "in memory send buffer"),
            BatchSource::File(name) => write!(f, "{}", name),
        }
    }
}

/// A compressed unit of reports handed to an uploader.
///
/// Immutable once built. Pass [`Batch::source`] back to the store to
/// delete the batch after it has been transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Batch {
    /// Deletion token.
    pub source: BatchSource,
    /// Gzip-compressed report text.
    pub data: Vec<u8>,
    /// Number of reports in the batch.
    pub reports: u32,
    /// Wifi observations in the batch.
    pub wifis: u32,
    /// Cell observations in the batch.
    pub cells: u32,
}

impl Batch {
    /// Size of the compressed payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the compressed payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Totals of everything currently queued for upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct QueuedCounts {
    /// Queued reports.
    pub reports: u64,
    /// Queued wifi observations.
    pub wifis: u64,
    /// Queued cell observations.
    pub cells: u64,
    /// Compressed size in bytes.
    pub bytes: u64,
}

impl QueuedCounts {
    /// Returns true when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports == 0
    }
}

/// Current schema version of the persisted sync statistics.
pub const SYNC_STATS_VERSION: u32 = 1;

/// Cumulative upload counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SyncStats {
    /// Time of the last recorded upload, ms since the Unix epoch (0 = never).
    pub last_upload_time_ms: u64,
    /// Total compressed bytes sent.
    pub bytes_sent: u64,
    /// Total reports sent.
    pub observations_sent: u64,
    /// Total cell observations sent.
    pub cells_sent: u64,
    /// Total wifi observations sent.
    pub wifis_sent: u64,
    /// Schema version the record was written with.
    pub version: u32,
}

impl Default for SyncStats {
    fn default() -> Self {
        Self {
            last_upload_time_ms: 0,
            bytes_sent: 0,
            observations_sent: 0,
            cells_sent: 0,
            wifis_sent: 0,
            version: SYNC_STATS_VERSION,
        }
    }
}

impl SyncStats {
    /// When the last upload was recorded, if ever.
    pub fn last_upload_at(&self) -> Option<OffsetDateTime> {
        if self.last_upload_time_ms == 0 {
            return None;
        }
        let nanos = i128::from(self.last_upload_time_ms) * 1_000_000;
        OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
    }
}
