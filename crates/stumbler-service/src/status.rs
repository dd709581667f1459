//! Store status snapshot.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use stumbler_store::ReportStore;
use stumbler_types::{QueuedCounts, SyncStats};

/// Everything `status` reports about a store.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub base_dir: PathBuf,
    pub queued: QueuedCounts,
    pub files: usize,
    /// Oldest batch timestamp in ms, 0 when there are no files.
    pub oldest_batch_ms: u64,
    pub oldest_batch: Option<String>,
    /// Whether the next retention sweep will purge everything.
    pub expired: bool,
    pub max_weeks_stored: u32,
    pub sync: SyncStats,
    pub last_upload: Option<String>,
}

impl StatusReport {
    /// Collect a snapshot from `store`.
    pub fn collect(store: &ReportStore) -> stumbler_store::Result<Self> {
        let oldest_batch_ms = store.get_oldest_batch_timestamp();
        let sync = store.read_sync_stats()?;

        Ok(Self {
            base_dir: store.config().base_dir.clone(),
            queued: store.get_queued_counts(),
            files: store.batch_files().len(),
            oldest_batch_ms,
            oldest_batch: format_ms(oldest_batch_ms),
            expired: store.is_expired_at(stumbler_types::now_ms()),
            max_weeks_stored: store.max_weeks_stored(),
            last_upload: sync.last_upload_at().and_then(|t| t.format(&Rfc3339).ok()),
            sync,
        })
    }
}

fn format_ms(ms: u64) -> Option<String> {
    if ms == 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Store:        {}", self.base_dir.display())?;
        writeln!(
            f,
            "Queued:       {} report(s), {} wifi(s), {} cell(s), {} bytes",
            self.queued.reports, self.queued.wifis, self.queued.cells, self.queued.bytes
        )?;
        writeln!(f, "Batch files:  {}", self.files)?;
        match &self.oldest_batch {
            Some(oldest) if self.expired => writeln!(
                f,
                "Oldest batch: {} (older than {} week(s), will be purged)",
                oldest, self.max_weeks_stored
            )?,
            Some(oldest) => writeln!(f, "Oldest batch: {}", oldest)?,
            None => writeln!(f, "Oldest batch: -")?,
        }
        writeln!(
            f,
            "Sent:         {} report(s), {} wifi(s), {} cell(s), {} bytes",
            self.sync.observations_sent,
            self.sync.wifis_sent,
            self.sync.cells_sent,
            self.sync.bytes_sent
        )?;
        write!(
            f,
            "Last upload:  {}",
            self.last_upload.as_deref().unwrap_or("never")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stumbler_store::StoreConfig;
    use stumbler_types::Report;

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(0), None);
        assert_eq!(
            format_ms(1_406_863_343_313).as_deref(),
            Some("2014-08-01T03:22:23.313Z")
        );
    }

    #[test]
    fn test_collect_and_display() {
        let temp = tempfile::tempdir().unwrap();
        let store = ReportStore::open(StoreConfig {
            max_reports_in_memory: 1,
            ..StoreConfig::new(temp.path())
        })
        .unwrap();
        store.insert(Report::new("a", 5, 2));

        let report = StatusReport::collect(&store).unwrap();
        assert_eq!(report.files, 1);
        assert_eq!(report.queued.reports, 1);
        assert!(report.oldest_batch.is_some());
        assert!(!report.expired);
        assert!(report.last_upload.is_none());

        let text = report.to_string();
        assert!(text.contains("1 report(s), 5 wifi(s), 2 cell(s)"));
        assert!(text.contains("Last upload:  never"));
    }

    #[test]
    fn test_json_shape() {
        let temp = tempfile::tempdir().unwrap();
        let store = ReportStore::open(StoreConfig::new(temp.path())).unwrap();

        let report = StatusReport::collect(&store).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["files"], 0);
        assert_eq!(json["queued"]["reports"], 0);
        assert!(json["oldest_batch"].is_null());
        assert_eq!(json["sync"]["version"], 1);
    }
}
