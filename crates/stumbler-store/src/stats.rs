//! Cumulative upload statistics, persisted as a flat property file.
//!
//! ```text
//! #stumbler upload statistics
//! #2014-08-01T03:22:23.313Z
//! lastUploadTime=1406863343313
//! bytesSent=20480
//! observationsSent=112
//! cellsSent=40
//! wifisSent=950
//! version=1
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use stumbler_types::{SYNC_STATS_VERSION, SyncStats, now_ms};

use crate::error::{Error, Result};

pub const KEY_LAST_UPLOAD_TIME: &str = "lastUploadTime";
pub const KEY_BYTES_SENT: &str = "bytesSent";
pub const KEY_OBSERVATIONS_SENT: &str = "observationsSent";
pub const KEY_CELLS_SENT: &str = "cellsSent";
pub const KEY_WIFIS_SENT: &str = "wifisSent";
pub const KEY_VERSION: &str = "version";

/// Reads and writes the sync statistics file.
///
/// Read-modify-write cycles are serialized; I/O errors are returned to the
/// caller and never retried here.
#[derive(Debug)]
pub struct SyncStatsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SyncStatsStore {
    /// Create a store backed by `path`. Nothing is touched until first use.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    /// The property file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted counters, or defaults if the file does not exist.
    pub fn read(&self) -> Result<SyncStats> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_unlocked()
    }

    /// Add to the counters and stamp the upload time.
    ///
    /// Returns `Ok(false)` without touching the file when every delta is 0.
    pub fn increment(&self, bytes: u64, reports: u64, cells: u64, wifis: u64) -> Result<bool> {
        if bytes == 0 && reports == 0 && cells == 0 && wifis == 0 {
            return Ok(false);
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.read_unlocked()?;
        let updated = SyncStats {
            last_upload_time_ms: now_ms(),
            bytes_sent: current.bytes_sent.saturating_add(bytes),
            observations_sent: current.observations_sent.saturating_add(reports),
            cells_sent: current.cells_sent.saturating_add(cells),
            wifis_sent: current.wifis_sent.saturating_add(wifis),
            version: SYNC_STATS_VERSION,
        };
        self.write_unlocked(&updated)?;

        debug!(
            "Sync stats now {} bytes, {} reports, {} cells, {} wifis",
            updated.bytes_sent, updated.observations_sent, updated.cells_sent, updated.wifis_sent
        );
        Ok(true)
    }

    /// Overwrite the file with `stats`, stamped with the current schema version.
    pub fn write(&self, stats: &SyncStats) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_unlocked(stats)
    }

    fn read_unlocked(&self) -> Result<SyncStats> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SyncStats::default()),
            Err(e) => {
                return Err(Error::Read {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        let props = parse_properties(&content);
        Ok(SyncStats {
            last_upload_time_ms: number(&props, KEY_LAST_UPLOAD_TIME)?,
            bytes_sent: number(&props, KEY_BYTES_SENT)?,
            observations_sent: number(&props, KEY_OBSERVATIONS_SENT)?,
            cells_sent: number(&props, KEY_CELLS_SENT)?,
            wifis_sent: number(&props, KEY_WIFIS_SENT)?,
            version: number(&props, KEY_VERSION)?
                .try_into()
                .map_err(|_| invalid(KEY_VERSION, &props))?,
        })
    }

    fn write_unlocked(&self, stats: &SyncStats) -> Result<()> {
        let content = format_properties(stats);

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let tmp_path = self.path.with_extension("ini.tmp");
        fs::write(&tmp_path, content).map_err(|e| Error::Write {
            path: tmp_path.clone(),
            source: e,
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            Error::Write {
                path: self.path.clone(),
                source: e,
            }
        })
    }
}

/// Parse `key=value` (or `key:value`) lines, skipping `#`/`!` comments.
fn parse_properties(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(['=', ':'])?;
            let (key, value) = line.split_at(split);
            Some((key.trim().to_string(), value[1..].trim().to_string()))
        })
        .collect()
}

fn format_properties(stats: &SyncStats) -> String {
    let stamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    format!(
        "#stumbler upload statistics\n#{}\n{}={}\n{}={}\n{}={}\n{}={}\n{}={}\n{}={}\n",
        stamp,
        KEY_LAST_UPLOAD_TIME,
        stats.last_upload_time_ms,
        KEY_BYTES_SENT,
        stats.bytes_sent,
        KEY_OBSERVATIONS_SENT,
        stats.observations_sent,
        KEY_CELLS_SENT,
        stats.cells_sent,
        KEY_WIFIS_SENT,
        stats.wifis_sent,
        KEY_VERSION,
        SYNC_STATS_VERSION,
    )
}

fn number(props: &HashMap<String, String>, key: &str) -> Result<u64> {
    match props.get(key) {
        None => Ok(0),
        Some(value) => value.parse().map_err(|_| invalid(key, props)),
    }
}

fn invalid(key: &str, props: &HashMap<String, String>) -> Error {
    Error::InvalidStats {
        key: key.to_string(),
        value: props.get(key).cloned().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SyncStatsStore) {
        let temp = tempfile::tempdir().unwrap();
        let stats = SyncStatsStore::new(temp.path().join("upload_stats.ini"));
        (temp, stats)
    }

    #[test]
    fn test_read_missing_file_is_default() {
        let (_temp, stats) = store();
        assert_eq!(stats.read().unwrap(), SyncStats::default());
    }

    #[test]
    fn test_increment_accumulates() {
        let (_temp, stats) = store();

        assert!(stats.increment(100, 2, 1, 5).unwrap());
        assert!(stats.increment(50, 1, 0, 3).unwrap());

        let read = stats.read().unwrap();
        assert_eq!(read.bytes_sent, 150);
        assert_eq!(read.observations_sent, 3);
        assert_eq!(read.cells_sent, 1);
        assert_eq!(read.wifis_sent, 8);
        assert_eq!(read.version, SYNC_STATS_VERSION);
        assert!(read.last_upload_time_ms > 0);
    }

    #[test]
    fn test_zero_increment_does_not_touch_file() {
        let (_temp, stats) = store();
        assert!(!stats.increment(0, 0, 0, 0).unwrap());
        assert!(!stats.path().exists());

        stats.increment(1, 1, 1, 1).unwrap();
        let before = fs::read(stats.path()).unwrap();
        assert!(!stats.increment(0, 0, 0, 0).unwrap());
        assert_eq!(fs::read(stats.path()).unwrap(), before);
    }

    #[test]
    fn test_bytes_only_increment_is_recorded() {
        let (_temp, stats) = store();
        assert!(stats.increment(10, 0, 0, 0).unwrap());
        assert_eq!(stats.read().unwrap().bytes_sent, 10);
    }

    #[test]
    fn test_write_overwrites_and_forces_version() {
        let (_temp, stats) = store();
        stats.increment(100, 2, 1, 5).unwrap();

        let replacement = SyncStats {
            last_upload_time_ms: 42,
            bytes_sent: 1,
            observations_sent: 2,
            cells_sent: 3,
            wifis_sent: 4,
            version: 0,
        };
        stats.write(&replacement).unwrap();

        let read = stats.read().unwrap();
        assert_eq!(read.last_upload_time_ms, 42);
        assert_eq!(read.bytes_sent, 1);
        assert_eq!(read.wifis_sent, 4);
        assert_eq!(read.version, SYNC_STATS_VERSION);
    }

    #[test]
    fn test_file_format() {
        let (_temp, stats) = store();
        stats.increment(20480, 112, 40, 950).unwrap();

        let content = fs::read_to_string(stats.path()).unwrap();
        assert!(content.starts_with('#'));
        assert!(content.contains("bytesSent=20480\n"));
        assert!(content.contains("observationsSent=112\n"));
        assert!(content.contains("cellsSent=40\n"));
        assert!(content.contains("wifisSent=950\n"));
        assert!(content.contains("version=1\n"));
        assert!(content.contains("lastUploadTime="));
    }

    #[test]
    fn test_reads_foreign_property_syntax() {
        let (_temp, stats) = store();
        fs::write(
            stats.path(),
            "! written elsewhere\nbytesSent : 7\n  wifisSent=3\nunknown=yes\n",
        )
        .unwrap();

        let read = stats.read().unwrap();
        assert_eq!(read.bytes_sent, 7);
        assert_eq!(read.wifis_sent, 3);
        assert_eq!(read.cells_sent, 0);
    }

    #[test]
    fn test_non_numeric_value_is_an_error() {
        let (_temp, stats) = store();
        fs::write(stats.path(), "bytesSent=lots\n").unwrap();

        let err = stats.read().unwrap_err();
        assert!(matches!(err, Error::InvalidStats { ref key, .. } if key == "bytesSent"));
    }

    #[test]
    fn test_write_creates_parent_directory() {
        let temp = tempfile::tempdir().unwrap();
        let stats = SyncStatsStore::new(temp.path().join("a").join("upload_stats.ini"));
        stats.increment(1, 1, 0, 0).unwrap();
        assert!(stats.path().exists());
    }
}
