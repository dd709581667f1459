//! On-disk batch index.
//!
//! The filesystem is the database: every count the store reports about
//! persisted data is derived by listing the batch directory and decoding
//! filenames. The [`DirectoryAggregate`] is only a cache of that listing and
//! is recomputed after every create or delete.
//!
//! [`BatchIndex`] is the seam for substituting another backend (for example
//! an embedded database) without touching the store's contract.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use stumbler_types::BatchName;

use crate::error::{Error, Result};

/// Suffix of in-flight atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Summary of all persisted batches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryAggregate {
    /// Batch files, oldest first.
    pub files: Vec<BatchName>,
    /// Total reports across files.
    pub reports: u64,
    /// Total wifi observations across files.
    pub wifis: u64,
    /// Total cell observations across files.
    pub cells: u64,
    /// Total size of the files in bytes.
    pub bytes: u64,
}

impl DirectoryAggregate {
    /// Returns true when there are no batch files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Smallest encoded timestamp, or 0 when there are no files.
    pub fn oldest_timestamp_ms(&self) -> u64 {
        self.files
            .iter()
            .map(|f| f.timestamp_ms)
            .min()
            .unwrap_or(0)
    }
}

/// Storage backend for persisted batches.
pub trait BatchIndex: Send {
    /// Recompute the aggregate from the backing storage.
    fn refresh(&mut self);

    /// The aggregate as of the last refresh.
    fn aggregate(&self) -> &DirectoryAggregate;

    /// Returns true when no batches are persisted.
    fn is_empty(&self) -> bool {
        self.aggregate().is_empty()
    }

    /// Persist a batch and refresh.
    ///
    /// Returns the name actually used, which may carry a later timestamp
    /// than requested if the requested name was taken.
    fn write(&mut self, name: BatchName, data: &[u8]) -> Result<BatchName>;

    /// Read a batch's bytes, or `None` if it no longer exists.
    fn read(&self, name: &BatchName) -> Result<Option<Vec<u8>>>;

    /// Delete a batch and refresh. Returns false if it was already gone.
    fn remove(&mut self, name: &BatchName) -> Result<bool>;

    /// Delete every batch and refresh. Returns the number removed.
    fn remove_all(&mut self) -> Result<usize>;
}

/// [`BatchIndex`] backed by a directory of `reports-*.gz` files.
#[derive(Debug)]
pub struct DirectoryIndex {
    dir: PathBuf,
    aggregate: DirectoryAggregate,
}

impl DirectoryIndex {
    /// Open (creating if needed) the batch directory and scan it.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;

        let aggregate = Self::scan(&dir);
        info!(
            "Batch directory {}: {} file(s), {} report(s), {} byte(s)",
            dir.display(),
            aggregate.files.len(),
            aggregate.reports,
            aggregate.bytes
        );

        Ok(Self { dir, aggregate })
    }

    /// Path of a batch file.
    pub fn path_of(&self, name: &BatchName) -> PathBuf {
        self.dir.join(name.to_string())
    }

    /// Build an aggregate by listing `dir`.
    ///
    /// An unreadable or missing directory yields an empty aggregate. Names
    /// that do not decode are skipped.
    pub fn scan(dir: &Path) -> DirectoryAggregate {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}; treating as empty", dir.display(), e);
                return DirectoryAggregate::default();
            }
        };

        let mut aggregate = DirectoryAggregate::default();

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!("Skipping non UTF-8 entry in {}", dir.display());
                continue;
            };

            let batch = match BatchName::parse(name) {
                Ok(batch) => batch,
                Err(_) if name.ends_with(TMP_SUFFIX) => {
                    debug!("Skipping partial write {}", name);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping unexpected file in batch directory: {}", e);
                    continue;
                }
            };

            // Vanished between listing and stat
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }

            aggregate.reports += u64::from(batch.reports);
            aggregate.wifis += u64::from(batch.wifis);
            aggregate.cells += u64::from(batch.cells);
            aggregate.bytes += metadata.len();
            aggregate.files.push(batch);
        }

        aggregate.files.sort();
        debug!(
            "Scanned {}: {} file(s), {} byte(s)",
            dir.display(),
            aggregate.files.len(),
            aggregate.bytes
        );
        aggregate
    }
}

impl BatchIndex for DirectoryIndex {
    fn refresh(&mut self) {
        self.aggregate = Self::scan(&self.dir);
    }

    fn aggregate(&self) -> &DirectoryAggregate {
        &self.aggregate
    }

    fn write(&mut self, name: BatchName, data: &[u8]) -> Result<BatchName> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::CreateDirectory {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut name = name;
        while self.path_of(&name).exists() {
            name = name.with_timestamp(name.timestamp_ms + 1);
        }

        let final_path = self.path_of(&name);
        let tmp_path = self.dir.join(format!("{}{}", name, TMP_SUFFIX));

        fs::write(&tmp_path, data).map_err(|e| Error::Write {
            path: tmp_path.clone(),
            source: e,
        })?;
        if let Err(e) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(Error::Write {
                path: final_path,
                source: e,
            });
        }

        self.refresh();
        Ok(name)
    }

    fn read(&self, name: &BatchName) -> Result<Option<Vec<u8>>> {
        let path = self.path_of(name);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Read { path, source: e }),
        }
    }

    fn remove(&mut self, name: &BatchName) -> Result<bool> {
        let path = self.path_of(name);
        let result = fs::remove_file(&path);
        self.refresh();

        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} already deleted", name);
                Ok(false)
            }
            Err(e) => Err(Error::Delete { path, source: e }),
        }
    }

    fn remove_all(&mut self) -> Result<usize> {
        let mut removed = 0;
        let mut first_error = None;

        for name in &self.aggregate.files {
            let path = self.dir.join(name.to_string());
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to delete {}: {}", path.display(), e);
                    if first_error.is_none() {
                        first_error = Some(Error::Delete { path, source: e });
                    }
                }
            }
        }

        self.refresh();

        match first_error {
            Some(e) => Err(e),
            None => Ok(removed),
        }
    }
}
