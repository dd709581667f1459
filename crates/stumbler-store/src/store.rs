//! Main store implementation.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, error, info, warn};

use stumbler_types::{Batch, BatchName, BatchSource, QueuedCounts, Report, SyncStats};

use crate::config::StoreConfig;
use crate::encoder::ReportBatchBuilder;
use crate::error::Result;
use crate::index::{BatchIndex, DirectoryIndex};
use crate::stats::SyncStatsStore;
use crate::timer::FlushTimer;

/// Receives notifications when the store becomes empty or non-empty.
///
/// Called with the store lock held; implementations must not call back
/// into the store.
pub trait EmptyStateTracker: Send + Sync {
    /// `is_empty` is true when nothing at all is queued.
    fn notify(&self, is_empty: bool);
}

impl<F> EmptyStateTracker for F
where
    F: Fn(bool) + Send + Sync,
{
    fn notify(&self, is_empty: bool) {
        self(is_empty)
    }
}

/// Snapshot of the batch listing taken when an upload pass starts.
#[derive(Debug)]
struct BatchCursor {
    files: Vec<BatchName>,
    next: usize,
}

impl BatchCursor {
    fn new(files: Vec<BatchName>) -> Self {
        Self { files, next: 0 }
    }

    fn peek(&self) -> Option<BatchName> {
        self.files.get(self.next).copied()
    }

    fn advance(&mut self) -> Option<BatchName> {
        let name = self.peek()?;
        self.next += 1;
        Some(name)
    }
}

/// Everything guarded by the store lock.
pub(crate) struct StoreState {
    current: ReportBatchBuilder,
    send_buffer: Option<Batch>,
    cursor: Option<BatchCursor>,
    pub(crate) index: Box<dyn BatchIndex>,
    timer: FlushTimer,
    tracker: Option<Arc<dyn EmptyStateTracker>>,
    reported_empty: Option<bool>,
    quota: u64,
}

impl StoreState {
    fn is_empty(&self) -> bool {
        self.index.is_empty() && self.current.is_empty() && self.send_buffer.is_none()
    }

    /// Notify the tracker if emptiness changed since the last notification.
    pub(crate) fn update_tracker(&mut self) {
        let empty = self.is_empty();
        if self.reported_empty == Some(empty) {
            return;
        }
        self.reported_empty = Some(empty);
        if let Some(tracker) = &self.tracker {
            tracker.notify(empty);
        }
    }

    /// Write a batch unless the disk already holds more than the quota.
    ///
    /// The check uses the bytes on disk before this write, so usage can end
    /// up above the quota by at most one batch.
    fn save_to_disk(
        &mut self,
        data: &[u8],
        reports: u32,
        wifis: u32,
        cells: u32,
    ) -> Result<Option<BatchName>> {
        if let Some(used) = self.over_quota() {
            warn!(
                "Disk quota exceeded ({} > {} bytes); dropping batch of {} report(s)",
                used, self.quota, reports
            );
            return Ok(None);
        }

        let name = self
            .index
            .write(BatchName::now(reports, wifis, cells), data)?;
        debug!("Saved {} ({} bytes)", name, data.len());
        Ok(Some(name))
    }

    /// Bytes on disk, if they already exceed the quota.
    fn over_quota(&self) -> Option<u64> {
        let used = self.index.aggregate().bytes;
        (used > self.quota).then_some(used)
    }

    /// Move a held send buffer to disk.
    ///
    /// Promoted reports are never dropped for quota: over quota, or on a
    /// write error, the buffer stays in memory until it is deleted or a
    /// later spill succeeds.
    fn persist_send_buffer(&mut self) -> Result<()> {
        let Some(buffer) = self.send_buffer.take() else {
            return Ok(());
        };
        if buffer.reports == 0 {
            return Ok(());
        }

        if let Some(used) = self.over_quota() {
            debug!(
                "Disk quota exceeded ({} > {} bytes); holding send buffer of {} report(s)",
                used, self.quota, buffer.reports
            );
            self.send_buffer = Some(buffer);
            return Ok(());
        }

        let name = BatchName::now(buffer.reports, buffer.wifis, buffer.cells);
        match self.index.write(name, &buffer.data) {
            Ok(name) => {
                debug!("Spilled send buffer to {}", name);
                Ok(())
            }
            Err(e) => {
                self.send_buffer = Some(buffer);
                Err(e)
            }
        }
    }

    /// Persist the send buffer, then the accumulator.
    ///
    /// The accumulator is cleared once handled, including when the quota
    /// drops it. A failed encode or write leaves it untouched.
    fn persist_current(&mut self) -> Result<()> {
        self.persist_send_buffer()?;
        if self.current.is_empty() {
            return Ok(());
        }

        let data = self.current.encode()?;
        let reports = u32::try_from(self.current.reports_count()).unwrap_or(u32::MAX);
        self.save_to_disk(&data, reports, self.current.wifis(), self.current.cells())?;
        self.current.clear();
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(None);
        };

        // A read error leaves the cursor on the file so the next call retries it
        while let Some(name) = cursor.peek() {
            let read = self.index.read(&name)?;
            cursor.advance();
            match read {
                Some(data) => {
                    debug!("Serving {}", name);
                    return Ok(Some(Batch {
                        source: BatchSource::File(name),
                        data,
                        reports: name.reports,
                        wifis: name.wifis,
                        cells: name.cells,
                    }));
                }
                None => debug!("{} vanished before upload; skipping", name),
            }
        }

        Ok(None)
    }
}

pub(crate) struct Shared {
    config: StoreConfig,
    state: Mutex<StoreState>,
    stats: SyncStatsStore,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flush_on_timer(&self, generation: u64) {
        let mut state = self.lock();
        if !state.timer.is_current(generation) {
            debug!("Deferred flush {} superseded", generation);
            return;
        }
        state.timer.fired();

        if let Err(e) = state.persist_current() {
            warn!("Deferred flush failed, keeping reports in memory: {}", e);
        }
        state.update_tracker();
    }
}

/// Bounded, durable staging store for reports.
///
/// Cloning is cheap; every clone shares the same state. All operations are
/// serialized by one lock and do their file I/O while holding it, so async
/// callers should go through `spawn_blocking`.
#[derive(Clone)]
pub struct ReportStore {
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for ReportStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportStore")
            .field("base_dir", &self.shared.config.base_dir)
            .finish_non_exhaustive()
    }
}

impl ReportStore {
    /// Open the store rooted at `config.base_dir`, creating the batch
    /// directory if needed.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let index = DirectoryIndex::open(config.reports_dir())?;
        Ok(Self::with_index(config, Box::new(index)))
    }

    /// Open the store at the default location.
    pub fn open_default() -> Result<Self> {
        Self::open(StoreConfig::default())
    }

    /// Build a store on top of an alternative batch index.
    pub fn with_index(config: StoreConfig, index: Box<dyn BatchIndex>) -> Self {
        info!(
            "Opening report store at {} (quota {} bytes, {} week(s) retention)",
            config.base_dir.display(),
            config.max_bytes_stored_on_disk,
            config.max_weeks_data_stored
        );

        let state = StoreState {
            current: ReportBatchBuilder::new(config.max_reports_in_memory, config.framing),
            send_buffer: None,
            cursor: None,
            index,
            timer: FlushTimer::new(config.flush_delay()),
            tracker: None,
            reported_empty: None,
            quota: config.max_bytes_stored_on_disk,
        };
        let stats = SyncStatsStore::new(config.stats_path());

        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
                stats,
            }),
        }
    }

    /// The configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Retention ceiling in weeks.
    pub fn max_weeks_stored(&self) -> u32 {
        self.shared.config.max_weeks_data_stored
    }

    /// Install the empty-state tracker. It is notified of the current state
    /// immediately, then on every transition.
    pub fn set_tracker<T>(&self, tracker: T)
    where
        T: EmptyStateTracker + 'static,
    {
        let mut state = self.shared.lock();
        let empty = state.is_empty();
        tracker.notify(empty);
        state.tracker = Some(Arc::new(tracker));
        state.reported_empty = Some(empty);
    }

    // === Producer ===

    /// Queue a report.
    ///
    /// Never fails: if the accumulator is full it is persisted right away,
    /// and a failed persist is logged with the reports kept in memory for
    /// the next attempt. Otherwise a deferred flush is (re)armed.
    pub fn insert(&self, report: Report) {
        let mut state = self.shared.lock();
        state.timer.cancel();
        state.current.add_report(report);

        if state.current.max_reports_reached() {
            debug!(
                "Accumulator full ({} reports); persisting",
                state.current.reports_count()
            );
            if let Err(e) = state.persist_current() {
                warn!("Failed to persist full accumulator: {}", e);
            }
        } else {
            let shared: Weak<Shared> = Arc::downgrade(&self.shared);
            state.timer.arm(move |generation| {
                if let Some(shared) = shared.upgrade() {
                    shared.flush_on_timer(generation);
                }
            });
        }

        state.update_tracker();
    }

    /// Persist the send buffer and the accumulator to disk now.
    pub fn persist_accumulator_to_disk(&self) -> Result<()> {
        let mut state = self.shared.lock();
        state.timer.cancel();
        let result = state.persist_current();
        state.update_tracker();
        result
    }

    /// Cancel the deferred flush and persist everything held in memory.
    pub fn shutdown(self) -> Result<()> {
        info!("Shutting down report store");
        self.persist_accumulator_to_disk()?;

        if let Some(buffer) = &self.shared.lock().send_buffer {
            warn!(
                "Disk quota exceeded; {} report(s) in the send buffer are not persisted",
                buffer.reports
            );
        }
        Ok(())
    }

    // === Uploader ===

    /// Start an upload pass.
    ///
    /// A send buffer still held from an earlier pass is first written to
    /// disk; if the disk is over quota it is kept and returned again
    /// instead. Otherwise, if reports are waiting in memory they are
    /// promoted to the send buffer and returned, else the oldest file is
    /// returned. The files on disk at this moment are what
    /// [`get_next_batch`](Self::get_next_batch) will visit.
    pub fn get_first_batch(&self) -> Result<Option<Batch>> {
        let mut state = self.shared.lock();
        state.persist_send_buffer()?;

        if let Some(held) = state.send_buffer.clone() {
            state.cursor = Some(BatchCursor::new(state.index.aggregate().files.clone()));
            debug!("Serving held send buffer of {} report(s) again", held.reports);
            return Ok(Some(held));
        }

        if state.index.is_empty() && state.current.is_empty() {
            state.cursor = None;
            state.update_tracker();
            return Ok(None);
        }

        state.cursor = Some(BatchCursor::new(state.index.aggregate().files.clone()));

        if state.current.is_empty() {
            return state.next_batch();
        }

        let data = state.current.encode()?;
        let batch = Batch {
            source: BatchSource::SendBuffer,
            data,
            reports: u32::try_from(state.current.reports_count()).unwrap_or(u32::MAX),
            wifis: state.current.wifis(),
            cells: state.current.cells(),
        };
        // The promoted reports must not be flushed again behind the uploader
        state.timer.cancel();
        state.current.clear();
        state.send_buffer = Some(batch.clone());

        debug!("Promoted {} report(s) to the send buffer", batch.reports);
        Ok(Some(batch))
    }

    /// Next file of the current upload pass, or `None` when the pass is done
    /// or none was started.
    pub fn get_next_batch(&self) -> Result<Option<Batch>> {
        self.shared.lock().next_batch()
    }

    /// Delete a batch after it was transmitted.
    ///
    /// Returns false if it was already gone.
    pub fn delete(&self, source: &BatchSource) -> Result<bool> {
        let mut state = self.shared.lock();
        let result = match source {
            BatchSource::SendBuffer => Ok(state.send_buffer.take().is_some()),
            BatchSource::File(name) => state.index.remove(name),
        };
        state.update_tracker();
        result
    }

    /// Delete every batch file. Returns the number removed.
    pub fn delete_all(&self) -> Result<usize> {
        let mut state = self.shared.lock();
        let result = state.index.remove_all();
        if let Ok(removed) = &result {
            info!("Deleted {} batch file(s)", removed);
        }
        state.update_tracker();
        result
    }

    // === Queries ===

    /// Totals across disk, the accumulator and the send buffer.
    ///
    /// Encodes the accumulator to measure it.
    pub fn get_queued_counts(&self) -> QueuedCounts {
        let state = self.shared.lock();
        let aggregate = state.index.aggregate();

        let mut counts = QueuedCounts {
            reports: aggregate.reports,
            wifis: aggregate.wifis,
            cells: aggregate.cells,
            bytes: aggregate.bytes,
        };

        if !state.current.is_empty() {
            counts.reports += state.current.reports_count() as u64;
            counts.wifis += u64::from(state.current.wifis());
            counts.cells += u64::from(state.current.cells());
            match state.current.encode() {
                Ok(data) => counts.bytes += data.len() as u64,
                Err(e) => error!("Failed to measure accumulator: {}", e),
            }
        }

        if let Some(buffer) = &state.send_buffer {
            counts.reports += u64::from(buffer.reports);
            counts.wifis += u64::from(buffer.wifis);
            counts.cells += u64::from(buffer.cells);
            counts.bytes += buffer.len() as u64;
        }

        counts
    }

    /// Smallest timestamp among batch files, or 0 when there are none.
    pub fn get_oldest_batch_timestamp(&self) -> u64 {
        self.shared.lock().index.aggregate().oldest_timestamp_ms()
    }

    /// Returns true when there are no batch files.
    pub fn is_dir_empty(&self) -> bool {
        self.shared.lock().index.is_empty()
    }

    /// Batch files on disk, oldest first.
    pub fn batch_files(&self) -> Vec<BatchName> {
        self.shared.lock().index.aggregate().files.clone()
    }

    // === Sync statistics ===

    /// Read the cumulative upload counters.
    pub fn read_sync_stats(&self) -> Result<SyncStats> {
        self.shared.stats.read()
    }

    /// Record a completed upload. Returns false if every delta was 0.
    pub fn increment_sync_stats(
        &self,
        bytes: u64,
        reports: u64,
        cells: u64,
        wifis: u64,
    ) -> Result<bool> {
        self.shared.stats.increment(bytes, reports, cells, wifis)
    }

    /// Overwrite the upload counters.
    pub fn write_sync_stats(&self, stats: &SyncStats) -> Result<()> {
        self.shared.stats.write(stats)
    }
}
