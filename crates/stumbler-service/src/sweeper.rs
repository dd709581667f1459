//! Background retention sweeps.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use stumbler_store::{ReportStore, RetentionOutcome};

/// Runs [`ReportStore::sweep_expired`] on a fixed interval until cancelled.
pub struct Sweeper {
    store: ReportStore,
    period: Duration,
    cancel: CancellationToken,
}

impl Sweeper {
    /// Create a sweeper. Nothing runs until [`start`](Self::start).
    pub fn new(store: ReportStore, period: Duration, cancel: CancellationToken) -> Self {
        Self {
            store,
            period,
            cancel,
        }
    }

    /// Spawn the sweep loop. The first sweep runs immediately.
    pub fn start(self) -> JoinHandle<()> {
        info!("Starting retention sweeps every {}s", self.period.as_secs());
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut consecutive_failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Retention sweeper stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let store = self.store.clone();
            let result = tokio::task::spawn_blocking(move || store.sweep_expired()).await;

            match result {
                Ok(Ok(outcome)) => {
                    consecutive_failures = 0;
                    log_outcome(&outcome);
                }
                Ok(Err(e)) => {
                    consecutive_failures += 1;
                    if consecutive_failures <= 3 {
                        warn!(
                            "Retention sweep failed: {} (attempt {})",
                            e, consecutive_failures
                        );
                    } else if consecutive_failures == 4 {
                        error!(
                            "Retention sweep failed {} times, will keep trying silently",
                            consecutive_failures
                        );
                    }
                }
                Err(e) => error!("Retention sweep task panicked: {}", e),
            }
        }
    }
}

fn log_outcome(outcome: &RetentionOutcome) {
    match outcome {
        RetentionOutcome::Empty => debug!("Retention sweep: nothing stored"),
        RetentionOutcome::Retained { oldest_ms } => {
            debug!("Retention sweep: oldest batch at {} is within limits", oldest_ms)
        }
        RetentionOutcome::Purged { files, oldest_ms } => info!(
            "Retention sweep purged {} file(s); oldest batch was written at {}",
            files, oldest_ms
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stumbler_store::{BatchIndex, DirectoryIndex, StoreConfig};
    use stumbler_types::BatchName;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_first_sweep_purges_expired_batches() {
        let temp = tempfile::tempdir().unwrap();
        let config = StoreConfig::new(temp.path());
        {
            let mut index = DirectoryIndex::open(config.reports_dir()).unwrap();
            // Epoch + 1 ms is far older than any retention window
            index.write(BatchName::new(1, 1, 0, 0), b"old").unwrap();
        }
        let store = ReportStore::open(config).unwrap();
        assert!(!store.is_dir_empty());

        let cancel = CancellationToken::new();
        let handle =
            Sweeper::new(store.clone(), Duration::from_secs(3600), cancel.clone()).start();

        for _ in 0..100 {
            if store.is_dir_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(store.is_dir_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_stops_the_loop() {
        let temp = tempfile::tempdir().unwrap();
        let store = ReportStore::open(StoreConfig::new(temp.path())).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let handle = Sweeper::new(store, Duration::from_secs(60), cancel).start();
        handle.await.unwrap();
    }
}
