//! Deferred flush timer.
//!
//! At most one flush is pending at a time. Arming cancels the previous
//! flush and bumps a generation counter; the owner keeps the timer under
//! the same lock as the rest of the store state, and a firing flush must
//! check [`FlushTimer::is_current`] under that lock before acting. A flush
//! that lost the race with a later arm or cancel therefore does nothing.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Single-shot, cancelable, re-armable flush timer.
#[derive(Debug)]
pub(crate) struct FlushTimer {
    runtime: Option<Handle>,
    delay: Duration,
    generation: u64,
    pending: Option<CancellationToken>,
}

impl FlushTimer {
    /// Create a timer that spawns on the current tokio runtime, if any.
    pub(crate) fn new(delay: Duration) -> Self {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!("No tokio runtime available; deferred flushes are disabled");
        }
        Self {
            runtime,
            delay,
            generation: 0,
            pending: None,
        }
    }

    /// Cancel the pending flush, if any.
    pub(crate) fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }

    /// Schedule `fire` to run after the delay, replacing any pending flush.
    ///
    /// `fire` receives the generation it was armed with and runs on the
    /// blocking pool.
    pub(crate) fn arm<F>(&mut self, fire: F)
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();

        let Some(runtime) = &self.runtime else {
            return;
        };

        let generation = self.generation;
        let delay = self.delay;
        let token = CancellationToken::new();
        let task_token = token.clone();

        runtime.spawn(async move {
            tokio::select! {
                _ = task_token.cancelled() => {
                    debug!("Deferred flush {} cancelled", generation);
                }
                _ = tokio::time::sleep(delay) => {
                    debug!("Deferred flush {} firing", generation);
                    if let Err(e) = tokio::task::spawn_blocking(move || fire(generation)).await {
                        warn!("Deferred flush {} panicked: {}", generation, e);
                    }
                }
            }
        });

        self.pending = Some(token);
    }

    /// Whether a flush armed with `generation` is still the pending one.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.pending.is_some() && self.generation == generation
    }

    /// Mark the pending flush as consumed.
    pub(crate) fn fired(&mut self) {
        self.pending = None;
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_without_runtime_arm_is_noop() {
        let mut timer = FlushTimer::new(Duration::from_millis(1));
        timer.arm(|_| panic!("must not fire"));
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_invalidates_previous_generation() {
        let mut timer = FlushTimer::new(Duration::from_secs(10));
        timer.arm(|_| {});
        let first = timer.generation;
        assert!(timer.is_current(first));

        timer.arm(|_| {});
        assert!(!timer.is_current(first));
        assert!(timer.is_current(timer.generation));

        timer.cancel();
        assert!(!timer.is_armed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fires_once_with_its_generation() {
        let fired = Arc::new(AtomicU64::new(u64::MAX));
        let mut timer = FlushTimer::new(Duration::from_millis(20));

        let seen = Arc::clone(&fired);
        timer.arm(move |generation| seen.store(generation, Ordering::SeqCst));
        let armed_with = timer.generation;

        for _ in 0..200 {
            if fired.load(Ordering::SeqCst) != u64::MAX {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), armed_with);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_flush_never_fires() {
        let fired = Arc::new(AtomicU64::new(0));
        let mut timer = FlushTimer::new(Duration::from_millis(20));

        let seen = Arc::clone(&fired);
        timer.arm(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
