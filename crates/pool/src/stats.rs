//! Statistics collection for pool events.
//!
//! The [`StatsCollector`] subscribes to a pool's event bus, appends every
//! received [`PoolEvent`] to a time-ordered log, and answers windowed
//! counting queries for operational reporting. A background timer trims
//! events older than the retention horizon once an hour.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::events::{PoolEvent, PoolEventKind};
use crate::member::MemberFactory;
use crate::pool::Pool;

/// Events older than this are trimmed from the log.
pub const EVENT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How often the retention trim runs.
const TRIM_INTERVAL: Duration = Duration::from_secs(60 * 60);

struct StatsInner {
    clock: Arc<dyn Clock>,
    log: Mutex<VecDeque<PoolEvent>>,
    cancel: CancellationToken,
}

impl StatsInner {
    fn trim_expired(&self) {
        let now = self.clock.now();
        let mut log = self.log.lock();
        let before = log.len();
        log.retain(|event| (now - event.at).to_std().unwrap_or_default() <= EVENT_RETENTION);
        let trimmed = before - log.len();
        if trimmed > 0 {
            tracing::debug!(trimmed, "trimmed expired pool events");
        }
    }
}

/// Event-log collector attached to one pool.
///
/// Cheap to clone — clones share the same underlying log.
pub struct StatsCollector {
    inner: Arc<StatsInner>,
}

impl Clone for StatsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for StatsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsCollector")
            .field("recorded", &self.inner.log.lock().len())
            .field("stopped", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

impl StatsCollector {
    /// Attach a collector to the given pool and spawn its background task.
    ///
    /// The collector receives every event on the pool's bus — including the
    /// `Grown`/`Wasted` events a [`SizeManager`](crate::manager::SizeManager)
    /// publishes there. It stops when [`stop`](Self::stop) is called or the
    /// pool is disposed.
    pub fn attach<F: MemberFactory>(pool: &Pool<F>) -> Self {
        let receiver = pool.subscribe();
        let inner = Arc::new(StatsInner {
            clock: pool.clock(),
            log: Mutex::new(VecDeque::new()),
            cancel: pool.child_token(),
        });
        tokio::spawn(Self::run(Arc::clone(&inner), receiver));
        Self { inner }
    }

    async fn run(inner: Arc<StatsInner>, mut receiver: broadcast::Receiver<PoolEvent>) {
        let mut trim = tokio::time::interval(TRIM_INTERVAL);
        trim.tick().await; // the first tick completes immediately
        loop {
            tokio::select! {
                () = inner.cancel.cancelled() => {
                    // Discarded along with its pool: drop the recorded log.
                    inner.log.lock().clear();
                    break;
                }
                event = receiver.recv() => match event {
                    Ok(event) => inner.log.lock().push_back(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "stats collector lagged behind pool events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = trim.tick() => inner.trim_expired(),
            }
        }
    }

    /// Count events of `kind` whose timestamp is within `window` of now.
    #[must_use]
    pub fn count_events_in_window(&self, kind: PoolEventKind, window: Duration) -> usize {
        let now = self.inner.clock.now();
        self.inner
            .log
            .lock()
            .iter()
            .filter(|event| {
                event.kind == kind && (now - event.at).to_std().unwrap_or_default() <= window
            })
            .count()
    }

    /// Total number of events currently recorded.
    #[must_use]
    pub fn recorded_count(&self) -> usize {
        self.inner.log.lock().len()
    }

    /// Stop the collector: halt the background task and clear the log.
    /// Idempotent.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
        self.inner.log.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{CountingFactory, ManualClock};

    #[tokio::test]
    async fn records_pool_events() {
        let clock = Arc::new(ManualClock::starting_now());
        let pool = Pool::new("stats", CountingFactory::new(Arc::clone(&clock) as _));
        let stats = StatsCollector::attach(&pool);

        let member = pool.acquire().await.unwrap();
        pool.release(member);

        // Give the collector task a moment to drain the bus.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            stats.count_events_in_window(PoolEventKind::Acquired, Duration::from_secs(60)),
            1
        );
        assert_eq!(
            stats.count_events_in_window(PoolEventKind::Released, Duration::from_secs(60)),
            1
        );
        // Acquire on an empty pool created a member first.
        assert_eq!(
            stats.count_events_in_window(PoolEventKind::Added, Duration::from_secs(60)),
            1
        );
    }

    #[tokio::test]
    async fn window_excludes_older_events() {
        let clock = Arc::new(ManualClock::starting_now());
        let pool = Pool::new("stats", CountingFactory::new(Arc::clone(&clock) as _));
        let stats = StatsCollector::attach(&pool);

        let member = pool.acquire().await.unwrap();
        pool.release(member);
        tokio::time::sleep(Duration::from_millis(50)).await;

        clock.advance(Duration::from_secs(120));
        assert_eq!(
            stats.count_events_in_window(PoolEventKind::Acquired, Duration::from_secs(60)),
            0,
            "events older than the window are not counted"
        );
        assert_eq!(
            stats.count_events_in_window(PoolEventKind::Acquired, Duration::from_secs(300)),
            1
        );
    }

    #[tokio::test]
    async fn stop_clears_and_is_idempotent() {
        let clock = Arc::new(ManualClock::starting_now());
        let pool = Pool::new("stats", CountingFactory::new(Arc::clone(&clock) as _));
        let stats = StatsCollector::attach(&pool);

        pool.add_resource().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(stats.recorded_count() > 0);

        stats.stop();
        stats.stop();
        assert_eq!(stats.recorded_count(), 0);

        // Events after stop are not recorded.
        pool.add_resource().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.recorded_count(), 0);
    }
}
