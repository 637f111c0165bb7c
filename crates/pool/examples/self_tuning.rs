//! Wires a pool, size manager and stats collector together around a toy
//! workbook factory, then runs a small burst of request handling.
//!
//! ```sh
//! cargo run --example self_tuning
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use abacus_pool::{
    ManagerOptions, MemberFactory, Pool, PoolEventKind, PoolMember, SizeManager, StatsCollector,
};

struct Workbook {
    serial: u64,
    created_at: DateTime<Utc>,
    last_used_at: Mutex<Option<DateTime<Utc>>>,
}

impl PoolMember for Workbook {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn last_used_at(&self) -> Option<DateTime<Utc>> {
        *self.last_used_at.lock()
    }

    fn mark_used(&self, at: DateTime<Utc>) {
        *self.last_used_at.lock() = Some(at.max(self.created_at));
    }
}

#[derive(Default)]
struct WorkbookFactory {
    serial: AtomicU64,
}

#[async_trait]
impl MemberFactory for WorkbookFactory {
    type Member = Workbook;

    async fn create(&self) -> Option<Arc<Workbook>> {
        // Pretend opening a workbook takes a while.
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some(Arc::new(Workbook {
            serial: self.serial.fetch_add(1, Ordering::SeqCst),
            created_at: Utc::now(),
            last_used_at: Mutex::new(None),
        }))
    }
}

#[tokio::main]
async fn main() -> abacus_pool::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let pool = Pool::new("workbooks", WorkbookFactory::default());
    let manager = SizeManager::new(ManagerOptions {
        minimum_pool_size: 4,
        startup_pacing: Duration::from_millis(50),
        startup_jitter_max: Duration::from_millis(200),
        ..Default::default()
    })?;
    let supervisor = manager.manage(pool.clone())?;
    let stats = StatsCollector::attach(&pool);

    while pool.resource_count() < 4 {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // A burst of concurrent "calculation requests".
    let mut workers = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let pool = pool.clone();
        workers.spawn(async move {
            for _ in 0..5 {
                let workbook = pool.acquire().await?;
                workbook.mark_used(Utc::now());
                tracing::debug!(serial = workbook.serial, "calculating");
                tokio::time::sleep(Duration::from_millis(10)).await;
                pool.release(workbook);
            }
            Ok::<(), abacus_pool::Error>(())
        });
    }
    while let Some(joined) = workers.join_next().await {
        joined.expect("worker panicked")?;
    }

    println!(
        "pool size {} ({} in use); acquisitions in the last minute: {}",
        pool.resource_count(),
        pool.usage_count(),
        stats.count_events_in_window(PoolEventKind::Acquired, Duration::from_secs(60)),
    );

    pool.dispose();
    let _ = supervisor.await;
    Ok(())
}
