//! Testing utilities: manual clock, canned factories, recording sink.
//!
//! These are real implementations of the pool's collaborator traits, shared
//! by the crate's unit, integration and property tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::error::{CreationDiagnostics, Error, ErrorSink};
use crate::member::{MemberFactory, PoolMember};

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Hand-driven clock for deterministic reaper and startup tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock pinned to `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Create a clock pinned to the current system time.
    #[must_use]
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += chrono::TimeDelta::from_std(by).unwrap_or(chrono::TimeDelta::MAX);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ---------------------------------------------------------------------------
// TestMember
// ---------------------------------------------------------------------------

/// Pool member with an id and hand-settable timestamps.
#[derive(Debug)]
pub struct TestMember {
    id: u64,
    created_at: DateTime<Utc>,
    last_used_at: Mutex<Option<DateTime<Utc>>>,
}

impl TestMember {
    /// Create a member with the given id, created at `created_at`.
    #[must_use]
    pub fn new(id: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            last_used_at: Mutex::new(None),
        }
    }

    /// The member's creation-ordered id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PoolMember for TestMember {
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

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Factory that always succeeds, numbering members in creation order.
pub struct CountingFactory {
    clock: Arc<dyn Clock>,
    created: AtomicU64,
    latency: Duration,
}

impl CountingFactory {
    /// Create a factory stamping members with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            created: AtomicU64::new(0),
            latency: Duration::ZERO,
        }
    }

    /// Simulate slow (I/O-bound) creation.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// How many members this factory has created.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MemberFactory for CountingFactory {
    type Member = TestMember;

    async fn create(&self) -> Option<Arc<TestMember>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(TestMember::new(id, self.clock.now())))
    }
}

/// Factory that fails its first `fail_first` creations, then succeeds.
///
/// Pass `u64::MAX` for a factory that never succeeds.
pub struct FlakyFactory {
    clock: Arc<dyn Clock>,
    created: AtomicU64,
    failures_left: AtomicU64,
}

impl FlakyFactory {
    /// Create a factory that fails the first `fail_first` calls.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, fail_first: u64) -> Self {
        Self {
            clock,
            created: AtomicU64::new(0),
            failures_left: AtomicU64::new(fail_first),
        }
    }
}

#[async_trait]
impl MemberFactory for FlakyFactory {
    type Member = TestMember;

    async fn create(&self) -> Option<Arc<TestMember>> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            if left != u64::MAX {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
            }
            return None;
        }
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        Some(Arc::new(TestMember::new(id, self.clock.now())))
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Error sink that records every report for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(String, CreationDiagnostics)>>,
}

impl RecordingSink {
    /// All recorded `(context, diagnostics)` pairs, in report order.
    #[must_use]
    pub fn reports(&self) -> Vec<(String, CreationDiagnostics)> {
        self.reports.lock().clone()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, _error: &Error, context: &str, diagnostics: &CreationDiagnostics) {
        self.reports
            .lock()
            .push((context.to_string(), diagnostics.clone()));
    }
}
