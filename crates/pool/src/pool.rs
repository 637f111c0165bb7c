//! Concurrent resource pool — the acquire/release surface.
//!
//! `Pool<F>` owns a queue of available members plus the live instance count,
//! both guarded by a single structural lock so the count invariant
//! (`total == available + in use`) holds at every observation point.
//! Member creation is delegated to the owner-supplied [`MemberFactory`] and
//! always happens outside that lock.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::error::{CreationDiagnostics, Error, ErrorSink, LogErrorSink, Result};
use crate::events::{EventBus, PoolEvent, PoolEventKind};
use crate::member::MemberFactory;

/// How many dequeue-or-create rounds `acquire` makes before giving up.
pub const ACQUIRE_RETRY_LIMIT: u32 = 10;

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// Structural pool state: the available queue and the live count together,
/// so `total == available.len() + usage` is atomic under one lock.
struct Shelf<M> {
    available: VecDeque<Arc<M>>,
    total: usize,
    disposed: bool,
}

struct PoolInner<F: MemberFactory> {
    name: String,
    factory: F,
    clock: Arc<dyn Clock>,
    error_sink: Arc<dyn ErrorSink>,
    events: EventBus,
    shelf: Mutex<Shelf<F::Member>>,
    /// Pool-lifetime token; disposal cancels it, which stops an attached
    /// size manager and stats collector (both run on child tokens).
    cancel: CancellationToken,
}

// ---------------------------------------------------------------------------
// Pool<F>
// ---------------------------------------------------------------------------

/// Concurrent pool of reusable members.
///
/// Cheap to clone — clones share the same underlying state. The pool only
/// hands out `Arc<F::Member>`; callers return members with
/// [`release`](Pool::release) when done.
pub struct Pool<F: MemberFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: MemberFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: MemberFactory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shelf = self.inner.shelf.lock();
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("total", &shelf.total)
            .field("available", &shelf.available.len())
            .field("disposed", &shelf.disposed)
            .finish()
    }
}

impl<F: MemberFactory> Pool<F> {
    /// Create a new pool with the default collaborators (system clock,
    /// log-backed error sink).
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self::with_collaborators(name, factory, Arc::new(SystemClock), Arc::new(LogErrorSink))
    }

    /// Create a new pool with explicit clock and error-sink collaborators.
    pub fn with_collaborators(
        name: impl Into<String>,
        factory: F,
        clock: Arc<dyn Clock>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                factory,
                clock,
                error_sink,
                events: EventBus::default(),
                shelf: Mutex::new(Shelf {
                    available: VecDeque::new(),
                    total: 0,
                    disposed: false,
                }),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The pool identifier, used only for logs and diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Acquire a member for exclusive use.
    ///
    /// Loops up to [`ACQUIRE_RETRY_LIMIT`] times: dequeue an available
    /// member, or create one and retry. Each round that finds the queue
    /// empty emits an `Exhausted` event (which drives the size manager);
    /// a failed creation is logged and retried, never fatal on its own.
    ///
    /// # Errors
    /// [`Error::Disposed`] if the pool was disposed,
    /// [`Error::MaxRetriesReached`] if the retry budget ran out.
    pub async fn acquire(&self) -> Result<Arc<F::Member>> {
        let mut last_creation_error = None;
        for attempt in 1..=ACQUIRE_RETRY_LIMIT {
            let popped = {
                let mut shelf = self.inner.shelf.lock();
                if shelf.disposed {
                    return Err(Error::disposed(&self.inner.name));
                }
                shelf.available.pop_front()
            };

            if let Some(member) = popped {
                self.publish(PoolEventKind::Acquired);
                return Ok(member);
            }

            // Nothing available. Create outside the structural lock:
            // creation may be slow and must not block other acquirers.
            if let Err(error) = self.add_resource().await {
                tracing::warn!(
                    pool = %self.inner.name,
                    attempt,
                    %error,
                    "member creation failed during acquire, retrying"
                );
                last_creation_error = Some(error);
            }
            self.publish(PoolEventKind::Exhausted);
        }

        Err(Error::MaxRetriesReached {
            pool: self.inner.name.clone(),
            attempts: ACQUIRE_RETRY_LIMIT,
            source: last_creation_error.map(Box::new),
        })
    }

    /// Return a member to the pool.
    ///
    /// No-op (the member is simply dropped) if the pool is disposed.
    pub fn release(&self, member: Arc<F::Member>) {
        {
            let mut shelf = self.inner.shelf.lock();
            if shelf.disposed {
                return;
            }
            shelf.available.push_back(member);
        }
        self.publish(PoolEventKind::Released);
    }

    /// Create exactly one new member via the factory and insert it.
    ///
    /// # Errors
    /// [`Error::CreationFailed`] (also reported to the error sink) if the
    /// factory returned nothing; [`Error::Disposed`] if the pool was
    /// disposed while the factory was running.
    pub async fn add_resource(&self) -> Result<()> {
        let Some(member) = self.inner.factory.create().await else {
            let diagnostics = self.creation_diagnostics();
            let error = Error::CreationFailed {
                diagnostics: diagnostics.clone(),
            };
            self.inner
                .error_sink
                .report(&error, "add_resource", &diagnostics);
            return Err(error);
        };

        {
            let mut shelf = self.inner.shelf.lock();
            if shelf.disposed {
                // Raced with dispose; drop the member rather than leak it
                // into a dead queue.
                return Err(Error::disposed(&self.inner.name));
            }
            shelf.available.push_back(member);
            shelf.total += 1;
        }
        tracing::info!(pool = %self.inner.name, total = self.resource_count(), "member added");
        self.publish(PoolEventKind::Added);
        Ok(())
    }

    /// Remove and destroy one available member.
    ///
    /// Dequeues from the front of the available queue — an in-use member is
    /// never removed. Silent no-op when nothing is available.
    pub fn remove_resource(&self) {
        let removed = {
            let mut shelf = self.inner.shelf.lock();
            match shelf.available.pop_front() {
                Some(member) => {
                    shelf.total = shelf.total.saturating_sub(1);
                    Some(member)
                }
                None => None,
            }
        };
        if let Some(member) = removed {
            drop(member);
            tracing::info!(pool = %self.inner.name, total = self.resource_count(), "member removed");
            self.publish(PoolEventKind::Removed);
        }
    }

    /// Total live members (available + in use). Returns 0 once disposed.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.inner.shelf.lock().total
    }

    /// Members currently checked out to callers. Returns 0 once disposed.
    #[must_use]
    pub fn usage_count(&self) -> usize {
        let shelf = self.inner.shelf.lock();
        shelf.total.saturating_sub(shelf.available.len())
    }

    /// Snapshot of the currently available members, in queue order.
    ///
    /// Used by the reaper to inspect member ages; the snapshot is never
    /// mutated by the caller.
    #[must_use]
    pub fn available_members(&self) -> Vec<Arc<F::Member>> {
        self.inner.shelf.lock().available.iter().cloned().collect()
    }

    /// Whether [`dispose`](Pool::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.shelf.lock().disposed
    }

    /// Dispose the pool. Idempotent.
    ///
    /// Drains and discards the available queue, fails all further acquires
    /// with [`Error::Disposed`], and cancels the pool-lifetime token so an
    /// attached size manager and stats collector shut down.
    pub fn dispose(&self) {
        let drained = {
            let mut shelf = self.inner.shelf.lock();
            if shelf.disposed {
                return;
            }
            shelf.disposed = true;
            shelf.total = 0;
            std::mem::take(&mut shelf.available)
        };
        drop(drained);
        self.inner.cancel.cancel();
        tracing::info!(pool = %self.inner.name, "pool disposed");
    }

    /// The pool's event bus; subscribe for monitoring/dashboards.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Convenience for `events().subscribe()`.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }

    /// Emit an event stamped with the pool's clock. The size manager uses
    /// this to publish `Grown`/`Wasted` on the shared bus.
    pub(crate) fn publish(&self, kind: PoolEventKind) {
        self.inner
            .events
            .emit(PoolEvent::new(kind, self.inner.clock.now()));
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// Child of the pool-lifetime token; cancelled on [`dispose`](Pool::dispose).
    pub(crate) fn child_token(&self) -> CancellationToken {
        self.inner.cancel.child_token()
    }

    fn creation_diagnostics(&self) -> CreationDiagnostics {
        let (total, available) = {
            let shelf = self.inner.shelf.lock();
            (shelf.total, shelf.available.len())
        };
        CreationDiagnostics {
            pool: self.inner.name.clone(),
            resource_count: total,
            available_count: available,
            usage_count: total.saturating_sub(available),
            available_memory_bytes: crate::error::available_memory_bytes(),
        }
    }
}
