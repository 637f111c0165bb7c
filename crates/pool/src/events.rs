//! Event broadcasting for pool observability.
//!
//! Provides the [`PoolEvent`] record emitted on every pool/manager state
//! transition and an [`EventBus`] backed by `tokio::sync::broadcast`. The
//! size manager and the stats collector both subscribe to the same bus, so
//! notifying them never blocks the caller that triggered the event.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// The kind of a pool event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PoolEventKind {
    /// A member was handed to a caller for exclusive use.
    Acquired,
    /// A member was returned to the pool.
    Released,
    /// An acquire attempt found no available member.
    Exhausted,
    /// A new member was created and inserted into the pool.
    Added,
    /// An available member was removed and destroyed.
    Removed,
    /// The size manager grew the pool toward its target size.
    Grown,
    /// The reaper removed a member that was never used.
    Wasted,
}

/// An immutable record of a typed pool event.
#[derive(Debug, Clone, Copy)]
pub struct PoolEvent {
    /// What happened.
    pub kind: PoolEventKind,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl PoolEvent {
    /// Create a new event record.
    #[must_use]
    pub fn new(kind: PoolEventKind, at: DateTime<Utc>) -> Self {
        Self { kind, at }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for pool events.
///
/// Uses `tokio::sync::broadcast` under the hood. Emission is fire-and-forget:
/// if no subscribers are listening, events are silently dropped (no
/// backpressure on the emitter).
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// The buffer size determines how many events can be queued before
    /// slow subscribers start lagging (and losing events).
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// This is non-blocking. If there are no subscribers, the event is
    /// silently dropped.
    pub fn emit(&self, event: PoolEvent) {
        // Ignore the error — it just means there are no active receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    ///
    /// Returns a receiver that will get all events emitted after this call.
    /// If the subscriber falls behind by more than `buffer_size` events, it
    /// will receive a `Lagged` error and skip to the latest.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
