//! Pooled member contract and the owner-supplied factory.
//!
//! The pool knows almost nothing about what it holds: a member only has to
//! expose a creation timestamp and a last-used timestamp. Everything else
//! (what a "workbook" or "engine instance" actually is, how it is built)
//! belongs to the owner via [`MemberFactory`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Minimal shape a pooled resource must satisfy.
///
/// `last_used_at` is updated by whoever is using the member, via
/// [`mark_used`](PoolMember::mark_used) — the pool itself never touches it.
/// The reaper only ever reads these timestamps, so a race between a reader
/// and `mark_used` is benign: worst case a member is reaped one cycle early
/// or late.
pub trait PoolMember: Send + Sync + 'static {
    /// When this member was created. Immutable once set.
    fn created_at(&self) -> DateTime<Utc>;

    /// When this member was last used, or `None` if it has never been used.
    fn last_used_at(&self) -> Option<DateTime<Utc>>;

    /// Record a use of this member.
    ///
    /// Implementations must keep the invariant `last_used_at >= created_at`.
    fn mark_used(&self, at: DateTime<Utc>);
}

/// Factory for creating pool members, supplied by the pool's owner.
///
/// Returning `None` from [`create`](MemberFactory::create) means no usable
/// instance could be built; the pool converts that into
/// [`Error::CreationFailed`](crate::error::Error::CreationFailed) with a
/// diagnostic payload. Must be safe to call concurrently with itself.
#[async_trait]
pub trait MemberFactory: Send + Sync + 'static {
    /// The member type this factory produces.
    type Member: PoolMember;

    /// Create exactly one new member.
    ///
    /// Creation may be slow (I/O-bound); the pool never invokes it while
    /// holding a lock that would block other acquirers.
    async fn create(&self) -> Option<Arc<Self::Member>>;
}
