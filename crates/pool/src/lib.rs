//! # Abacus Pool
//!
//! Self-tuning concurrent resource pool: a bounded collection of
//! expensive-to-create, reusable resources (calculation-engine workbook
//! instances, connections, …) acquired and released at high frequency,
//! which autonomously grows and shrinks to track demand.
//!
//! - [`Pool`] owns the available queue and the acquire/release protocol.
//! - [`SizeManager`] grows the pool to a minimum on startup, grows it
//!   further when usage crosses a self-adjusting threshold, and reaps old
//!   unused members on a timer.
//! - [`StatsCollector`] records every [`PoolEvent`] and answers windowed
//!   counting queries.
//!
//! What a resource *is* stays with the owner: implement [`PoolMember`] and
//! [`MemberFactory`] and hand the factory to the pool.

pub mod clock;
pub mod error;
pub mod events;
pub mod manager;
pub mod member;
pub mod pool;
pub mod stats;
pub mod testing;

pub use clock::{Clock, SystemClock};
pub use error::{CreationDiagnostics, Error, ErrorSink, LogErrorSink, Result};
pub use events::{EventBus, PoolEvent, PoolEventKind};
pub use manager::{ManagerOptions, ManagerState, SizeControl, SizeManager};
pub use member::{MemberFactory, PoolMember};
pub use pool::{ACQUIRE_RETRY_LIMIT, Pool};
pub use stats::StatsCollector;
