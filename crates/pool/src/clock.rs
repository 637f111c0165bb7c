//! Time source abstraction.

use chrono::{DateTime, Utc};

/// Time source used for event timestamps and age computations.
///
/// Substitutable with a manual clock (see [`crate::testing::ManualClock`])
/// so reaper and startup-delay logic can be tested deterministically.
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
