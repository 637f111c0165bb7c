//! Dynamic sizing controller for a [`Pool`].
//!
//! The [`SizeManager`] grows a pool to its configured minimum on startup,
//! grows it further when usage crosses a threshold, and periodically reaps
//! members that are old and unused. The threshold and growth rate adapt
//! themselves: exhaustion makes future growth trigger earlier and grow
//! more, wasted members make it trigger later and grow less.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::PoolEventKind;
use crate::member::{MemberFactory, PoolMember};
use crate::pool::Pool;

// ---------------------------------------------------------------------------
// ManagerOptions
// ---------------------------------------------------------------------------

/// Tunable parameters for a [`SizeManager`]. Immutable per manager instance.
///
/// Defaults match observed production values.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManagerOptions {
    /// Floor the pool is grown to on startup and never reaped below.
    /// Default: 5
    pub minimum_pool_size: usize,
    /// Members younger than this are never reaped. Default: 10 min
    pub minimum_member_life: Duration,
    /// A used member idle for longer than this is reapable. Default: 10 min
    pub unused_stale_after: Duration,
    /// How often the reaper runs. Default: 10 min
    pub reaper_interval: Duration,
    /// Fraction of capacity in use that triggers growth (0.0, 1.0].
    /// Default: 0.60
    pub growth_threshold: f64,
    /// Fractional growth increment applied to the current size. Default: 0.50
    pub growth_rate: f64,
    /// Step by which the threshold adapts on exhaustion/waste. Default: 0.05
    pub threshold_step: f64,
    /// Step by which the growth rate adapts on exhaustion/waste.
    /// Default: 0.05
    pub rate_step: f64,
    /// Base delay before startup growth begins. Default: 0 s
    pub startup_delay: Duration,
    /// Ceiling for the uniformly random jitter added to the startup delay,
    /// staggering startup across a fleet of pools. Default: 10 s
    pub startup_jitter_max: Duration,
    /// Pacing delay between consecutive startup creations. Default: 1 s
    pub startup_pacing: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            minimum_pool_size: 5,
            minimum_member_life: Duration::from_secs(600),
            unused_stale_after: Duration::from_secs(600),
            reaper_interval: Duration::from_secs(600),
            growth_threshold: 0.60,
            growth_rate: 0.50,
            threshold_step: 0.05,
            rate_step: 0.05,
            startup_delay: Duration::ZERO,
            startup_jitter_max: Duration::from_secs(10),
            startup_pacing: Duration::from_secs(1),
        }
    }
}

impl ManagerOptions {
    /// Validate the options, returning an error if any field is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.minimum_pool_size == 0 {
            return Err(Error::configuration("minimum_pool_size must be > 0"));
        }
        if !(self.growth_threshold > 0.0 && self.growth_threshold <= 1.0) {
            return Err(Error::configuration(
                "growth_threshold must be in (0.0, 1.0]",
            ));
        }
        if !(self.growth_rate > 0.0) {
            return Err(Error::configuration("growth_rate must be > 0.0"));
        }
        if !(self.threshold_step > 0.0) {
            return Err(Error::configuration("threshold_step must be > 0.0"));
        }
        if !(self.rate_step > 0.0) {
            return Err(Error::configuration("rate_step must be > 0.0"));
        }
        if self.reaper_interval.is_zero() {
            return Err(Error::configuration(
                "reaper_interval must be greater than zero",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Manager state
// ---------------------------------------------------------------------------

/// Lifecycle of a [`SizeManager`] over the life of its one managed pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// No pool attached yet.
    Unattached,
    /// Attached; waiting out the startup delay.
    Starting,
    /// Creating members until the pool reaches the minimum size.
    GrowingToMinimum,
    /// Startup complete; event-driven growth and the reaper are active.
    Steady,
    /// Terminal.
    Disposed,
}

/// Snapshot of the manager's mutable control parameters.
#[derive(Debug, Clone, Copy)]
pub struct SizeControl {
    /// The size the manager is currently growing toward.
    pub target_pool_size: usize,
    /// Current (adapted) growth threshold.
    pub growth_threshold: f64,
    /// Current (adapted) growth rate.
    pub growth_rate: f64,
}

/// Mutable sizing state, guarded by the growth/shrink lock so startup
/// growth, exhaustion-triggered growth and the reaper never run
/// concurrently against the same pool.
struct Control {
    target_pool_size: usize,
    growth_threshold: f64,
    growth_rate: f64,
}

// ---------------------------------------------------------------------------
// SizeManager
// ---------------------------------------------------------------------------

struct ManagerInner<F: MemberFactory> {
    options: ManagerOptions,
    state: Mutex<ManagerState>,
    pool: Mutex<Option<Pool<F>>>,
    control: AsyncMutex<Control>,
    startup_complete: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
}

/// Self-tuning sizing controller. Manages exactly one pool for that pool's
/// entire lifetime.
///
/// Cheap to clone — clones share the same underlying state.
pub struct SizeManager<F: MemberFactory> {
    inner: Arc<ManagerInner<F>>,
}

impl<F: MemberFactory> Clone for SizeManager<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: MemberFactory> std::fmt::Debug for SizeManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeManager")
            .field("options", &self.inner.options)
            .field("state", &self.state())
            .finish()
    }
}

impl<F: MemberFactory> SizeManager<F> {
    /// Create a new manager with the given options.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the options are invalid.
    pub fn new(options: ManagerOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                control: AsyncMutex::new(Control {
                    target_pool_size: options.minimum_pool_size,
                    growth_threshold: options.growth_threshold,
                    growth_rate: options.growth_rate,
                }),
                options,
                state: Mutex::new(ManagerState::Unattached),
                pool: Mutex::new(None),
                startup_complete: AtomicBool::new(false),
                cancel: Mutex::new(None),
            }),
        })
    }

    /// Attach a pool and start managing it.
    ///
    /// Spawns the manager's background task: startup growth (jittered delay,
    /// paced creation up to the minimum size), then the steady-state loop
    /// that reacts to pool events and runs the periodic reaper.
    ///
    /// Returns the task's [`JoinHandle`] so the caller can supervise it —
    /// a member-creation failure during startup faults the task and
    /// surfaces here, not silently.
    ///
    /// # Errors
    /// [`Error::AlreadyManaged`] if this manager already has a pool.
    pub fn manage(&self, pool: Pool<F>) -> Result<JoinHandle<Result<()>>> {
        {
            let mut state = self.inner.state.lock();
            if *state != ManagerState::Unattached {
                let attached = self
                    .inner
                    .pool
                    .lock()
                    .as_ref()
                    .map_or_else(|| String::from("<detached>"), |p| p.name().to_string());
                return Err(Error::already_managed(attached));
            }
            *state = ManagerState::Starting;
        }
        *self.inner.pool.lock() = Some(pool.clone());

        // Child of the pool's lifetime token: disposing either the pool or
        // this manager stops the background task.
        let cancel = pool.child_token();
        *self.inner.cancel.lock() = Some(cancel.clone());

        tracing::info!(
            pool = %pool.name(),
            minimum = self.inner.options.minimum_pool_size,
            "size manager attached"
        );
        Ok(tokio::spawn(Arc::clone(&self.inner).run(pool, cancel)))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ManagerState {
        *self.inner.state.lock()
    }

    /// The manager's immutable options.
    #[must_use]
    pub fn options(&self) -> &ManagerOptions {
        &self.inner.options
    }

    /// Snapshot of the mutable control parameters (target size, adapted
    /// threshold and rate).
    pub async fn control(&self) -> SizeControl {
        let control = self.inner.control.lock().await;
        SizeControl {
            target_pool_size: control.target_pool_size,
            growth_threshold: control.growth_threshold,
            growth_rate: control.growth_rate,
        }
    }

    /// Dispose the manager. Idempotent; tolerates an already-cancelled
    /// token (e.g. when the pool was disposed first).
    pub fn dispose(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == ManagerState::Disposed {
                return;
            }
            *state = ManagerState::Disposed;
        }
        if let Some(cancel) = self.inner.cancel.lock().as_ref() {
            cancel.cancel();
        }
        tracing::info!("size manager disposed");
    }
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

impl<F: MemberFactory> ManagerInner<F> {
    async fn run(self: Arc<Self>, pool: Pool<F>, cancel: CancellationToken) -> Result<()> {
        let result = Arc::clone(&self).run_inner(pool.clone(), cancel).await;
        *self.state.lock() = ManagerState::Disposed;
        if let Err(ref error) = result {
            tracing::error!(pool = %pool.name(), %error, "size manager task faulted");
        }
        result
    }

    async fn run_inner(self: Arc<Self>, pool: Pool<F>, cancel: CancellationToken) -> Result<()> {
        if !self.startup(&pool, &cancel).await? {
            return Ok(());
        }
        self.startup_complete.store(true, Ordering::SeqCst);
        *self.state.lock() = ManagerState::Steady;
        tracing::info!(
            pool = %pool.name(),
            size = pool.resource_count(),
            "startup growth complete, reaper armed"
        );

        // Subscribe only now: consumption/exhaustion that happened during
        // startup must not trigger growth retroactively.
        let mut events = pool.subscribe();
        let mut reaper = tokio::time::interval(self.options.reaper_interval);
        reaper.tick().await; // the first tick completes immediately
        let mut growth: JoinSet<Result<()>> = JoinSet::new();

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => match event.kind {
                        PoolEventKind::Acquired => {
                            let inner = Arc::clone(&self);
                            let pool = pool.clone();
                            growth.spawn(async move { inner.consumed_growth(pool).await });
                        }
                        PoolEventKind::Exhausted => {
                            let inner = Arc::clone(&self);
                            let pool = pool.clone();
                            growth.spawn(async move { inner.exhausted_growth(pool).await });
                        }
                        _ => {}
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            pool = %pool.name(),
                            skipped,
                            "size manager lagged behind pool events"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = reaper.tick() => self.reap(&pool, &cancel).await,
                // Growth runs on its own tasks so a slow factory never stalls
                // event handling; faults surface here instead of vanishing.
                Some(finished) = growth.join_next() => match finished {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        tracing::error!(pool = %pool.name(), %error, "scheduled growth failed");
                    }
                    Err(join_error) => {
                        tracing::error!(pool = %pool.name(), %join_error, "growth task panicked");
                    }
                },
            }
        }

        growth.shutdown().await;
        Ok(())
    }

    /// Grow the pool to the minimum size, pacing between creations.
    ///
    /// Returns `Ok(false)` when aborted early by cancellation or disposal.
    /// A creation error propagates — startup failures fault the background
    /// task rather than being dropped.
    async fn startup(&self, pool: &Pool<F>, cancel: &CancellationToken) -> Result<bool> {
        let delay = self.options.startup_delay + startup_jitter(&self.options);
        if !delay.is_zero() {
            tracing::debug!(pool = %pool.name(), ?delay, "delaying startup growth");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Ok(false),
            }
        }

        *self.state.lock() = ManagerState::GrowingToMinimum;
        while pool.resource_count() < self.options.minimum_pool_size {
            if cancel.is_cancelled() || pool.is_disposed() {
                return Ok(false);
            }
            {
                let _growth = self.control.lock().await;
                pool.add_resource().await?;
            }
            if pool.resource_count() < self.options.minimum_pool_size
                && !self.options.startup_pacing.is_zero()
            {
                tokio::select! {
                    () = tokio::time::sleep(self.options.startup_pacing) => {}
                    () = cancel.cancelled() => return Ok(false),
                }
            }
        }
        Ok(true)
    }

    /// A member was consumed: recompute the target and grow if below it.
    async fn consumed_growth(self: Arc<Self>, pool: Pool<F>) -> Result<()> {
        if !self.startup_complete.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut control = self.control.lock().await;
        self.update_target(&mut control, &pool);
        if pool.resource_count() < control.target_pool_size {
            self.grow_locked(&mut control, &pool).await?;
        }
        Ok(())
    }

    /// The pool ran dry: adapt toward earlier, larger growth, then grow.
    async fn exhausted_growth(self: Arc<Self>, pool: Pool<F>) -> Result<()> {
        if !self.startup_complete.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut control = self.control.lock().await;
        control.growth_threshold =
            (control.growth_threshold - self.options.threshold_step).max(0.0);
        control.growth_rate += self.options.rate_step;
        tracing::info!(
            pool = %pool.name(),
            threshold = control.growth_threshold,
            rate = control.growth_rate,
            "pool exhausted, tightening growth parameters"
        );
        self.update_target(&mut control, &pool);
        self.grow_locked(&mut control, &pool).await
    }

    /// Recompute the target size from current usage.
    ///
    /// Below the threshold the target is left unchanged — shrinking is
    /// exclusively the reaper's job.
    fn update_target(&self, control: &mut Control, pool: &Pool<F>) {
        let count = pool.resource_count();
        if count == 0 {
            return;
        }
        let usage_percent = pool.usage_count() as f64 / count as f64;
        if usage_percent >= control.growth_threshold {
            let grown = (count as f64 * (1.0 + control.growth_rate)).floor() as usize;
            control.target_pool_size = grown.max(self.options.minimum_pool_size);
        }
    }

    /// Create members until the pool reaches the target size. Requires the
    /// growth/shrink lock, passed in as `control`.
    async fn grow_locked(&self, control: &mut Control, pool: &Pool<F>) -> Result<()> {
        let count = pool.resource_count();
        if control.target_pool_size <= count || pool.is_disposed() {
            return Ok(());
        }
        let delta = control.target_pool_size - count;
        for _ in 0..delta {
            pool.add_resource().await?;
        }
        tracing::info!(
            pool = %pool.name(),
            added = delta,
            target = control.target_pool_size,
            "grew pool to target size"
        );
        pool.publish(PoolEventKind::Grown);
        Ok(())
    }

    /// One reap cycle: remove members that are old and unused, down to the
    /// minimum size.
    ///
    /// Evaluates the availability snapshot in queue order; each removal
    /// dequeues from the front, so members leave in insertion order, not
    /// staleness order.
    async fn reap(&self, pool: &Pool<F>, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        if pool.resource_count() <= self.options.minimum_pool_size {
            return;
        }

        let mut control = self.control.lock().await;
        let now = pool.clock().now();
        let mut wasted = 0usize;

        for member in pool.available_members() {
            if pool.resource_count() <= self.options.minimum_pool_size {
                break; // floor reached, no point continuing
            }
            let age = (now - member.created_at()).to_std().unwrap_or_default();
            if age <= self.options.minimum_member_life {
                continue;
            }
            match member.last_used_at() {
                None => {
                    // Old enough and never used: capacity nobody needed.
                    pool.remove_resource();
                    pool.publish(PoolEventKind::Wasted);
                    wasted += 1;
                }
                Some(last_used) => {
                    let idle = (now - last_used).to_std().unwrap_or_default();
                    if idle > self.options.unused_stale_after {
                        pool.remove_resource();
                    }
                }
            }
        }

        if wasted > 1 {
            control.growth_threshold =
                (control.growth_threshold + self.options.threshold_step).min(1.0);
            control.growth_rate = (control.growth_rate - self.options.rate_step).max(0.0);
            tracing::info!(
                pool = %pool.name(),
                wasted,
                threshold = control.growth_threshold,
                rate = control.growth_rate,
                "wasted members reaped, easing growth parameters"
            );
        } else if wasted == 1 {
            tracing::debug!(pool = %pool.name(), "one wasted member reaped");
        }
    }
}

fn startup_jitter(options: &ManagerOptions) -> Duration {
    if options.startup_jitter_max.is_zero() {
        return Duration::ZERO;
    }
    let ceiling = options.startup_jitter_max.as_micros() as u64;
    Duration::from_micros(rand::rng().random_range(0..=ceiling))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn default_options_are_valid() {
        ManagerOptions::default().validate().unwrap();
    }

    #[test]
    fn default_options_match_production_values() {
        let options = ManagerOptions::default();
        assert_eq!(options.minimum_pool_size, 5);
        assert_eq!(options.minimum_member_life, Duration::from_secs(600));
        assert_eq!(options.unused_stale_after, Duration::from_secs(600));
        assert_eq!(options.reaper_interval, Duration::from_secs(600));
        assert_eq!(options.growth_threshold, 0.60);
        assert_eq!(options.growth_rate, 0.50);
        assert_eq!(options.startup_pacing, Duration::from_secs(1));
        assert_eq!(options.startup_jitter_max, Duration::from_secs(10));
    }

    #[test]
    fn zero_minimum_pool_size_rejected() {
        let options = ManagerOptions {
            minimum_pool_size: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test_case(0.0 ; "zero")]
    #[test_case(-0.2 ; "negative")]
    #[test_case(1.1 ; "above one")]
    #[test_case(f64::NAN ; "nan")]
    fn invalid_growth_threshold_rejected(threshold: f64) {
        let options = ManagerOptions {
            growth_threshold: threshold,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn growth_threshold_one_accepted() {
        let options = ManagerOptions {
            growth_threshold: 1.0,
            ..Default::default()
        };
        options.validate().unwrap();
    }

    #[test_case(0.0 ; "zero")]
    #[test_case(-0.5 ; "negative")]
    fn invalid_growth_rate_rejected(rate: f64) {
        let options = ManagerOptions {
            growth_rate: rate,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn zero_adjustment_steps_rejected() {
        assert!(
            ManagerOptions {
                threshold_step: 0.0,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
        assert!(
            ManagerOptions {
                rate_step: 0.0,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }

    #[test]
    fn zero_reaper_interval_rejected() {
        let options = ManagerOptions {
            reaper_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn jitter_with_zero_ceiling_is_zero() {
        let options = ManagerOptions {
            startup_jitter_max: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(startup_jitter(&options), Duration::ZERO);
    }

    #[test]
    fn jitter_never_exceeds_ceiling() {
        let options = ManagerOptions {
            startup_jitter_max: Duration::from_millis(50),
            ..Default::default()
        };
        for _ in 0..100 {
            assert!(startup_jitter(&options) <= Duration::from_millis(50));
        }
    }
}
