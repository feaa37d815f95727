//! Bounded pool of expensive renderer instances
//!
//! Instances are created lazily up to the cap and reused aggressively, but a
//! wedged instance must never poison future work: every release carries a
//! health report, instances idle past a freshness window are probed before
//! handoff, and a guard dropped without a report (abandoned task) is
//! re-probed before it may be pooled again. A background sweep retires
//! instances past their maximum lifetime or idle timeout.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod chrome;
pub mod launcher;

pub use chrome::{ChromeLauncher, ChromeRenderer};
pub use launcher::{RendererEngine, RendererLauncher};

use crate::config::RendererPoolConfig;

/// How often a capped-out `acquire` rechecks for a free instance
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors surfaced by [`RendererPool::acquire`]
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// No instance became available within the caller's wait budget
    #[error("timed out after {0:?} waiting for a renderer")]
    AcquireTimeout(Duration),
    /// Instance creation failed even after the retry
    #[error("renderer pool exhausted: {0}")]
    Exhausted(String),
    /// The pool is shutting down
    #[error("renderer pool is shut down")]
    ShutDown,
}

/// Lifecycle state of a pooled instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Idle,
    InUse,
    Unhealthy,
    Retired,
}

/// A renderer instance with pool metadata
pub struct PooledRenderer {
    pub id: u64,
    engine: Box<dyn RendererEngine>,
    pub created_at: Instant,
    pub last_used: Instant,
    pub last_probe: Instant,
    pub state: HandleState,
}

/// Health report carried by a guard at release time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HealthReport {
    Healthy,
    Unhealthy,
    /// Guard dropped without a report; probe before pooling again
    Unverified,
}

const HEALTH_UNVERIFIED: u8 = 0;
const HEALTH_HEALTHY: u8 = 1;
const HEALTH_UNHEALTHY: u8 = 2;

/// Bounded renderer pool
pub struct RendererPool {
    config: RendererPoolConfig,
    launcher: Arc<dyn RendererLauncher>,
    /// Ready instances; in-use instances live inside their guards
    idle: Arc<Mutex<VecDeque<PooledRenderer>>>,
    in_use: AtomicUsize,
    next_id: AtomicU64,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl RendererPool {
    /// Create a pool (does not start the background sweep)
    pub fn new(config: RendererPoolConfig, launcher: Arc<dyn RendererLauncher>) -> Arc<Self> {
        Arc::new(Self {
            config,
            launcher,
            idle: Arc::new(Mutex::new(VecDeque::new())),
            in_use: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            sweep_handle: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Start the retirement sweep.
    pub async fn start(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sweep_loop(pool).await;
        });
        *self.sweep_handle.lock().await = Some(handle);
    }

    /// Acquire an instance, waiting up to `timeout` for one to free up.
    ///
    /// Prefers an idle instance (probed first if it has been idle beyond the
    /// freshness window), creates a new one while under the cap, and
    /// otherwise waits. Creation failure is retried once after a short
    /// backoff before surfacing [`PoolError::Exhausted`].
    pub async fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<RendererGuard, PoolError> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return Err(PoolError::ShutDown);
            }

            // An instance leaving the idle queue counts as in-use at once so
            // concurrent acquires never overshoot the cap
            let candidate = {
                let mut idle = self.idle.lock().await;
                let popped = idle.pop_front();
                if popped.is_some() {
                    self.in_use.fetch_add(1, Ordering::Relaxed);
                }
                popped
            };

            if let Some(mut renderer) = candidate {
                if renderer.last_probe.elapsed() > self.config.probe_staleness {
                    match renderer.engine.probe().await {
                        Ok(()) => renderer.last_probe = Instant::now(),
                        Err(e) => {
                            warn!("renderer {} failed pre-handoff probe: {e:#}", renderer.id);
                            self.in_use.fetch_sub(1, Ordering::Relaxed);
                            renderer.state = HandleState::Unhealthy;
                            self.destroy(renderer);
                            continue;
                        }
                    }
                }
                renderer.state = HandleState::InUse;
                renderer.last_used = Instant::now();
                debug!("acquired renderer {} from pool", renderer.id);
                return Ok(self.guard(renderer));
            }

            if self.try_reserve_slot().await {
                match self.launch().await {
                    Ok(renderer) => return Ok(self.guard(renderer)),
                    Err(first) => {
                        warn!("renderer creation failed, retrying once: {first:#}");
                        tokio::time::sleep(self.config.creation_backoff).await;
                        match self.launch().await {
                            Ok(renderer) => return Ok(self.guard(renderer)),
                            Err(second) => {
                                self.in_use.fetch_sub(1, Ordering::Relaxed);
                                return Err(PoolError::Exhausted(format!("{second:#}")));
                            }
                        }
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::AcquireTimeout(timeout));
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Retire the oldest idle instances until the pool size (Idle + InUse)
    /// reaches `target`. In-use instances are never interrupted, so the pool
    /// may stay above target until guards are released.
    pub async fn shrink(&self, target: usize) {
        let mut removed = Vec::new();
        {
            let mut idle = self.idle.lock().await;
            while self.in_use.load(Ordering::Relaxed) + idle.len() > target {
                let oldest = idle
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, r)| r.created_at)
                    .map(|(i, _)| i);
                match oldest.and_then(|i| idle.remove(i)) {
                    Some(renderer) => removed.push(renderer),
                    None => break,
                }
            }
        }
        if !removed.is_empty() {
            info!(
                "pool shrink retired {} idle renderers (target {target})",
                removed.len()
            );
        }
        for mut renderer in removed {
            renderer.state = HandleState::Retired;
            self.destroy(renderer);
        }
    }

    /// Stop the sweep and close every idle instance. Guards still out are
    /// retired when they release.
    pub async fn shutdown(&self) {
        info!("shutting down renderer pool");
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            handle.abort();
        }
        let drained: Vec<PooledRenderer> = {
            let mut idle = self.idle.lock().await;
            idle.drain(..).collect()
        };
        for renderer in drained {
            renderer.engine.close().await;
        }
        info!("renderer pool shutdown complete");
    }

    /// Instances currently checked out
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Instances currently idle in the pool
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    #[must_use]
    pub fn config(&self) -> &RendererPoolConfig {
        &self.config
    }

    fn guard(self: &Arc<Self>, renderer: PooledRenderer) -> RendererGuard {
        RendererGuard {
            renderer: Some(renderer),
            pool: Arc::clone(self),
            health: AtomicU8::new(HEALTH_UNVERIFIED),
        }
    }

    /// Reserve a slot for a new instance if the cap allows.
    async fn try_reserve_slot(&self) -> bool {
        let idle_len = self.idle.lock().await.len();
        loop {
            let in_use = self.in_use.load(Ordering::Relaxed);
            if in_use + idle_len >= self.config.max_size {
                return false;
            }
            if self
                .in_use
                .compare_exchange(in_use, in_use + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Launch a new instance; the caller has already reserved its slot.
    async fn launch(&self) -> anyhow::Result<PooledRenderer> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let engine = self.launcher.launch().await?;
        let now = Instant::now();
        info!("launched renderer {id}");
        Ok(PooledRenderer {
            id,
            engine,
            created_at: now,
            last_used: now,
            last_probe: now,
            state: HandleState::InUse,
        })
    }

    fn release(self: &Arc<Self>, mut renderer: PooledRenderer, report: HealthReport) {
        renderer.last_used = Instant::now();

        let over_lifetime = renderer.created_at.elapsed() >= self.config.max_lifetime;
        if self.shutdown.load(Ordering::Relaxed) || over_lifetime {
            debug!("retiring renderer {} on release", renderer.id);
            renderer.state = HandleState::Retired;
            self.in_use.fetch_sub(1, Ordering::Relaxed);
            self.destroy(renderer);
            return;
        }

        // The slot stays reserved until the instance is back in the idle
        // queue or destroyed, so a racing acquire cannot overshoot the cap
        match report {
            HealthReport::Healthy => {
                renderer.state = HandleState::Idle;
                renderer.last_probe = Instant::now();
                let pool = Arc::clone(self);
                let id = renderer.id;
                tokio::spawn(async move {
                    pool.idle.lock().await.push_back(renderer);
                    pool.in_use.fetch_sub(1, Ordering::Relaxed);
                    debug!("released renderer {id} back to pool");
                });
            }
            HealthReport::Unhealthy => {
                warn!("renderer {} released unhealthy, destroying", renderer.id);
                renderer.state = HandleState::Unhealthy;
                self.in_use.fetch_sub(1, Ordering::Relaxed);
                self.destroy(renderer);
            }
            HealthReport::Unverified => {
                // Never assume health after an abandoned operation
                let pool = Arc::clone(self);
                tokio::spawn(async move {
                    match renderer.engine.probe().await {
                        Ok(()) => {
                            renderer.state = HandleState::Idle;
                            renderer.last_probe = Instant::now();
                            let id = renderer.id;
                            pool.idle.lock().await.push_back(renderer);
                            debug!("renderer {id} verified after abandoned task");
                        }
                        Err(e) => {
                            warn!(
                                "renderer {} failed post-abandon probe: {e:#}",
                                renderer.id
                            );
                            renderer.state = HandleState::Unhealthy;
                            pool.destroy(renderer);
                        }
                    }
                    pool.in_use.fetch_sub(1, Ordering::Relaxed);
                });
            }
        }
    }

    /// Tear an instance down without blocking the caller.
    fn destroy(&self, renderer: PooledRenderer) {
        debug!("destroying renderer {}", renderer.id);
        let engine = renderer.engine;
        tokio::spawn(async move {
            engine.close().await;
        });
    }
}

// =============================================================================
// RAII Guard
// =============================================================================

/// RAII guard for an acquired renderer.
///
/// Dropping the guard is the one and only release. Callers report health via
/// [`report_healthy`](Self::report_healthy) or
/// [`mark_unhealthy`](Self::mark_unhealthy); a guard dropped without either
/// is released unverified and probed before re-entering the pool.
pub struct RendererGuard {
    renderer: Option<PooledRenderer>,
    pool: Arc<RendererPool>,
    health: AtomicU8,
}

impl RendererGuard {
    /// Access the underlying engine
    #[must_use]
    pub fn engine(&self) -> &dyn RendererEngine {
        self.renderer
            .as_ref()
            .expect("renderer should be present")
            .engine
            .as_ref()
    }

    /// Pool-assigned instance id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.renderer
            .as_ref()
            .expect("renderer should be present")
            .id
    }

    /// Report that the instance remained usable.
    ///
    /// Ignored if the guard was already marked unhealthy.
    pub fn report_healthy(&self) {
        let _ = self.health.compare_exchange(
            HEALTH_UNVERIFIED,
            HEALTH_HEALTHY,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    /// Report that the instance failed mid-task. It will be destroyed and
    /// never handed out again.
    pub fn mark_unhealthy(&self) {
        self.health.store(HEALTH_UNHEALTHY, Ordering::Relaxed);
    }
}

impl Drop for RendererGuard {
    fn drop(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            let report = match self.health.load(Ordering::Relaxed) {
                HEALTH_HEALTHY => HealthReport::Healthy,
                HEALTH_UNHEALTHY => HealthReport::Unhealthy,
                _ => HealthReport::Unverified,
            };
            self.pool.release(renderer, report);
        }
    }
}

// =============================================================================
// Background Sweep
// =============================================================================

/// Retire idle instances past their lifetime or idle timeout.
async fn sweep_loop(pool: Arc<RendererPool>) {
    let mut interval = tokio::time::interval(pool.config.sweep_interval);

    while !pool.shutdown.load(Ordering::Relaxed) {
        interval.tick().await;

        let now = Instant::now();
        let mut retired = Vec::new();
        {
            let mut idle = pool.idle.lock().await;
            let mut keep = VecDeque::with_capacity(idle.len());
            while let Some(renderer) = idle.pop_front() {
                let over_lifetime =
                    now.duration_since(renderer.created_at) >= pool.config.max_lifetime;
                let over_idle = now.duration_since(renderer.last_used) >= pool.config.idle_timeout;
                if over_lifetime || over_idle {
                    retired.push(renderer);
                } else {
                    keep.push_back(renderer);
                }
            }
            *idle = keep;
        }
        for mut renderer in retired {
            debug!(
                "sweep retiring renderer {} (age {:?}, idle {:?})",
                renderer.id,
                now.duration_since(renderer.created_at),
                now.duration_since(renderer.last_used)
            );
            renderer.state = HandleState::Retired;
            pool.destroy(renderer);
        }
    }
    debug!("renderer sweep loop exiting");
}
