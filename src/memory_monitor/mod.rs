//! Periodic process-memory sampler
//!
//! Samples this process's resident set against total machine memory and
//! publishes a [`MemoryPressure`] level on a watch channel every interval.
//! On a high-watermark breach it asks the cache to trim and the pool to
//! shrink — advisory calls only, each component mutates its own state.
//! Sampling failures are logged and swallowed; they must never stall
//! scheduling or caching.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache_store::CacheStore;
use crate::config::MemoryMonitorConfig;
use crate::renderer_pool::RendererPool;

/// Pressure level derived from the latest sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryPressure {
    /// Below the low watermark; the scheduler may raise concurrency
    Low,
    #[default]
    Normal,
    /// Above the high watermark; reclamation was requested
    High,
}

/// Periodic sampler that observes and corrects the cache and pool
pub struct MemoryMonitor {
    config: MemoryMonitorConfig,
    cache: Arc<CacheStore>,
    pool: Arc<RendererPool>,
    pressure: watch::Sender<MemoryPressure>,
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl MemoryMonitor {
    pub fn new(
        config: MemoryMonitorConfig,
        cache: Arc<CacheStore>,
        pool: Arc<RendererPool>,
    ) -> Arc<Self> {
        let (pressure, _) = watch::channel(MemoryPressure::Normal);
        Arc::new(Self {
            config,
            cache,
            pool,
            pressure,
            handle: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Start the sampling loop.
    pub async fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            monitor.sample_loop().await;
        });
        *self.handle.lock().await = Some(handle);
    }

    /// Subscribe to pressure updates. Every sample is published, so
    /// subscribers can count consecutive levels.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<MemoryPressure> {
        self.pressure.subscribe()
    }

    /// Latest published pressure level
    #[must_use]
    pub fn pressure(&self) -> MemoryPressure {
        *self.pressure.borrow()
    }

    /// Stop the sampling loop.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
    }

    async fn sample_loop(self: Arc<Self>) {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => pid,
            Err(e) => {
                warn!("memory monitor disabled, cannot resolve own pid: {e}");
                return;
            }
        };
        let mut sys = System::new();
        let mut interval = tokio::time::interval(self.config.sample_interval);

        while !self.shutdown.load(Ordering::Relaxed) {
            interval.tick().await;

            let Some(percent) = sample_process_percent(&mut sys, pid) else {
                warn!("memory sample failed, skipping cycle");
                continue;
            };

            let level = if percent >= self.config.high_watermark_percent {
                MemoryPressure::High
            } else if percent <= self.config.low_watermark_percent {
                MemoryPressure::Low
            } else {
                MemoryPressure::Normal
            };
            debug!("memory sample: {percent:.1}% of machine memory ({level:?})");

            // Publish every sample so subscribers can observe streaks
            self.pressure.send_replace(level);

            if level == MemoryPressure::High {
                let cache_target = self.cache.capacity() / 2;
                let pool_target = (self.pool.config().max_size / 2).max(1);
                warn!(
                    "memory pressure high ({percent:.1}%), trimming cache to {cache_target} \
                     entries and pool to {pool_target} instances"
                );
                self.cache.trim(cache_target);
                self.pool.shrink(pool_target).await;
            }
        }
        debug!("memory monitor loop exiting");
    }
}

/// Resident set of `pid` as a percentage of total machine memory
fn sample_process_percent(sys: &mut System, pid: Pid) -> Option<f32> {
    sys.refresh_memory();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    let total = sys.total_memory();
    if total == 0 {
        return None;
    }
    let used = sys.process(pid)?.memory();
    Some(used as f32 / total as f32 * 100.0)
}
