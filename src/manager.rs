//! Explicit lifecycle context wiring the four components together
//!
//! Nothing here is ambient: the cache, pool, monitor, and scheduler are
//! constructed once, injected into each other, and torn down in dependency
//! order. Multiple independent managers can coexist in one process.

use anyhow::Result;
use std::sync::Arc;

use crate::cache_store::CacheStore;
use crate::config::ManagerConfig;
use crate::memory_monitor::MemoryMonitor;
use crate::renderer_pool::{RendererLauncher, RendererPool};
use crate::scheduler::{PageAnalyzer, TaskScheduler, UrlOutcome};

/// Owns the cache, renderer pool, memory monitor, and scheduler
pub struct AnalysisManager {
    cache: Arc<CacheStore>,
    pool: Arc<RendererPool>,
    monitor: Arc<MemoryMonitor>,
    scheduler: Arc<TaskScheduler>,
}

impl AnalysisManager {
    /// Construct all components without starting background work.
    ///
    /// The renderer launcher and page analyzer are the two collaborator
    /// seams: production code passes
    /// [`ChromeLauncher`](crate::renderer_pool::ChromeLauncher) and its
    /// fetch/extraction layer, tests pass fakes.
    pub fn new(
        config: ManagerConfig,
        launcher: Arc<dyn RendererLauncher>,
        analyzer: Arc<dyn PageAnalyzer>,
    ) -> Result<Self> {
        let cache = CacheStore::new(config.cache.clone())?;
        let pool = RendererPool::new(config.pool.clone(), launcher);
        let monitor = MemoryMonitor::new(
            config.memory.clone(),
            Arc::clone(&cache),
            Arc::clone(&pool),
        );
        let scheduler = TaskScheduler::new(
            config.scheduler.clone(),
            Arc::clone(&cache),
            Arc::clone(&pool),
            analyzer,
        );

        Ok(Self {
            cache,
            pool,
            monitor,
            scheduler,
        })
    }

    /// Start background tasks: cache sweep and preload, pool sweep, memory
    /// sampling, dispatcher, and concurrency adjuster.
    pub async fn start(&self) {
        self.cache.start().await;
        self.pool.start().await;
        self.monitor.start().await;
        self.scheduler.start(self.monitor.subscribe()).await;
    }

    /// Analyze a batch of URLs; one outcome per input, in submission order.
    pub async fn submit<S: AsRef<str>>(&self, urls: &[S]) -> Vec<UrlOutcome> {
        self.scheduler.submit(urls).await
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<RendererPool> {
        &self.pool
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn memory_monitor(&self) -> &Arc<MemoryMonitor> {
        &self.monitor
    }

    /// Drain in-flight work and release every resource.
    ///
    /// The scheduler drains first so no task can need a renderer after the
    /// pool is gone.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.monitor.shutdown().await;
        self.pool.shutdown().await;
        self.cache.shutdown().await;
    }
}
