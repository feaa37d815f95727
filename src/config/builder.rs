//! Fluent builder for [`ManagerConfig`]
//!
//! Out-of-range values are clamped to their documented bounds with a logged
//! warning rather than rejected; only contradictions (floor above ceiling,
//! empty cache directory) fail `build`.

use anyhow::{Result, bail};
use log::warn;
use std::path::PathBuf;
use std::time::Duration;

use super::types::{
    CacheStoreConfig, ManagerConfig, MemoryMonitorConfig, RendererPoolConfig, SchedulerConfig,
};
use crate::scheduler::priority::PriorityRules;

const CACHE_CAPACITY_RANGE: (usize, usize) = (10, 1000);
const CACHE_TTL_RANGE: (Duration, Duration) =
    (Duration::from_secs(5 * 60), Duration::from_secs(7 * 24 * 60 * 60));
const PRELOAD_RANGE: (usize, usize) = (0, 100);
const RETRY_LIMIT_RANGE: (u32, u32) = (0, 10);
const BACKOFF_BASE_RANGE: (Duration, Duration) = (Duration::ZERO, Duration::from_secs(10));
const CONCURRENCY_CEILING_MAX: usize = 100;

fn clamp_usize(name: &str, value: usize, range: (usize, usize)) -> usize {
    let clamped = value.clamp(range.0, range.1);
    if clamped != value {
        warn!("{name} = {value} is out of range, clamping to {clamped}");
    }
    clamped
}

fn clamp_duration(name: &str, value: Duration, range: (Duration, Duration)) -> Duration {
    let clamped = value.clamp(range.0, range.1);
    if clamped != value {
        warn!("{name} = {value:?} is out of range, clamping to {clamped:?}");
    }
    clamped
}

fn clamp_percent(name: &str, value: f32) -> f32 {
    let clamped = value.clamp(0.0, 100.0);
    if (clamped - value).abs() > f32::EPSILON {
        warn!("{name} = {value} is out of range, clamping to {clamped}");
    }
    clamped
}

/// Builder for [`ManagerConfig`]
#[derive(Debug, Default)]
pub struct ManagerConfigBuilder {
    cache: CacheStoreConfig,
    pool: RendererPoolConfig,
    scheduler: SchedulerConfig,
    memory: MemoryMonitorConfig,
}

impl ManagerConfigBuilder {
    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache.capacity = capacity;
        self
    }

    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl = ttl;
        self
    }

    #[must_use]
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache.dir = dir.into();
        self
    }

    #[must_use]
    pub fn preload_count(mut self, count: usize) -> Self {
        self.cache.preload_count = count;
        self
    }

    #[must_use]
    pub fn cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn pool_max_size(mut self, max_size: usize) -> Self {
        self.pool.max_size = max_size;
        self
    }

    #[must_use]
    pub fn renderer_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.pool.max_lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn renderer_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.pool.acquire_timeout = timeout;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, base: usize, floor: usize, ceiling: usize) -> Self {
        self.scheduler.concurrency_base = base;
        self.scheduler.concurrency_floor = floor;
        self.scheduler.concurrency_ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.scheduler.retry_limit = limit;
        self
    }

    #[must_use]
    pub fn backoff_base(mut self, base: Duration) -> Self {
        self.scheduler.backoff_base = base;
        self
    }

    #[must_use]
    pub fn task_deadline(mut self, deadline: Duration) -> Self {
        self.scheduler.task_deadline = deadline;
        self
    }

    #[must_use]
    pub fn aging_window(mut self, window: Duration) -> Self {
        self.scheduler.aging_window = window;
        self
    }

    #[must_use]
    pub fn priority_rules(mut self, rules: PriorityRules) -> Self {
        self.scheduler.priority_rules = rules;
        self
    }

    #[must_use]
    pub fn allowed_domains(mut self, domains: Vec<String>) -> Self {
        self.scheduler.allowed_domains = domains;
        self
    }

    #[must_use]
    pub fn blocked_domains(mut self, domains: Vec<String>) -> Self {
        self.scheduler.blocked_domains = domains;
        self
    }

    #[must_use]
    pub fn memory_sample_interval(mut self, interval: Duration) -> Self {
        self.memory.sample_interval = interval;
        self
    }

    #[must_use]
    pub fn memory_watermarks(mut self, high_percent: f32, low_percent: f32) -> Self {
        self.memory.high_watermark_percent = high_percent;
        self.memory.low_watermark_percent = low_percent;
        self
    }

    /// Validate and produce the final configuration.
    ///
    /// # Errors
    ///
    /// Fails when the concurrency floor exceeds the ceiling or the cache
    /// directory is empty.
    pub fn build(self) -> Result<ManagerConfig> {
        let Self {
            mut cache,
            pool,
            mut scheduler,
            mut memory,
        } = self;

        if cache.dir.as_os_str().is_empty() {
            bail!("cache_dir must not be empty");
        }
        if scheduler.concurrency_floor > scheduler.concurrency_ceiling {
            bail!(
                "concurrency floor ({}) exceeds ceiling ({})",
                scheduler.concurrency_floor,
                scheduler.concurrency_ceiling
            );
        }

        cache.capacity = clamp_usize("cache_capacity", cache.capacity, CACHE_CAPACITY_RANGE);
        cache.ttl = clamp_duration("cache_ttl", cache.ttl, CACHE_TTL_RANGE);
        cache.preload_count = clamp_usize("preload_count", cache.preload_count, PRELOAD_RANGE);

        scheduler.concurrency_floor = scheduler.concurrency_floor.max(1);
        scheduler.concurrency_ceiling = clamp_usize(
            "concurrency_ceiling",
            scheduler.concurrency_ceiling,
            (scheduler.concurrency_floor, CONCURRENCY_CEILING_MAX),
        );
        scheduler.concurrency_base = clamp_usize(
            "concurrency_base",
            scheduler.concurrency_base,
            (scheduler.concurrency_floor, scheduler.concurrency_ceiling),
        );
        scheduler.retry_limit = {
            let clamped = scheduler.retry_limit.clamp(RETRY_LIMIT_RANGE.0, RETRY_LIMIT_RANGE.1);
            if clamped != scheduler.retry_limit {
                warn!(
                    "retry_limit = {} is out of range, clamping to {clamped}",
                    scheduler.retry_limit
                );
            }
            clamped
        };
        scheduler.backoff_base =
            clamp_duration("backoff_base", scheduler.backoff_base, BACKOFF_BASE_RANGE);

        memory.high_watermark_percent =
            clamp_percent("memory_high_watermark", memory.high_watermark_percent);
        memory.low_watermark_percent =
            clamp_percent("memory_low_watermark", memory.low_watermark_percent)
                .min(memory.high_watermark_percent);

        Ok(ManagerConfig {
            cache,
            pool,
            scheduler,
            memory,
        })
    }
}
