//! Configuration types for the cache and resource-pool manager
//!
//! Each component owns a small config struct with sensible defaults; the
//! [`ManagerConfig`] aggregate wires them together and is validated once at
//! construction via the builder.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::priority::PriorityRules;

/// Configuration for the two-tier cache store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStoreConfig {
    /// Maximum entries held in the memory tier (default: 100)
    pub capacity: usize,
    /// Time-to-live for entries in both tiers (default: 24 hours)
    pub ttl: Duration,
    /// Directory for the disk tier
    pub dir: PathBuf,
    /// Entries re-warmed from disk at startup (default: 20, 0 disables)
    pub preload_count: usize,
    /// Interval between expiration sweeps (default: 60s)
    pub sweep_interval: Duration,
}

impl Default for CacheStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ttl: Duration::from_secs(24 * 60 * 60),
            dir: PathBuf::from("./pagelens-cache"),
            preload_count: 20,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Configuration for the renderer pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererPoolConfig {
    /// Maximum live instances, Idle plus InUse (default: 4)
    pub max_size: usize,
    /// Instances older than this are retired regardless of load (default: 1h)
    pub max_lifetime: Duration,
    /// Idle instances beyond this are retired by the sweep (default: 5 minutes)
    pub idle_timeout: Duration,
    /// Idle longer than this triggers a liveness probe before handoff
    /// (default: 30s)
    pub probe_staleness: Duration,
    /// Default wait budget for `acquire` (default: 30s)
    pub acquire_timeout: Duration,
    /// Interval between retirement sweeps (default: 5s)
    pub sweep_interval: Duration,
    /// Delay before the single creation retry in `acquire` (default: 500ms)
    pub creation_backoff: Duration,
}

impl Default for RendererPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            max_lifetime: Duration::from_secs(60 * 60),
            idle_timeout: Duration::from_secs(300),
            probe_staleness: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            creation_backoff: Duration::from_millis(500),
        }
    }
}

/// Configuration for the task scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Concurrency limit at startup (default: 5)
    pub concurrency_base: usize,
    /// Lower bound for the dynamic limit (default: 1)
    pub concurrency_floor: usize,
    /// Upper bound for the dynamic limit (default: 20)
    pub concurrency_ceiling: usize,
    /// Consecutive low-pressure samples before raising the limit (default: 3)
    pub low_pressure_streak: u32,
    /// Maximum resubmissions of a transiently failed task (default: 3)
    pub retry_limit: u32,
    /// Backoff is `backoff_base * attempt`, capped (defaults: 2s, 30s)
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Deadline for one dispatch of one task (default: 90s)
    pub task_deadline: Duration,
    /// A task waiting one full window outranks any fresh task (default: 30s)
    pub aging_window: Duration,
    /// Ordered first-match-wins priority rules
    pub priority_rules: PriorityRules,
    /// Host allowlist; empty admits all hosts not blocked
    pub allowed_domains: Vec<String>,
    /// Host blocklist; takes precedence over the allowlist
    pub blocked_domains: Vec<String>,
    /// Scheme prepended to inputs given without one (default: "https")
    pub default_scheme: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_base: 5,
            concurrency_floor: 1,
            concurrency_ceiling: 20,
            low_pressure_streak: 3,
            retry_limit: 3,
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(30),
            task_deadline: Duration::from_secs(90),
            aging_window: Duration::from_secs(30),
            priority_rules: PriorityRules::default(),
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            default_scheme: "https".to_string(),
        }
    }
}

/// Configuration for the memory monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMonitorConfig {
    /// Interval between samples (default: 10s)
    pub sample_interval: Duration,
    /// Process RSS as a percentage of machine memory above which pressure is
    /// High and reclamation is requested (default: 80.0)
    pub high_watermark_percent: f32,
    /// Below this percentage pressure is Low (default: 50.0)
    pub low_watermark_percent: f32,
}

impl Default for MemoryMonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(10),
            high_watermark_percent: 80.0,
            low_watermark_percent: 50.0,
        }
    }
}

/// Aggregate configuration for [`AnalysisManager`](crate::AnalysisManager)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub cache: CacheStoreConfig,
    pub pool: RendererPoolConfig,
    pub scheduler: SchedulerConfig,
    pub memory: MemoryMonitorConfig,
}

impl ManagerConfig {
    /// Start a validated builder
    #[must_use]
    pub fn builder() -> super::builder::ManagerConfigBuilder {
        super::builder::ManagerConfigBuilder::default()
    }
}
