//! pagelens: cache and resource-pool manager for concurrent web page
//! analysis
//!
//! URLs discovered by a chat or command front end are expensive to analyze:
//! each one costs a fetch, a headless render, and a summarization pass. This
//! crate makes repeated, concurrent analysis tractable with four cooperating
//! components:
//!
//! - [`CacheStore`]: content-addressed two-tier cache with TTL expiration,
//!   LRU eviction, and write-back to disk
//! - [`RendererPool`]: bounded pool of headless renderer instances with
//!   health checking and reuse
//! - [`TaskScheduler`]: priority-aware dispatch under a dynamic concurrency
//!   limit, with retries and anti-starvation aging
//! - [`MemoryMonitor`]: periodic sampler that trims the cache and shrinks
//!   the pool under memory pressure
//!
//! [`AnalysisManager`] wires them together behind a single `submit` entry
//! point. The fetch/extraction layer and the rendering engine are injected
//! through the [`PageAnalyzer`] and
//! [`RendererLauncher`](renderer_pool::RendererLauncher) seams.

pub mod cache_store;
pub mod config;
pub mod errors;
pub mod manager;
pub mod memory_monitor;
pub mod renderer_pool;
pub mod scheduler;
pub mod utils;

pub use cache_store::{AnalysisPayload, CacheEntry, CacheStats, CacheStore};
pub use config::{
    CacheStoreConfig, ManagerConfig, ManagerConfigBuilder, MemoryMonitorConfig,
    RendererPoolConfig, SchedulerConfig,
};
pub use errors::{AnalyzeError, AnalyzeResult, ErrorClass};
pub use manager::AnalysisManager;
pub use memory_monitor::{MemoryMonitor, MemoryPressure};
pub use renderer_pool::{
    ChromeLauncher, ChromeRenderer, HandleState, PoolError, RendererEngine, RendererGuard,
    RendererLauncher, RendererPool,
};
pub use scheduler::{
    PageAnalysis, PageAnalyzer, PriorityRule, PriorityRules, ScheduledTask, TaskScheduler,
    TaskState, UrlOutcome, UrlPredicate, UrlResult,
};
pub use utils::normalize_url;
