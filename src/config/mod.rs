//! Configuration for the cache and resource-pool manager

pub mod builder;
pub mod types;

pub use builder::ManagerConfigBuilder;
pub use types::{
    CacheStoreConfig, ManagerConfig, MemoryMonitorConfig, RendererPoolConfig, SchedulerConfig,
};
