//! Tests for the memory monitor, using watermarks at the extremes so the
//! real sampler deterministically reports High or Low.

mod common;

use common::FakeLauncher;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use pagelens::cache_store::CacheStore;
use pagelens::config::{CacheStoreConfig, MemoryMonitorConfig, RendererPoolConfig};
use pagelens::memory_monitor::{MemoryMonitor, MemoryPressure};
use pagelens::renderer_pool::RendererPool;
use pagelens::AnalysisPayload;

fn cache(dir: &TempDir, capacity: usize) -> Arc<CacheStore> {
    CacheStore::new(CacheStoreConfig {
        capacity,
        ttl: Duration::from_secs(60),
        dir: dir.path().to_path_buf(),
        preload_count: 0,
        sweep_interval: Duration::from_secs(3600),
    })
    .unwrap()
}

fn pool(max_size: usize) -> Arc<RendererPool> {
    RendererPool::new(
        RendererPoolConfig {
            max_size,
            sweep_interval: Duration::from_secs(3600),
            ..RendererPoolConfig::default()
        },
        Arc::new(FakeLauncher::default()) as _,
    )
}

fn monitor_config(high: f32, low: f32) -> MemoryMonitorConfig {
    MemoryMonitorConfig {
        sample_interval: Duration::from_millis(30),
        high_watermark_percent: high,
        low_watermark_percent: low,
    }
}

#[tokio::test]
async fn test_high_pressure_trims_cache_and_shrinks_pool() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 10);
    let pool = pool(4);

    for i in 0..10 {
        cache.put(
            &format!("k{i}"),
            i,
            Arc::new(AnalysisPayload {
                summary: format!("p{i}"),
                screenshot: None,
            }),
        );
    }
    for _ in 0..3 {
        let guard = pool.acquire(Duration::from_secs(1)).await.unwrap();
        guard.report_healthy();
        drop(guard);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // One guard held across the breach: shrink must not touch it
    let held = pool.acquire(Duration::from_secs(1)).await.unwrap();

    // A zero high watermark makes any sample a breach
    let monitor = MemoryMonitor::new(monitor_config(0.0, 0.0), Arc::clone(&cache), Arc::clone(&pool));
    monitor.start().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(monitor.pressure(), MemoryPressure::High);
    // Cache trimmed to half capacity, pool to half its cap
    assert!(cache.len() <= 5, "cache len {}", cache.len());
    assert!(
        pool.in_use_count() + pool.idle_count().await <= 2,
        "pool not shrunk"
    );
    assert_eq!(pool.in_use_count(), 1);

    drop(held);
    monitor.shutdown().await;
    pool.shutdown().await;
    cache.shutdown().await;
}

#[tokio::test]
async fn test_low_pressure_is_published() {
    let dir = TempDir::new().unwrap();
    let cache = cache(&dir, 10);
    let pool = pool(2);

    // Watermarks so high the process can never reach them
    let monitor = MemoryMonitor::new(
        monitor_config(99.9, 99.0),
        Arc::clone(&cache),
        Arc::clone(&pool),
    );
    let mut pressure = monitor.subscribe();
    monitor.start().await;

    tokio::time::timeout(Duration::from_secs(2), pressure.changed())
        .await
        .expect("a sample should be published")
        .unwrap();
    assert_eq!(*pressure.borrow(), MemoryPressure::Low);

    // Low pressure requests no reclamation
    assert_eq!(cache.len(), 0);

    monitor.shutdown().await;
    pool.shutdown().await;
    cache.shutdown().await;
}
