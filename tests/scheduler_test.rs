//! Tests for the task scheduler, driven through [`AnalysisManager`] with a
//! fake launcher and a scripted analyzer.

mod common;

use common::{FakeAnalyzer, FakeLauncher};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Semaphore, watch};

use pagelens::cache_store::CacheStore;
use pagelens::config::ManagerConfig;
use pagelens::errors::AnalyzeError;
use pagelens::memory_monitor::MemoryPressure;
use pagelens::renderer_pool::RendererPool;
use pagelens::scheduler::TaskScheduler;
use pagelens::AnalysisManager;

fn base_config(dir: &TempDir) -> ManagerConfig {
    let mut config = ManagerConfig::default();
    config.cache.dir = dir.path().to_path_buf();
    config.cache.preload_count = 0;
    config.scheduler.backoff_base = Duration::from_millis(10);
    config.scheduler.backoff_cap = Duration::from_millis(50);
    config.scheduler.task_deadline = Duration::from_secs(5);
    config
}

async fn manager(
    config: ManagerConfig,
    launcher: Arc<FakeLauncher>,
    analyzer: Arc<FakeAnalyzer>,
) -> AnalysisManager {
    let manager = AnalysisManager::new(config, launcher as _, analyzer as _).unwrap();
    manager.start().await;
    manager
}

#[tokio::test]
async fn test_batch_with_duplicate_renders_once() {
    let dir = TempDir::new().unwrap();
    let analyzer = Arc::new(FakeAnalyzer::default());
    let mgr = manager(
        base_config(&dir),
        Arc::new(FakeLauncher::default()),
        Arc::clone(&analyzer),
    )
    .await;

    let urls = [
        "https://a.com/page-one-long-enough",
        "https://b.com/page-two-long-enough",
        "https://a.com/page-one-long-enough",
    ];
    let outcomes = mgr.submit(&urls).await;

    assert_eq!(outcomes.len(), 3);
    for outcome in &outcomes {
        assert!(outcome.result.is_ok(), "unexpected failure: {outcome:?}");
    }
    // The duplicate resolved from the first result, not a second render
    assert_eq!(analyzer.call_count(), 2);
    let first = outcomes[0].result.as_ref().unwrap();
    let dup = outcomes[2].result.as_ref().unwrap();
    assert!(Arc::ptr_eq(first, dup));

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_cache_hit_short_circuits_second_batch() {
    let dir = TempDir::new().unwrap();
    let analyzer = Arc::new(FakeAnalyzer::default());
    let mgr = manager(
        base_config(&dir),
        Arc::new(FakeLauncher::default()),
        Arc::clone(&analyzer),
    )
    .await;

    let urls = ["https://a.com/cached-page-path"];
    let first = mgr.submit(&urls).await;
    assert!(first[0].result.is_ok());
    assert_eq!(analyzer.call_count(), 1);

    // Different spelling, same normalized key
    let second = mgr.submit(&["http://www.a.com/cached-page-path"]).await;
    assert!(second[0].result.is_ok());
    assert_eq!(analyzer.call_count(), 1);

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_outcomes_preserve_submission_order() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.scheduler.blocked_domains = vec!["blocked.example".to_string()];
    let mgr = manager(
        config,
        Arc::new(FakeLauncher::default()),
        Arc::new(FakeAnalyzer::default()),
    )
    .await;

    let urls = [
        "https://ok.com/first-page-long-path",
        "not a parseable url at all",
        "https://blocked.example/second",
        "https://ok.com/third-page-long-path",
    ];
    let outcomes = mgr.submit(&urls).await;

    assert_eq!(outcomes.len(), 4);
    for (outcome, url) in outcomes.iter().zip(urls.iter()) {
        assert_eq!(outcome.url, *url);
    }
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(
        outcomes[1].result,
        Err(AnalyzeError::MalformedUrl(_))
    ));
    assert!(matches!(
        outcomes[2].result,
        Err(AnalyzeError::DomainBlocked(_))
    ));
    assert!(outcomes[3].result.is_ok());

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_higher_priority_dispatches_first() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.scheduler.concurrency_base = 1;
    config.scheduler.concurrency_floor = 1;
    config.scheduler.concurrency_ceiling = 1;

    let gate = Arc::new(Semaphore::new(0));
    let analyzer = Arc::new(FakeAnalyzer::gated(Arc::clone(&gate)));
    let mgr = Arc::new(
        manager(
            config,
            Arc::new(FakeLauncher::default()),
            Arc::clone(&analyzer),
        )
        .await,
    );

    // Occupy the single slot
    let blocker = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move {
            mgr.submit(&["https://blocker.com/occupies-the-only-slot"])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Queue a generic and a news URL together; the news one must go first
    let batch = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move {
            mgr.submit(&[
                "https://generic.com/low-priority-long-path",
                "https://news.site.com/high-priority-long-path",
            ])
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    gate.add_permits(3);
    blocker.await.unwrap();
    batch.await.unwrap();

    let order = analyzer.call_order();
    assert_eq!(order.len(), 3);
    assert!(order[1].contains("news.site.com"), "order was {order:?}");
    assert!(order[2].contains("generic.com"), "order was {order:?}");

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_aging_prevents_starvation() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.scheduler.concurrency_base = 1;
    config.scheduler.concurrency_floor = 1;
    config.scheduler.concurrency_ceiling = 1;
    config.scheduler.aging_window = Duration::from_millis(100);

    let gate = Arc::new(Semaphore::new(0));
    let analyzer = Arc::new(FakeAnalyzer::gated(Arc::clone(&gate)));
    let mgr = Arc::new(
        manager(
            config,
            Arc::new(FakeLauncher::default()),
            Arc::clone(&analyzer),
        )
        .await,
    );

    let blocker = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move {
            mgr.submit(&["https://blocker.com/occupies-the-only-slot"])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // A low-priority task queues first and waits out a full aging window
    let low = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move {
            mgr.submit(&["https://generic.com/waiting-low-priority-path"])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    // A fresh high-priority task must NOT overtake the aged one
    let high = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move {
            mgr.submit(&["https://news.site.com/fresh-high-priority-path"])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    gate.add_permits(3);
    blocker.await.unwrap();
    low.await.unwrap();
    high.await.unwrap();

    let order = analyzer.call_order();
    assert_eq!(order.len(), 3);
    assert!(order[1].contains("generic.com"), "order was {order:?}");
    assert!(order[2].contains("news.site.com"), "order was {order:?}");

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_transient_failure_retries_up_to_limit() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.scheduler.retry_limit = 2;

    let analyzer = Arc::new(FakeAnalyzer::failing(AnalyzeError::Network(
        "connection reset".to_string(),
    )));
    let mgr = manager(
        config,
        Arc::new(FakeLauncher::default()),
        Arc::clone(&analyzer),
    )
    .await;

    let outcomes = mgr.submit(&["https://flaky.com/some-long-page-path"]).await;

    // Initial attempt plus exactly two retries, then terminal failure
    assert_eq!(analyzer.call_count(), 3);
    match &outcomes[0].result {
        Err(AnalyzeError::RetriesExhausted { attempts, .. }) => assert_eq!(*attempts, 3),
        other => panic!("expected RetriesExhausted, got {other:?}"),
    }

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_permanent_failure_is_never_retried() {
    let dir = TempDir::new().unwrap();
    let analyzer = Arc::new(FakeAnalyzer::failing(AnalyzeError::Analysis(
        "page requires login".to_string(),
    )));
    let mgr = manager(
        base_config(&dir),
        Arc::new(FakeLauncher::default()),
        Arc::clone(&analyzer),
    )
    .await;

    let outcomes = mgr
        .submit(&["https://private.com/some-long-page-path"])
        .await;

    assert_eq!(analyzer.call_count(), 1);
    assert!(matches!(outcomes[0].result, Err(AnalyzeError::Analysis(_))));

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_renderer_failure_replaces_instance() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.scheduler.retry_limit = 1;
    config.pool.max_size = 1;

    let launcher = Arc::new(FakeLauncher::default());
    let analyzer = Arc::new(FakeAnalyzer::failing(AnalyzeError::Renderer(
        "tab crashed".to_string(),
    )));
    let mgr = manager(config, Arc::clone(&launcher), Arc::clone(&analyzer)).await;

    let outcomes = mgr
        .submit(&["https://crashy.com/some-long-page-path"])
        .await;
    assert!(outcomes[0].result.is_err());

    // Each attempt marked its renderer unhealthy, so the retry got a fresh
    // instance rather than the crashed one
    assert_eq!(analyzer.call_count(), 2);
    assert_eq!(launcher.launched.load(std::sync::atomic::Ordering::Relaxed), 2);

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_cancel_queued_task_has_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.scheduler.concurrency_base = 1;
    config.scheduler.concurrency_floor = 1;
    config.scheduler.concurrency_ceiling = 1;

    let gate = Arc::new(Semaphore::new(0));
    let analyzer = Arc::new(FakeAnalyzer::gated(Arc::clone(&gate)));
    let mgr = Arc::new(
        manager(
            config,
            Arc::new(FakeLauncher::default()),
            Arc::clone(&analyzer),
        )
        .await,
    );

    let blocker = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move {
            mgr.submit(&["https://blocker.com/occupies-the-only-slot"])
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let victim_url = "https://victim.com/never-dispatched-path";
    let victim = {
        let mgr = Arc::clone(&mgr);
        tokio::spawn(async move { mgr.submit(&[victim_url]).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(mgr.scheduler().cancel(victim_url));
    gate.add_permits(2);

    blocker.await.unwrap();
    let outcomes = victim.await.unwrap();
    assert!(matches!(outcomes[0].result, Err(AnalyzeError::Cancelled)));
    // Only the blocker ever reached the analyzer
    assert_eq!(analyzer.call_count(), 1);

    mgr.shutdown().await;
}

#[tokio::test]
async fn test_dynamic_limit_follows_memory_pressure() {
    let dir = TempDir::new().unwrap();
    let mut config = base_config(&dir);
    config.scheduler.concurrency_base = 5;
    config.scheduler.concurrency_floor = 3;
    config.scheduler.concurrency_ceiling = 6;
    config.scheduler.low_pressure_streak = 2;

    let cache = CacheStore::new(config.cache.clone()).unwrap();
    let pool = RendererPool::new(config.pool.clone(), Arc::new(FakeLauncher::default()) as _);
    let scheduler = TaskScheduler::new(
        config.scheduler.clone(),
        Arc::clone(&cache),
        Arc::clone(&pool),
        Arc::new(FakeAnalyzer::default()) as _,
    );

    let (tx, rx) = watch::channel(MemoryPressure::Normal);
    scheduler.start(rx).await;
    assert_eq!(scheduler.current_limit(), 5);

    let step = Duration::from_millis(50);

    // Each high-pressure sample steps the limit down, bounded by the floor
    for _ in 0..4 {
        tx.send_replace(MemoryPressure::High);
        tokio::time::sleep(step).await;
    }
    assert_eq!(scheduler.current_limit(), 3);

    // A sustained low streak steps it back up, bounded by the ceiling
    for _ in 0..8 {
        tx.send_replace(MemoryPressure::Low);
        tokio::time::sleep(step).await;
    }
    assert_eq!(scheduler.current_limit(), 6);

    scheduler.shutdown().await;
}
