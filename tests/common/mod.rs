//! Shared test doubles: an in-process renderer launcher and a scripted
//! page analyzer, so pool and scheduler behavior can be exercised without
//! Chrome or a network.

use anyhow::Result;
use futures::future::BoxFuture;
use std::any::Any;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use xxhash_rust::xxh3::xxh3_64;

use pagelens::errors::AnalyzeError;
use pagelens::renderer_pool::{RendererEngine, RendererLauncher};
use pagelens::scheduler::{PageAnalysis, PageAnalyzer};
use pagelens::{AnalysisPayload, RendererGuard};

/// Fake engine whose probe outcome is controlled by the launcher
pub struct FakeEngine {
    pub id: u64,
    probe_fail: Arc<AtomicBool>,
    closed: Arc<AtomicUsize>,
}

impl RendererEngine for FakeEngine {
    fn probe(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.probe_fail.load(Ordering::Relaxed) {
                anyhow::bail!("probe failed for fake engine {}", self.id)
            }
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.closed.fetch_add(1, Ordering::Relaxed);
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Launcher that hands out fake engines instantly and counts lifecycle
/// events
#[derive(Default)]
pub struct FakeLauncher {
    next_id: AtomicU64,
    /// Successful launches so far
    pub launched: AtomicUsize,
    /// Engines closed so far
    pub closed: Arc<AtomicUsize>,
    /// When set, every engine's probe fails
    pub probe_fail: Arc<AtomicBool>,
    /// Fail this many upcoming launch attempts
    pub fail_launches: AtomicUsize,
}

impl RendererLauncher for FakeLauncher {
    fn launch(&self) -> BoxFuture<'_, Result<Box<dyn RendererEngine>>> {
        Box::pin(async move {
            loop {
                let remaining = self.fail_launches.load(Ordering::Relaxed);
                if remaining == 0 {
                    break;
                }
                if self
                    .fail_launches
                    .compare_exchange(
                        remaining,
                        remaining - 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    anyhow::bail!("fake launch failure");
                }
            }
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            self.launched.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(FakeEngine {
                id,
                probe_fail: Arc::clone(&self.probe_fail),
                closed: Arc::clone(&self.closed),
            }) as Box<dyn RendererEngine>)
        })
    }
}

/// Scripted analyzer: records call order, optionally waits on a gate, and
/// optionally fails every call with a fixed error
#[derive(Default)]
pub struct FakeAnalyzer {
    pub calls: Mutex<Vec<String>>,
    pub gate: Option<Arc<Semaphore>>,
    pub fail_with: Mutex<Option<AnalyzeError>>,
    /// Fixed delay applied to every call
    pub delay: Option<Duration>,
}

impl FakeAnalyzer {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn failing(err: AnalyzeError) -> Self {
        Self {
            fail_with: Mutex::new(Some(err)),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_order(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl PageAnalyzer for FakeAnalyzer {
    fn analyze<'a>(
        &'a self,
        url: &'a str,
        _renderer: &'a RendererGuard,
    ) -> BoxFuture<'a, Result<PageAnalysis, AnalyzeError>> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(url.to_string());

            if let Some(gate) = &self.gate {
                let permit = gate
                    .acquire()
                    .await
                    .map_err(|_| AnalyzeError::Cancelled)?;
                permit.forget();
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.fail_with.lock().unwrap().clone() {
                return Err(err);
            }

            Ok(PageAnalysis {
                content_hash: xxh3_64(url.as_bytes()),
                payload: AnalysisPayload {
                    summary: format!("summary of {url}"),
                    screenshot: None,
                },
            })
        })
    }
}
