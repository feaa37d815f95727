//! Default renderer engine backed by headless Chrome via chromiumoxide
//!
//! Each instance gets a unique temp profile directory so concurrent
//! instances never contend on a Chrome profile lock. The CDP event handler
//! runs in a spawned task for the life of the instance.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::launcher::{RendererEngine, RendererLauncher};

/// Launcher for pooled Chrome instances
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    /// Run without a visible window (default: true)
    pub headless: bool,
    /// Explicit Chrome binary; when `None` chromiumoxide auto-detects
    pub chrome_executable: Option<PathBuf>,
    /// Viewport size for screenshot capture (default: 1280x720)
    pub window_size: (u32, u32),
    /// CDP request timeout (default: 30s)
    pub request_timeout: Duration,
}

impl Default for ChromeLauncher {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            window_size: (1280, 720),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RendererLauncher for ChromeLauncher {
    fn launch(&self) -> BoxFuture<'_, Result<Box<dyn RendererEngine>>> {
        Box::pin(async move {
            let profile_dir = tempfile::Builder::new()
                .prefix("pagelens-chrome-")
                .tempdir()
                .context("failed to create Chrome profile directory")?;

            let mut config_builder = BrowserConfigBuilder::default()
                .request_timeout(self.request_timeout)
                .window_size(self.window_size.0, self.window_size.1)
                .user_data_dir(profile_dir.path())
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--disable-extensions")
                .arg("--disable-background-networking")
                .arg("--disable-breakpad")
                .arg("--hide-scrollbars")
                .arg("--mute-audio");

            if let Some(path) = &self.chrome_executable {
                config_builder = config_builder.chrome_executable(path);
            }
            if self.headless {
                config_builder = config_builder.headless_mode(HeadlessMode::default());
            } else {
                config_builder = config_builder.with_head();
            }

            let browser_config = config_builder
                .build()
                .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

            let (browser, mut handler) = Browser::launch(browser_config)
                .await
                .context("failed to launch Chrome")?;

            let handler_task = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if let Err(e) = event {
                        let msg = e.to_string();
                        // Chrome emits CDP events chromiumoxide cannot
                        // deserialize; those are noise, not failures
                        if msg.contains("data did not match any variant of untagged enum Message")
                            || msg.contains("Failed to deserialize WS response")
                        {
                            trace!("suppressed benign CDP error: {msg}");
                        } else {
                            warn!("Chrome handler error: {msg}");
                        }
                    }
                }
                debug!("Chrome handler task completed");
            });

            debug!("launched Chrome instance");
            Ok(Box::new(ChromeRenderer {
                browser: Arc::new(browser),
                handler: handler_task,
                profile_dir: Some(profile_dir),
            }) as Box<dyn RendererEngine>)
        })
    }
}

/// One pooled Chrome instance
#[derive(Debug)]
pub struct ChromeRenderer {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
    profile_dir: Option<TempDir>,
}

impl ChromeRenderer {
    /// Shared handle to the underlying browser for page work
    #[must_use]
    pub fn browser(&self) -> Arc<Browser> {
        Arc::clone(&self.browser)
    }
}

impl RendererEngine for ChromeRenderer {
    fn probe(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.browser
                .version()
                .await
                .map(|_| ())
                .context("Chrome liveness probe failed")
        })
    }

    fn close(mut self: Box<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.handler.abort();
            match Arc::get_mut(&mut self.browser) {
                Some(browser) => {
                    if let Err(e) = browser.close().await {
                        warn!("failed to close Chrome gracefully: {e}");
                    }
                    let _ = browser.wait().await;
                }
                None => {
                    // An outstanding Arc means a page task still holds the
                    // browser; the process dies with the handles
                    warn!("Chrome instance has outstanding references, skipping graceful close");
                }
            }
            // TempDir cleanup removes the profile on drop
            drop(self.profile_dir.take());
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
