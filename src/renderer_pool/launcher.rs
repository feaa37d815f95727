//! Seam between the pool and the underlying rendering engine
//!
//! The pool only needs to create, probe, and close instances; everything
//! engine-specific stays behind these traits. The render/screenshot
//! collaborator downcasts via [`RendererEngine::as_any`] to reach the
//! concrete engine it was configured with.

use anyhow::Result;
use futures::future::BoxFuture;
use std::any::Any;

/// A live headless rendering engine instance
pub trait RendererEngine: Send + Sync {
    /// Cheap liveness check. An error marks the instance unhealthy; it is
    /// replaced, never repaired.
    fn probe(&self) -> BoxFuture<'_, Result<()>>;

    /// Tear the instance down. Called at most once, after the instance left
    /// the pool.
    fn close(self: Box<Self>) -> BoxFuture<'static, ()>;

    /// Access the concrete engine type
    fn as_any(&self) -> &dyn Any;
}

/// Factory for renderer instances
pub trait RendererLauncher: Send + Sync {
    /// Launch a fresh instance. Expensive; the pool retries once on failure
    /// before surfacing exhaustion to the caller.
    fn launch(&self) -> BoxFuture<'_, Result<Box<dyn RendererEngine>>>;
}
