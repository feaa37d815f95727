//! Scheduled task types and per-URL outcomes

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::priority::MAX_PRIORITY;
use crate::cache_store::AnalysisPayload;
use crate::errors::AnalyzeError;

/// Task lifecycle: `Queued → Dispatched → {Succeeded | Retrying → Queued |
/// Failed}`. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    Dispatched,
    Retrying,
    Succeeded,
    Failed,
}

/// One unit of analysis work for one normalized URL
#[derive(Debug)]
pub struct ScheduledTask {
    pub url: String,
    pub priority: u8,
    /// Kept across retries so aging reflects true waiting time
    pub submitted_at: Instant,
    pub attempt: u32,
    pub state: TaskState,
    pub cancelled: Arc<AtomicBool>,
}

impl ScheduledTask {
    #[must_use]
    pub fn new(url: String, priority: u8) -> Self {
        Self {
            url,
            priority,
            submitted_at: Instant::now(),
            attempt: 0,
            state: TaskState::Queued,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Priority used for dispatch ordering. Each full aging window adds the
    /// whole base-priority range, so a task waiting one window outranks any
    /// fresh task regardless of class.
    #[must_use]
    pub fn effective_priority(&self, now: Instant, aging_window: Duration) -> u64 {
        let waited = now.saturating_duration_since(self.submitted_at);
        let windows = if aging_window.is_zero() {
            0
        } else {
            (waited.as_millis() / aging_window.as_millis()) as u64
        };
        u64::from(self.priority) + windows * u64::from(MAX_PRIORITY)
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Result delivered to every submitter of a URL
pub type UrlResult = Result<Arc<AnalysisPayload>, AnalyzeError>;

/// Per-URL outcome of a batch, in submission order
#[derive(Debug)]
pub struct UrlOutcome {
    /// The URL as the caller submitted it
    pub url: String,
    pub result: UrlResult,
}
