//! Error taxonomy for URL analysis tasks
//!
//! Every failure a task can surface is classified as transient (retried per
//! policy), capacity (degrade gracefully), or permanent (terminal, never
//! retried). The scheduler consults [`AnalyzeError::class`] when deciding
//! whether a failed task goes back into the queue.

use std::time::Duration;
use thiserror::Error;

/// Retry-oriented failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Likely to succeed on a later attempt (timeouts, flaky network,
    /// renderer crash)
    Transient,
    /// Resource limits hit; the task may still complete in degraded form
    Capacity,
    /// Will never succeed; reported to the caller exactly once
    Permanent,
}

/// Failure surfaced by the analysis pipeline
#[derive(Debug, Clone, Error)]
pub enum AnalyzeError {
    /// Task exceeded its deadline or a network operation timed out
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Transient network-level failure (DNS, connection reset, 5xx)
    #[error("network error: {0}")]
    Network(String),

    /// The renderer instance failed mid-task or failed its health check
    #[error("renderer failure: {0}")]
    Renderer(String),

    /// No renderer could be acquired, even after the pool retried creation
    #[error("renderer pool exhausted")]
    PoolExhausted,

    /// Disk tier write failed; the in-memory result is still served
    #[error("cache disk write failed: {0}")]
    CacheWrite(String),

    /// Domain is blocked or absent from a non-empty allowlist
    #[error("domain not allowed: {0}")]
    DomainBlocked(String),

    /// Input could not be parsed into a normalized URL
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    /// Retry budget used up; `last` is the final transient error
    #[error("retry limit exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Task was cancelled before producing a result
    #[error("task cancelled")]
    Cancelled,

    /// The analysis collaborator reported a non-retryable failure
    #[error("analysis failed: {0}")]
    Analysis(String),
}

impl AnalyzeError {
    /// Classify this error for the retry policy.
    ///
    /// `PoolExhausted` is a capacity condition but is still retryable: the
    /// pool may recover once in-flight work releases instances.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::Renderer(_) => ErrorClass::Transient,
            Self::PoolExhausted | Self::CacheWrite(_) => ErrorClass::Capacity,
            Self::DomainBlocked(_)
            | Self::MalformedUrl(_)
            | Self::RetriesExhausted { .. }
            | Self::Cancelled
            | Self::Analysis(_) => ErrorClass::Permanent,
        }
    }

    /// Whether the scheduler may resubmit a task that failed with this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.class() {
            ErrorClass::Transient => true,
            ErrorClass::Capacity => matches!(self, Self::PoolExhausted),
            ErrorClass::Permanent => false,
        }
    }

    /// Stable machine-readable reason code for callers and logs
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::Renderer(_) => "renderer",
            Self::PoolExhausted => "pool_exhausted",
            Self::CacheWrite(_) => "cache_write",
            Self::DomainBlocked(_) => "domain_blocked",
            Self::MalformedUrl(_) => "malformed_url",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::Cancelled => "cancelled",
            Self::Analysis(_) => "analysis",
        }
    }
}

/// Convenience alias for results carrying an [`AnalyzeError`]
pub type AnalyzeResult<T> = Result<T, AnalyzeError>;
