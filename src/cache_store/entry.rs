//! Cache entry and payload types

use chrono::{DateTime, Utc};
use std::sync::Arc;
use xxhash_rust::xxh3::Xxh3;

/// Result of analyzing one page: the text summary plus an optional
/// screenshot. Immutable once stored; distinct keys whose pages hashed to
/// the same content share one `Arc` of this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPayload {
    pub summary: String,
    pub screenshot: Option<Vec<u8>>,
}

impl AnalysisPayload {
    /// Approximate in-memory footprint, used for stats and accounting
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.summary.len() + self.screenshot.as_ref().map_or(0, Vec::len)
    }

    /// Hash of the payload itself. The authoritative content hash comes from
    /// the fetched page body (computed by the analysis layer); this is a
    /// fallback for callers that only have the payload.
    #[must_use]
    pub fn payload_hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(self.summary.as_bytes());
        if let Some(shot) = &self.screenshot {
            hasher.update(shot);
        }
        hasher.digest()
    }
}

/// One live entry in the memory tier
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Normalized-URL key, the primary index
    pub key: String,
    /// Hash of the fetched page body; secondary index for payload dedup
    pub content_hash: u64,
    pub payload: Arc<AnalysisPayload>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Refreshed on every read; drives LRU ordering
    pub last_accessed: DateTime<Utc>,
    pub size_bytes: usize,
}

impl CacheEntry {
    /// Expired entries are logically absent even before the sweep runs
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Counts reported by [`CacheStore::stats`](super::CacheStore::stats)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Entries currently indexed in the memory tier
    pub total: usize,
    /// Entries not yet past their TTL
    pub valid: usize,
    /// Entries past TTL awaiting lazy removal or the sweep
    pub expired: usize,
    /// Bytes of payload held, counting each shared payload once
    pub payload_bytes: usize,
}
