//! Content-addressed two-tier cache with TTL expiration and LRU eviction
//!
//! The memory tier is an LRU-ordered index bounded by entry count; payloads
//! are deduplicated by content hash so distinct URLs serving identical pages
//! share one allocation. Entries evicted while still fresh are written back
//! to the disk tier, which acts as a second chance: a later lookup reloads
//! them into memory. Expiration is lazy at lookup time and enforced in both
//! tiers by a periodic sweep.
//!
//! All index bookkeeping happens under one short-lived lock that is never
//! held across an await; disk writes are spawned off the critical path and
//! can never block a `put`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, info};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

mod disk;
mod entry;

pub use entry::{AnalysisPayload, CacheEntry, CacheStats};

use crate::config::CacheStoreConfig;
use disk::DiskTier;

/// Index structures guarded by the store-wide lock
struct CacheIndex {
    /// Primary index, LRU-ordered by access
    entries: LruCache<String, CacheEntry>,
    /// Secondary index for payload deduplication. Weak so a payload is freed
    /// once every key referencing it is gone.
    by_hash: HashMap<u64, Weak<AnalysisPayload>>,
}

impl CacheIndex {
    /// Pick and remove the next eviction victim: any expired entry first,
    /// otherwise the least recently used.
    fn pop_victim(&mut self, now: DateTime<Utc>) -> Option<CacheEntry> {
        let expired_key = self
            .entries
            .iter()
            .find(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone());
        if let Some(key) = expired_key {
            return self.entries.pop(&key);
        }
        self.entries.pop_lru().map(|(_, e)| e)
    }

    /// Share an already-resident payload when the content hash matches,
    /// otherwise register this entry's payload for future sharing.
    fn dedup(&mut self, entry: CacheEntry) -> CacheEntry {
        match self.by_hash.get(&entry.content_hash).and_then(Weak::upgrade) {
            Some(shared) => {
                let size_bytes = shared.size_bytes();
                CacheEntry {
                    payload: shared,
                    size_bytes,
                    ..entry
                }
            }
            None => {
                self.by_hash
                    .insert(entry.content_hash, Arc::downgrade(&entry.payload));
                entry
            }
        }
    }

    fn prune_dead_hashes(&mut self) {
        self.by_hash.retain(|_, weak| weak.strong_count() > 0);
    }
}

/// Content-addressed key/value store with memory and disk tiers
pub struct CacheStore {
    config: CacheStoreConfig,
    index: Mutex<CacheIndex>,
    disk: DiskTier,
    sweep_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl CacheStore {
    /// Create a store; the disk tier directory is created if missing.
    pub fn new(config: CacheStoreConfig) -> anyhow::Result<Arc<Self>> {
        let disk = DiskTier::new(config.dir.clone())?;
        Ok(Arc::new(Self {
            config,
            index: Mutex::new(CacheIndex {
                entries: LruCache::unbounded(),
                by_hash: HashMap::new(),
            }),
            disk,
            sweep_handle: tokio::sync::Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }))
    }

    /// Start the expiration sweep and kick off the startup preload.
    pub async fn start(self: &Arc<Self>) {
        if self.config.preload_count > 0 {
            let store = Arc::clone(self);
            tokio::spawn(async move {
                store.preload(store.config.preload_count).await;
            });
        }

        let store = Arc::clone(self);
        let handle = tokio::spawn(async move {
            sweep_loop(store).await;
        });
        *self.sweep_handle.lock().await = Some(handle);
    }

    /// Look up a key, refreshing its LRU position on a hit.
    ///
    /// An expired entry is a miss even before the sweep removes it. On a
    /// memory miss the disk tier is consulted and a hit is promoted back
    /// into memory.
    pub async fn lookup(&self, key: &str) -> Option<Arc<AnalysisPayload>> {
        let now = Utc::now();
        {
            let mut idx = self.index.lock();
            match idx.entries.peek(key).map(|e| e.is_expired(now)) {
                Some(true) => {
                    idx.entries.pop(key);
                }
                Some(false) => {
                    if let Some(entry) = idx.entries.get_mut(key) {
                        entry.last_accessed = now;
                        return Some(Arc::clone(&entry.payload));
                    }
                }
                None => {}
            }
        }

        // Second chance from the disk tier
        let mut entry = self.disk.load(key).await?;
        if entry.is_expired(now) {
            return None;
        }
        entry.last_accessed = now;
        let payload = Arc::clone(&entry.payload);
        self.admit(entry, now);
        Some(payload)
    }

    /// Insert or replace an entry.
    ///
    /// A put of the same key with the same content hash only refreshes the
    /// access timestamp (payloads are immutable once written). A new key
    /// whose content hash is already resident links to the existing payload
    /// instead of duplicating it. Returns without waiting for the disk
    /// mirror.
    pub fn put(&self, key: &str, content_hash: u64, payload: Arc<AnalysisPayload>) {
        let now = Utc::now();
        let mirrored;
        let mut write_back = Vec::new();
        {
            let mut idx = self.index.lock();
            if let Some(existing) = idx.entries.get_mut(key)
                && existing.content_hash == content_hash
                && !existing.is_expired(now)
            {
                existing.last_accessed = now;
                return;
            }

            let size_bytes = payload.size_bytes();
            let entry = idx.dedup(CacheEntry {
                key: key.to_string(),
                content_hash,
                payload,
                created_at: now,
                expires_at: now + ttl_delta(&self.config),
                last_accessed: now,
                size_bytes,
            });
            mirrored = entry.clone();
            idx.entries.put(key.to_string(), entry);

            while idx.entries.len() > self.config.capacity {
                match idx.pop_victim(now) {
                    Some(victim) if !victim.is_expired(now) => write_back.push(victim),
                    Some(_) => {}
                    None => break,
                }
            }
        }

        self.disk.store(&mirrored);
        for victim in &write_back {
            debug!("evicting {} to disk tier", victim.key);
            self.disk.store(victim);
        }
    }

    /// Remove a key from both tiers. Returns whether it was in memory.
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = {
            let mut idx = self.index.lock();
            let removed = idx.entries.pop(key).is_some();
            idx.prune_dead_hashes();
            removed
        };
        self.disk.remove(key).await;
        removed
    }

    /// Drop every entry from both tiers.
    pub async fn clear(&self) {
        {
            let mut idx = self.index.lock();
            idx.entries.clear();
            idx.by_hash.clear();
        }
        self.disk.clear().await;
    }

    /// Re-warm up to `count` most recently accessed disk entries into
    /// memory. Best effort; existing memory entries are never displaced by
    /// stale disk state.
    pub async fn preload(&self, count: usize) {
        let now = Utc::now();
        let entries = self.disk.preload(count, now).await;
        if entries.is_empty() {
            return;
        }
        info!("preloading {} cache entries from disk", entries.len());
        // Insert oldest first so the most recently accessed end up MRU
        for entry in entries.into_iter().rev() {
            self.admit(entry, now);
        }
    }

    /// Evict down to `target` entries, writing fresh victims back to disk.
    /// Called by the memory monitor under pressure.
    pub fn trim(&self, target: usize) {
        let now = Utc::now();
        let mut write_back = Vec::new();
        {
            let mut idx = self.index.lock();
            while idx.entries.len() > target {
                match idx.pop_victim(now) {
                    Some(victim) if !victim.is_expired(now) => write_back.push(victim),
                    Some(_) => {}
                    None => break,
                }
            }
            idx.prune_dead_hashes();
        }
        if !write_back.is_empty() {
            debug!("trimmed {} entries to the disk tier", write_back.len());
        }
        for victim in &write_back {
            self.disk.store(victim);
        }
    }

    /// Remove expired entries from both tiers and collect orphaned
    /// screenshot artifacts.
    pub async fn sweep_now(&self) {
        let now = Utc::now();
        {
            let mut idx = self.index.lock();
            let expired: Vec<String> = idx
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                idx.entries.pop(key);
            }
            idx.prune_dead_hashes();
            if !expired.is_empty() {
                debug!("swept {} expired entries from memory", expired.len());
            }
        }
        self.disk.sweep(now).await;
    }

    /// Entry counts and deduplicated payload bytes
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let idx = self.index.lock();
        let mut stats = CacheStats::default();
        let mut seen = HashSet::new();
        for (_, entry) in idx.entries.iter() {
            stats.total += 1;
            if entry.is_expired(now) {
                stats.expired += 1;
            } else {
                stats.valid += 1;
            }
            if seen.insert(entry.content_hash) {
                stats.payload_bytes += entry.size_bytes;
            }
        }
        stats
    }

    /// Entries currently in the memory tier
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.lock().entries.is_empty()
    }

    /// Configured memory-tier capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Stop the sweep task.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            handle.abort();
        }
    }

    /// Insert an entry loaded from disk, deduplicating against resident
    /// payloads. Does not mirror back to disk (the entry came from there).
    fn admit(&self, entry: CacheEntry, now: DateTime<Utc>) {
        let mut write_back = Vec::new();
        {
            let mut idx = self.index.lock();
            if idx.entries.contains(&entry.key) {
                return;
            }
            let entry = idx.dedup(entry);
            idx.entries.put(entry.key.clone(), entry);
            while idx.entries.len() > self.config.capacity {
                match idx.pop_victim(now) {
                    Some(victim) if !victim.is_expired(now) => write_back.push(victim),
                    Some(_) => {}
                    None => break,
                }
            }
        }
        for victim in &write_back {
            self.disk.store(victim);
        }
    }
}

fn ttl_delta(config: &CacheStoreConfig) -> ChronoDuration {
    ChronoDuration::seconds(config.ttl.as_secs().min(i64::MAX as u64) as i64)
}

async fn sweep_loop(store: Arc<CacheStore>) {
    let mut interval = tokio::time::interval(store.config.sweep_interval);
    while !store.shutdown.load(Ordering::Relaxed) {
        interval.tick().await;
        store.sweep_now().await;
    }
    debug!("cache sweep loop exiting");
}
