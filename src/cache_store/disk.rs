//! Disk tier: one JSON metadata file per entry plus a content-hash-named
//! screenshot sidecar
//!
//! The memory tier is authoritative; everything here is best effort. Writes
//! are atomic (temp file in the cache dir, then rename) so a concurrent
//! restart never observes a partial entry, and unparseable files are deleted
//! on read rather than surfaced as errors.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use xxhash_rust::xxh3::xxh3_64;

use super::entry::{AnalysisPayload, CacheEntry};

/// Serialized metadata for one disk entry. Screenshot bytes live in the
/// sidecar, keyed by content hash so identical pages share one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiskEntry {
    key: String,
    content_hash: u64,
    summary: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    size_bytes: usize,
    has_screenshot: bool,
}

impl DiskEntry {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            content_hash: entry.content_hash,
            summary: entry.payload.summary.clone(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            last_accessed: entry.last_accessed,
            size_bytes: entry.size_bytes,
            has_screenshot: entry.payload.screenshot.is_some(),
        }
    }
}

pub(crate) struct DiskTier {
    dir: PathBuf,
}

impl DiskTier {
    pub(crate) fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{:016x}.json", xxh3_64(key.as_bytes())))
    }

    fn sidecar_path(&self, content_hash: u64) -> PathBuf {
        self.dir.join(format!("{content_hash:016x}.shot"))
    }

    /// Mirror an entry to disk without blocking the caller.
    ///
    /// Failures are logged and swallowed; they must never fail a `put`.
    pub(crate) fn store(&self, entry: &CacheEntry) {
        let json_path = self.entry_path(&entry.key);
        let shot_path = self.sidecar_path(entry.content_hash);
        let meta = DiskEntry::from_entry(entry);
        let payload = Arc::clone(&entry.payload);
        let key = entry.key.clone();

        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                write_entry(&json_path, &shot_path, &meta, &payload)
            })
            .await;
            match result {
                Ok(Ok(())) => debug!("mirrored cache entry to disk: {key}"),
                Ok(Err(e)) => warn!("cache disk write failed for {key}: {e:#}"),
                Err(e) => warn!("cache disk write task panicked for {key}: {e}"),
            }
        });
    }

    /// Load an entry from disk, deleting it if it cannot be parsed.
    pub(crate) async fn load(&self, key: &str) -> Option<CacheEntry> {
        let json_path = self.entry_path(key);
        let dir = self.dir.clone();
        let key = key.to_string();

        let result =
            tokio::task::spawn_blocking(move || read_entry(&dir, &json_path, &key)).await;
        match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!("cache disk read task panicked: {e}");
                None
            }
        }
    }

    /// Remove the metadata file for a key. The screenshot sidecar may still
    /// be referenced by another key and is left for the sweep. Awaited so an
    /// explicit invalidation cannot be resurrected by a racing lookup.
    pub(crate) async fn remove(&self, key: &str) {
        let json_path = self.entry_path(key);
        if let Err(e) = tokio::fs::remove_file(&json_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("failed to remove cache file {}: {e}", json_path.display());
        }
    }

    /// Delete every entry and sidecar.
    pub(crate) async fn clear(&self) {
        let dir = self.dir.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            for path in list_files(&dir, &["json", "shot"])? {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
            Ok(())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("failed to clear disk cache: {e:#}"),
            Err(e) => warn!("disk cache clear task panicked: {e}"),
        }
    }

    /// Remove expired and corrupt entries, then any screenshot sidecars no
    /// longer referenced by a surviving entry.
    pub(crate) async fn sweep(&self, now: DateTime<Utc>) {
        let dir = self.dir.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<()> {
            let mut live_hashes = HashSet::new();

            for path in list_files(&dir, &["json"])? {
                match parse_entry_file(&path) {
                    Some(meta) if meta.expires_at > now => {
                        live_hashes.insert(meta.content_hash);
                    }
                    // expired or corrupt
                    _ => {
                        if let Err(e) = fs::remove_file(&path) {
                            warn!("sweep failed to remove {}: {e}", path.display());
                        }
                    }
                }
            }

            for path in list_files(&dir, &["shot"])? {
                let referenced = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| u64::from_str_radix(s, 16).ok())
                    .is_some_and(|hash| live_hashes.contains(&hash));
                if !referenced && let Err(e) = fs::remove_file(&path) {
                    warn!("sweep failed to remove orphan {}: {e}", path.display());
                }
            }
            Ok(())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("disk cache sweep failed: {e:#}"),
            Err(e) => warn!("disk cache sweep task panicked: {e}"),
        }
    }

    /// Read up to `count` unexpired entries, most recently accessed first.
    pub(crate) async fn preload(&self, count: usize, now: DateTime<Utc>) -> Vec<CacheEntry> {
        if count == 0 {
            return Vec::new();
        }
        let dir = self.dir.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<Vec<CacheEntry>> {
            let mut metas: Vec<DiskEntry> = list_files(&dir, &["json"])?
                .iter()
                .filter_map(|path| parse_entry_file(path))
                .filter(|meta| meta.expires_at > now)
                .collect();
            metas.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
            metas.truncate(count);

            Ok(metas
                .into_iter()
                .map(|meta| assemble_entry(&dir, meta))
                .collect())
        })
        .await;
        match result {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                warn!("cache preload failed: {e:#}");
                Vec::new()
            }
            Err(e) => {
                warn!("cache preload task panicked: {e}");
                Vec::new()
            }
        }
    }
}

fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for item in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = item?.path();
        if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.contains(&e))
        {
            files.push(path);
        }
    }
    Ok(files)
}

fn write_entry(
    json_path: &Path,
    shot_path: &Path,
    meta: &DiskEntry,
    payload: &AnalysisPayload,
) -> Result<()> {
    // Sidecar first: a metadata file must never reference a missing artifact
    if let Some(shot) = &payload.screenshot
        && !shot_path.exists()
    {
        write_atomic(shot_path, shot)?;
    }
    let json = serde_json::to_vec(meta).context("failed to serialize cache entry")?;
    write_atomic(json_path, &json)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent directory"))?;
    let mut temp = NamedTempFile::new_in(parent).context("failed to create temp file")?;
    temp.write_all(bytes).context("failed to write temp file")?;
    temp.persist(path)
        .with_context(|| format!("failed to persist {}", path.display()))?;
    Ok(())
}

/// Parse a metadata file, deleting it when corrupt.
fn parse_entry_file(path: &Path) -> Option<DiskEntry> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to read cache file {}: {e}", path.display());
            }
            return None;
        }
    };
    match serde_json::from_slice::<DiskEntry>(&bytes) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!("removing corrupt cache file {}: {e}", path.display());
            let _ = fs::remove_file(path);
            None
        }
    }
}

fn read_entry(dir: &Path, json_path: &Path, key: &str) -> Option<CacheEntry> {
    let meta = parse_entry_file(json_path)?;
    // A stale file from a hash collision is a miss, not a wrong answer
    if meta.key != key {
        return None;
    }
    Some(assemble_entry(dir, meta))
}

fn assemble_entry(dir: &Path, meta: DiskEntry) -> CacheEntry {
    let screenshot = if meta.has_screenshot {
        let shot_path = dir.join(format!("{:016x}.shot", meta.content_hash));
        match fs::read(&shot_path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                // Serve the summary without the screenshot rather than fail
                debug!("screenshot sidecar missing for {}: {e}", meta.key);
                None
            }
        }
    } else {
        None
    };

    let payload = Arc::new(AnalysisPayload {
        summary: meta.summary,
        screenshot,
    });
    let size_bytes = payload.size_bytes();

    CacheEntry {
        key: meta.key,
        content_hash: meta.content_hash,
        payload,
        created_at: meta.created_at,
        expires_at: meta.expires_at,
        last_accessed: meta.last_accessed,
        size_bytes,
    }
}
