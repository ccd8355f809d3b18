//! Two-tier embedding cache: bounded in-memory LRU in front of a
//! file-per-key disk tier.
//!
//! The memory tier never suspends; the disk tier writes atomically
//! (temp file + rename) and survives restarts. Disk failures degrade the
//! affected entry to memory-only caching and are never fatal.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{Result, StashError};

/// Counters and capacity information reported by `cache_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub memory_size: usize,
    pub memory_capacity: usize,
    pub disk_path: PathBuf,
}

/// The cache itself. Keys are hex SHA-256 strings computed by the service.
pub struct EmbeddingCache {
    dir: PathBuf,
    memory: Mutex<LruCache<String, Vec<f32>>>,
    capacity: usize,
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|err| StashError::Cache(format!("cannot create cache dir: {err}")))?;
        let capacity = capacity.max(1);
        Ok(Self {
            dir,
            memory: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).expect("capacity is at least 1"),
            )),
            capacity,
            memory_hits: AtomicU64::new(0),
            disk_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Memory, then disk, promoting disk hits into memory. Counts a miss
    /// when neither tier has the key.
    pub async fn get(&self, key: &str) -> Option<Vec<f32>> {
        if let Some(vector) = self.memory.lock().get(key).cloned() {
            self.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(vector);
        }

        let path = self.file_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<f32>>(&bytes) {
                Ok(vector) => {
                    self.disk_hits.fetch_add(1, Ordering::Relaxed);
                    self.memory.lock().put(key.to_string(), vector.clone());
                    Some(vector)
                }
                Err(err) => {
                    // Corrupt entry: drop it and treat as a miss.
                    warn!(key, error = %err, "corrupt cache entry removed");
                    let _ = tokio::fs::remove_file(&path).await;
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Memory-only probe for hot paths that must not touch disk.
    pub fn get_memory(&self, key: &str) -> Option<Vec<f32>> {
        self.memory.lock().get(key).cloned()
    }

    /// Like [`get`](Self::get) but without touching the hit/miss counters.
    /// Used for the re-check after coalescing, where the first lookup
    /// already accounted for the request.
    pub async fn peek(&self, key: &str) -> Option<Vec<f32>> {
        if let Some(vector) = self.memory.lock().get(key).cloned() {
            return Some(vector);
        }
        let path = self.file_for(key);
        let bytes = tokio::fs::read(&path).await.ok()?;
        let vector: Vec<f32> = serde_json::from_slice(&bytes).ok()?;
        self.memory.lock().put(key.to_string(), vector.clone());
        Some(vector)
    }

    /// Write-through insert. A failed disk write leaves the entry
    /// memory-only and logs the degradation.
    pub async fn put(&self, key: &str, vector: &[f32]) {
        self.memory.lock().put(key.to_string(), vector.to_vec());

        if let Err(err) = self.write_disk(key, vector).await {
            warn!(key, error = %err, "disk cache write failed; entry is memory-only");
        }
    }

    async fn write_disk(&self, key: &str, vector: &[f32]) -> Result<()> {
        let final_path = self.file_for(key);
        let tmp_path = self.dir.join(format!("{key}.tmp"));
        let payload = serde_json::to_vec(vector)
            .map_err(|err| StashError::Cache(format!("serialize: {err}")))?;
        tokio::fs::write(&tmp_path, payload)
            .await
            .map_err(|err| StashError::Cache(format!("write {}: {err}", tmp_path.display())))?;
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|err| StashError::Cache(format!("rename into place: {err}")))?;
        debug!(key, "embedding persisted to disk cache");
        Ok(())
    }

    /// Drop both tiers. Counters survive so hit-rate history stays visible.
    pub async fn clear(&self) -> Result<()> {
        self.memory.lock().clear();

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|err| StashError::Cache(format!("read cache dir: {err}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StashError::Cache(format!("scan cache dir: {err}")))?
        {
            let path = entry.path();
            let is_cache_file = path
                .extension()
                .map(|e| e == "json" || e == "tmp")
                .unwrap_or(false);
            if is_cache_file {
                if let Err(err) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %err, "failed to remove cache file");
                }
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let memory_hits = self.memory_hits.load(Ordering::Relaxed);
        let disk_hits = self.disk_hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheStats {
            memory_hits,
            disk_hits,
            misses,
            total_requests: memory_hits + disk_hits + misses,
            memory_size: self.memory.lock().len(),
            memory_capacity: self.capacity,
            disk_path: self.dir.clone(),
        }
    }

    fn file_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}
