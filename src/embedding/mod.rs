//! Embedding service: deterministic text → vector mapping with a two-tier
//! cache and per-key request coalescing.
//!
//! ```text
//! embed(text) ──► normalize ──► key = sha256(provider, model, text)
//!                    │
//!                    ├── memory LRU hit ──────────────► vector
//!                    ├── disk hit ── promote ─────────► vector
//!                    └── miss ── coalesce ── provider ► write-through ► vector
//! ```
//!
//! Batches split into cached and uncached partitions; the uncached slice
//! goes to the provider in a single call and results are reassembled in
//! input order.

pub mod cache;
pub mod provider;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::normalize::normalize;
use crate::types::Result;

pub use cache::{CacheStats, EmbeddingCache};
pub use provider::{
    embedding_provider_from_settings, EmbeddingProvider, MockEmbedder, OllamaEmbedder,
    OpenAiEmbedder,
};

/// Caching, coalescing front end over an [`EmbeddingProvider`].
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    /// One async mutex per in-flight key; concurrent misses for the same
    /// key serialize here and find the cache warm on re-check.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EmbeddingService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache_dir: impl AsRef<Path>,
        memory_capacity: usize,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            cache: EmbeddingCache::new(cache_dir.as_ref(), memory_capacity)?,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// `"provider:model"` of the wrapped backend.
    pub fn provider_id(&self) -> String {
        self.provider.id()
    }

    /// Declared output dimension, when the provider knows it up front.
    pub fn dimension(&self) -> Option<usize> {
        self.provider.dimension()
    }

    /// Cache key: SHA-256 over provider identity and normalized text.
    pub fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.provider.id().as_bytes());
        hasher.update([0u8]);
        hasher.update(normalize(text).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed_batch(&texts).await?;
        Ok(vectors.pop().expect("one vector for one input"))
    }

    /// Embed a batch, order-preserving. Cached entries are served from the
    /// tiers; the rest go to the provider in one call.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let normalized: Vec<String> = texts.iter().map(|t| normalize(t)).collect();
        let keys: Vec<String> = texts.iter().map(|t| self.cache_key(t)).collect();

        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        for key in &keys {
            results.push(self.cache.get(key).await);
        }

        let missing: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect();
        if missing.is_empty() {
            return Ok(results.into_iter().map(|r| r.expect("all cached")).collect());
        }

        // Lock the missing keys in sorted order (stable order prevents
        // deadlock between overlapping batches), then re-check the cache:
        // another task may have filled an entry while we waited.
        let mut unique_keys: Vec<String> = missing.iter().map(|&i| keys[i].clone()).collect();
        unique_keys.sort();
        unique_keys.dedup();
        let _guards = self.lock_keys(&unique_keys).await;

        let mut still_missing: Vec<usize> = Vec::new();
        for &i in &missing {
            match self.cache.peek(&keys[i]).await {
                Some(vector) => results[i] = Some(vector),
                None => still_missing.push(i),
            }
        }

        if !still_missing.is_empty() {
            // One provider call for every text the cache could not serve.
            // Duplicate texts within the batch collapse to one input.
            let mut unique_inputs: Vec<String> = Vec::new();
            let mut input_index: HashMap<&str, usize> = HashMap::new();
            for &i in &still_missing {
                let key = keys[i].as_str();
                if !input_index.contains_key(key) {
                    input_index.insert(key, unique_inputs.len());
                    unique_inputs.push(normalized[i].clone());
                }
            }

            debug!(
                total = texts.len(),
                uncached = unique_inputs.len(),
                "requesting embeddings from provider"
            );
            let vectors = self.provider.embed_batch(&unique_inputs).await?;

            for &i in &still_missing {
                let key = keys[i].as_str();
                let vector = &vectors[input_index[key]];
                self.cache.put(key, vector).await;
                results[i] = Some(vector.clone());
            }
        }

        Ok(results
            .into_iter()
            .map(|r| r.expect("every slot filled"))
            .collect())
    }

    /// Cache statistics snapshot.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop both cache tiers.
    pub async fn clear(&self) -> Result<()> {
        self.cache.clear().await
    }

    async fn lock_keys(&self, keys: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let slot = {
                let mut map = self.inflight.lock().await;
                Arc::clone(map.entry(key.clone()).or_default())
            };
            guards.push(slot.lock_owned().await);
        }
        // Entries for finished keys are pruned opportunistically; waiters
        // that already cloned the Arc keep their handle.
        let mut map = self.inflight.lock().await;
        map.retain(|_, slot| Arc::strong_count(slot) > 1);
        guards
    }
}
