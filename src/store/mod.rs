//! Durable vector collection: (id, text, embedding, metadata) rows with
//! metadata-filtered nearest-neighbor search.
//!
//! ```text
//!                 ┌───────────────────────────┐
//!                 │    SqliteVectorStore      │
//!                 │  single-writer/multi-     │
//!                 │  reader over sqlite-vec   │
//!                 └─────┬───────────┬─────────┘
//!                       │           │
//!              upsert / delete   search / stats
//!                       │           │
//!              one collection file per provider+model
//! ```
//!
//! Collections embed the provider and model in their physical name, so
//! switching embedding backends can never mix vectors of different
//! dimensions.

pub mod filter;
pub mod reindex;
mod sqlite;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use filter::MetadataFilter;
pub use reindex::{ReindexProfile, ReindexProgress, ReindexReport};
pub use sqlite::{OptimizeReport, SqliteVectorStore, StoreConfig};

use std::collections::BTreeMap;

/// Metadata stored with every chunk.
///
/// Structural counters are serialized under their flattened names so the
/// same keys work in filters and in the persisted JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Extension (".pdf"), or "manual_input" / "url".
    pub file_type: String,
    /// ISO-8601, shared by all chunks of one ingestion.
    pub processed_date: String,
    pub processing_method: String,
    pub chunk_index: usize,
    pub chunk_total: usize,
    #[serde(rename = "structural_info_titles_count")]
    pub titles_count: usize,
    #[serde(rename = "structural_info_tables_count")]
    pub tables_count: usize,
    #[serde(rename = "structural_info_lists_count")]
    pub lists_count: usize,
    #[serde(default)]
    pub oversized: bool,
}

/// One retrieval unit. The embedding is present on the way into the store
/// and absent (not loaded) on the way out of a search.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    /// Stable fingerprint over (source, chunk_index, text).
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub embedding: Option<Vec<f32>>,
}

impl ChunkRecord {
    /// Deterministic chunk identity: identical content at the same
    /// position of the same source always maps to the same id, making
    /// re-ingestion idempotent.
    pub fn fingerprint(source: &str, chunk_index: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk_index.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Aggregate collection statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: usize,
    pub by_file_type: BTreeMap<String, usize>,
    pub by_processing_method: BTreeMap<String, usize>,
    pub total_titles: u64,
    pub total_tables: u64,
    pub avg_titles: f64,
    pub avg_tables: f64,
    pub dimension: Option<usize>,
    pub collection: String,
}

/// Physical collection name: `{base}-{provider}_{model}` with everything
/// outside `[A-Za-z0-9_-]` flattened to `_`.
pub fn collection_name(base: &str, provider_id: &str) -> String {
    let suffix = provider_id.replace(':', "_");
    sanitize(&format!("{base}-{suffix}"))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
