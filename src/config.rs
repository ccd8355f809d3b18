//! Environment-driven configuration.
//!
//! [`Settings`] gathers every recognized knob in one place and is
//! constructed once at startup, then threaded through the subsystems as
//! borrowed slices of itself. Values come from the process environment
//! (a `.env` file is honored via `dotenvy`); anything unset falls back to
//! the compiled default.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{Result, StashError};

/// Which chat model backend answers queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Local HTTP endpoint (Ollama-compatible).
    Local,
    /// Remote OpenAI-compatible API.
    Remote,
}

/// Which embedding backend computes vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderKind {
    Local,
    Remote,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub model_type: ModelType,
    pub local_model: String,
    pub local_temperature: f32,
    pub remote_api_key: Option<String>,
    pub remote_api_base: String,
    pub remote_model: String,
    pub remote_temperature: f32,

    pub embedding_provider: EmbeddingProviderKind,
    pub embedding_model: String,

    pub collection_name: String,
    pub vector_db_path: PathBuf,
    pub cache_dir: PathBuf,
    pub converted_docs_dir: PathBuf,

    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub retrieval_k: usize,
    pub retrieval_fetch_k: usize,
    pub retrieval_max_distance: f32,

    pub memory_cache_capacity: usize,
    pub large_db_threshold: usize,
    pub incremental_batch_size: usize,
    pub checkpoint_every: usize,
    pub memory_cap_mib: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_type: ModelType::Local,
            local_model: "llama3".to_string(),
            local_temperature: 0.0,
            remote_api_key: None,
            remote_api_base: "https://api.openai.com/v1".to_string(),
            remote_model: "gpt-4o-mini".to_string(),
            remote_temperature: 0.0,
            embedding_provider: EmbeddingProviderKind::Local,
            embedding_model: "all-minilm".to_string(),
            collection_name: "knowledge".to_string(),
            vector_db_path: PathBuf::from("vector_store"),
            cache_dir: PathBuf::from("embedding_cache"),
            converted_docs_dir: PathBuf::from("converted_docs"),
            chunk_size: 1000,
            chunk_overlap: 200,
            retrieval_k: 5,
            retrieval_fetch_k: 10,
            retrieval_max_distance: 0.3,
            memory_cache_capacity: 1024,
            large_db_threshold: 10_000,
            incremental_batch_size: 2_000,
            checkpoint_every: 5_000,
            memory_cap_mib: 2_048,
        }
    }
}

impl Settings {
    /// Build settings from the process environment, loading `.env` first.
    ///
    /// Unset keys keep their defaults; set-but-invalid keys produce a
    /// [`StashError::Config`] naming the offending variable.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut settings = Settings::default();

        if let Some(value) = read("MODEL_TYPE") {
            settings.model_type = match value.to_lowercase().as_str() {
                "local" => ModelType::Local,
                "remote" => ModelType::Remote,
                other => {
                    return Err(StashError::Config(format!(
                        "MODEL_TYPE must be 'local' or 'remote', got '{other}'"
                    )))
                }
            };
        }
        if let Some(value) = read("LOCAL_MODEL") {
            settings.local_model = value;
        }
        if let Some(value) = read("LOCAL_TEMPERATURE") {
            settings.local_temperature = parse_var("LOCAL_TEMPERATURE", &value)?;
        }
        settings.remote_api_key = read("REMOTE_API_KEY");
        if let Some(value) = read("REMOTE_API_BASE") {
            settings.remote_api_base = value;
        }
        if let Some(value) = read("REMOTE_MODEL") {
            settings.remote_model = value;
        }
        if let Some(value) = read("REMOTE_TEMPERATURE") {
            settings.remote_temperature = parse_var("REMOTE_TEMPERATURE", &value)?;
        }

        if let Some(value) = read("EMBEDDING_PROVIDER") {
            settings.embedding_provider = match value.to_lowercase().as_str() {
                "local" => EmbeddingProviderKind::Local,
                "remote" => EmbeddingProviderKind::Remote,
                other => {
                    return Err(StashError::Config(format!(
                        "EMBEDDING_PROVIDER must be 'local' or 'remote', got '{other}'"
                    )))
                }
            };
        }
        if let Some(value) = read("EMBEDDING_MODEL") {
            settings.embedding_model = value;
        }

        if let Some(value) = read("COLLECTION_NAME") {
            settings.collection_name = value;
        }
        if let Some(value) = read("VECTOR_DB_PATH") {
            settings.vector_db_path = PathBuf::from(value);
        }
        if let Some(value) = read("CACHE_DIR") {
            settings.cache_dir = PathBuf::from(value);
        }
        if let Some(value) = read("CONVERTED_DOCS_DIR") {
            settings.converted_docs_dir = PathBuf::from(value);
        }

        if let Some(value) = read("CHUNK_SIZE") {
            settings.chunk_size = parse_var("CHUNK_SIZE", &value)?;
        }
        if let Some(value) = read("CHUNK_OVERLAP") {
            settings.chunk_overlap = parse_var("CHUNK_OVERLAP", &value)?;
        }
        if let Some(value) = read("RETRIEVAL_K") {
            settings.retrieval_k = parse_var("RETRIEVAL_K", &value)?;
        }
        if let Some(value) = read("RETRIEVAL_FETCH_K") {
            settings.retrieval_fetch_k = parse_var("RETRIEVAL_FETCH_K", &value)?;
        }
        if let Some(value) = read("RETRIEVAL_MAX_DISTANCE") {
            settings.retrieval_max_distance = parse_var("RETRIEVAL_MAX_DISTANCE", &value)?;
        }

        if let Some(value) = read("MEMORY_CACHE_CAPACITY") {
            settings.memory_cache_capacity = parse_var("MEMORY_CACHE_CAPACITY", &value)?;
        }
        if let Some(value) = read("LARGE_DB_THRESHOLD") {
            settings.large_db_threshold = parse_var("LARGE_DB_THRESHOLD", &value)?;
        }
        if let Some(value) = read("INCREMENTAL_BATCH_SIZE") {
            settings.incremental_batch_size = parse_var("INCREMENTAL_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read("CHECKPOINT_EVERY") {
            settings.checkpoint_every = parse_var("CHECKPOINT_EVERY", &value)?;
        }
        if let Some(value) = read("MEMORY_CAP_MIB") {
            settings.memory_cap_mib = parse_var("MEMORY_CAP_MIB", &value)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Cross-field sanity checks.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_overlap >= self.chunk_size {
            return Err(StashError::Config(format!(
                "CHUNK_OVERLAP ({}) must be smaller than CHUNK_SIZE ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.retrieval_k == 0 {
            return Err(StashError::Config("RETRIEVAL_K must be at least 1".into()));
        }
        if self.retrieval_fetch_k < self.retrieval_k {
            return Err(StashError::Config(format!(
                "RETRIEVAL_FETCH_K ({}) must be >= RETRIEVAL_K ({})",
                self.retrieval_fetch_k, self.retrieval_k
            )));
        }
        if self.model_type == ModelType::Remote && self.remote_api_key.is_none() {
            return Err(StashError::Config(
                "REMOTE_API_KEY is required when MODEL_TYPE=remote".into(),
            ));
        }
        Ok(())
    }
}

fn read(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| StashError::Config(format!("failed to parse {key}='{raw}': {err}")))
}
