//! Query orchestration: retrieval-augmented answering with source
//! attribution and a hallucination guard.
//!
//! ```text
//! ask(query) ─► normalize ─► embed ─► search_with_threshold
//!                                         │
//!                     zero hits ──────────┼────────► canned answer
//!                                         ▼          (LLM untouched)
//!                              grounded prompt ─► ChatModel ─► Answer
//! ```

pub mod llm;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::Settings;
use crate::embedding::EmbeddingService;
use crate::normalize::normalize;
use crate::store::{ChunkRecord, MetadataFilter, SqliteVectorStore};
use crate::types::{Result, StashError};

pub use llm::{
    build_grounded_prompt, chat_model_from_settings, ChatModel, CountingChat, OllamaChat,
    OpenAiChat, NO_INFORMATION_ANSWER,
};

/// Coarse answer-quality label derived from distinct source count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Limited,
    None,
}

impl Confidence {
    pub fn from_source_count(count: usize) -> Self {
        match count {
            0 => Confidence::None,
            1 => Confidence::Limited,
            2 => Confidence::Medium,
            _ => Confidence::High,
        }
    }
}

/// One cited source, collapsed from all of its contributing chunks.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub file_type: String,
    pub processing_method: String,
    /// Index of the best-matching chunk of this source.
    pub chunk_index: usize,
    pub chunk_total: usize,
    pub processed_date: String,
    pub excerpt: String,
    /// Cosine distance of the best-matching chunk.
    pub distance: f32,
}

/// A grounded answer with its citations.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SourceRef>,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters_applied: Option<serde_json::Value>,
}

/// Read-side orchestrator. Holds a read-only store handle; many queries
/// may run concurrently, with LLM traffic capped by a semaphore.
pub struct QueryEngine {
    store: Arc<SqliteVectorStore>,
    embeddings: Arc<EmbeddingService>,
    chat: Arc<dyn ChatModel>,
    k: usize,
    fetch_k: usize,
    max_distance: f32,
    llm_permits: Arc<Semaphore>,
    llm_timeout: Duration,
}

impl QueryEngine {
    pub fn new(
        settings: &Settings,
        store: Arc<SqliteVectorStore>,
        embeddings: Arc<EmbeddingService>,
        chat: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            embeddings,
            chat,
            k: settings.retrieval_k,
            fetch_k: settings.retrieval_fetch_k,
            max_distance: settings.retrieval_max_distance,
            llm_permits: Arc::new(Semaphore::new(4)),
            llm_timeout: Duration::from_secs(120),
        }
    }

    /// Cap on concurrent chat model calls (default 4).
    #[must_use]
    pub fn with_llm_concurrency(mut self, permits: usize) -> Self {
        self.llm_permits = Arc::new(Semaphore::new(permits.max(1)));
        self
    }

    #[must_use]
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Answer a question from the knowledge base.
    pub async fn ask(&self, query: &str) -> Result<Answer> {
        self.ask_inner(query, None).await
    }

    /// Answer a question, restricting retrieval by a metadata filter.
    pub async fn ask_filtered(&self, query: &str, filter: &MetadataFilter) -> Result<Answer> {
        self.ask_inner(query, Some(filter)).await
    }

    async fn ask_inner(&self, query: &str, filter: Option<&MetadataFilter>) -> Result<Answer> {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Err(StashError::Input("query is empty".into()));
        }
        let filters_applied = filter.map(MetadataFilter::to_value);

        let embedding = self.embeddings.embed(&normalized).await?;
        let mut hits = self
            .store
            .search_with_threshold(&embedding, self.fetch_k, self.max_distance, filter)
            .await?;
        hits.truncate(self.k);

        if hits.is_empty() {
            // Hallucination guard: with no grounding the generator is
            // never invoked.
            debug!(query = %normalized, "no hits above threshold; returning canned answer");
            return Ok(Answer {
                text: NO_INFORMATION_ANSWER.to_string(),
                sources: Vec::new(),
                confidence: Confidence::None,
                filters_applied,
            });
        }

        let prompt = build_grounded_prompt(&normalized, &hits);
        let text = {
            let _permit = self
                .llm_permits
                .acquire()
                .await
                .map_err(|_| StashError::Concurrency("LLM semaphore closed".into()))?;
            tokio::time::timeout(self.llm_timeout, self.chat.complete(&prompt))
                .await
                .map_err(|_| StashError::ChatBackend("completion timed out".into()))??
        };

        let sources = collapse_sources(&hits);
        let confidence = Confidence::from_source_count(sources.len());
        info!(
            query = %normalized,
            sources = sources.len(),
            ?confidence,
            "answer produced"
        );
        Ok(Answer {
            text,
            sources,
            confidence,
            filters_applied,
        })
    }
}

/// Collapse chunks into one entry per source, keeping each source's
/// best (lowest-distance) chunk for the excerpt, ordered by that
/// distance.
fn collapse_sources(hits: &[(ChunkRecord, f32)]) -> Vec<SourceRef> {
    let mut best: HashMap<&str, (&ChunkRecord, f32)> = HashMap::new();
    for (chunk, distance) in hits {
        let entry = best
            .entry(chunk.metadata.source.as_str())
            .or_insert((chunk, *distance));
        if *distance < entry.1 {
            *entry = (chunk, *distance);
        }
    }

    let mut sources: Vec<SourceRef> = best
        .into_values()
        .map(|(chunk, distance)| SourceRef {
            source: chunk.metadata.source.clone(),
            file_path: chunk.metadata.file_path.clone(),
            file_type: chunk.metadata.file_type.clone(),
            processing_method: chunk.metadata.processing_method.clone(),
            chunk_index: chunk.metadata.chunk_index,
            chunk_total: chunk.metadata.chunk_total,
            processed_date: chunk.metadata.processed_date.clone(),
            excerpt: excerpt_of(&chunk.text),
            distance,
        })
        .collect();
    sources.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    sources
}

/// A short leading slice of the chunk, cut at a character boundary.
fn excerpt_of(text: &str) -> String {
    const EXCERPT_CHARS: usize = 240;
    if text.chars().count() <= EXCERPT_CHARS {
        return text.to_string();
    }
    let cut: String = text.chars().take(EXCERPT_CHARS).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::store::{ChunkMetadata, StoreConfig};

    async fn setup(dir: &std::path::Path) -> (Arc<SqliteVectorStore>, Arc<EmbeddingService>) {
        let settings = Settings {
            vector_db_path: dir.join("vector_store"),
            cache_dir: dir.join("embedding_cache"),
            ..Settings::default()
        };
        let embeddings = Arc::new(
            EmbeddingService::new(
                Arc::new(MockEmbedder::new()),
                &settings.cache_dir,
                settings.memory_cache_capacity,
            )
            .unwrap(),
        );
        let store = Arc::new(
            SqliteVectorStore::open(
                StoreConfig::from_settings(&settings),
                &embeddings.provider_id(),
            )
            .await
            .unwrap(),
        );
        (store, embeddings)
    }

    async fn insert_text(
        store: &SqliteVectorStore,
        embeddings: &EmbeddingService,
        source: &str,
        text: &str,
    ) {
        let vector = embeddings.embed(text).await.unwrap();
        let record = ChunkRecord {
            id: ChunkRecord::fingerprint(source, 0, text),
            text: text.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                file_path: None,
                file_type: "manual_input".into(),
                processed_date: "2026-02-01T00:00:00Z".into(),
                processing_method: "manual_text".into(),
                chunk_index: 0,
                chunk_total: 1,
                titles_count: 0,
                tables_count: 0,
                lists_count: 0,
                oversized: false,
            },
            embedding: Some(vector),
        };
        store.upsert(vec![record]).await.unwrap();
    }

    fn engine(
        store: Arc<SqliteVectorStore>,
        embeddings: Arc<EmbeddingService>,
        chat: Arc<CountingChat>,
    ) -> QueryEngine {
        QueryEngine::new(&Settings::default(), store, embeddings, chat)
    }

    #[tokio::test]
    async fn empty_store_returns_canned_answer_without_llm() {
        let dir = tempfile::tempdir().unwrap();
        let (store, embeddings) = setup(dir.path()).await;
        let chat = Arc::new(CountingChat::new("should never appear"));
        let q = engine(store, embeddings, chat.clone());

        let answer = q.ask("anything at all").await.unwrap();
        assert_eq!(answer.text, NO_INFORMATION_ANSWER);
        assert!(answer.sources.is_empty());
        assert_eq!(answer.confidence, Confidence::None);
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test]
    async fn grounded_question_gets_an_answer_with_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (store, embeddings) = setup(dir.path()).await;
        insert_text(
            &store,
            &embeddings,
            "material_properties",
            "The melting point of titanium is 1668 C.",
        )
        .await;

        let chat = Arc::new(CountingChat::new("Titanium melts at 1668 C."));
        let q = engine(store, embeddings, chat.clone());
        let answer = q.ask("What is the melting point of titanium?").await.unwrap();

        assert!(answer.text.contains("1668"));
        assert_eq!(answer.sources.len(), 1);
        let source = &answer.sources[0];
        assert_eq!(source.source, "material_properties");
        assert_eq!(source.processing_method, "manual_text");
        assert_eq!(source.chunk_index, 0);
        assert_eq!(source.chunk_total, 1);
        assert_eq!(answer.confidence, Confidence::Limited);
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn confidence_scales_with_distinct_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (store, embeddings) = setup(dir.path()).await;
        for i in 0..3 {
            insert_text(
                &store,
                &embeddings,
                &format!("notes_{i}"),
                "The boiling point of water is 100 C.",
            )
            .await;
        }

        let chat = Arc::new(CountingChat::new("Water boils at 100 C."));
        let q = engine(store, embeddings, chat);
        let answer = q.ask("What is the boiling point of water?").await.unwrap();
        assert_eq!(answer.sources.len(), 3);
        assert_eq!(answer.confidence, Confidence::High);
        // Best source first.
        assert!(answer.sources[0].distance <= answer.sources[1].distance);
    }

    #[tokio::test]
    async fn filters_are_echoed_in_the_answer() {
        let dir = tempfile::tempdir().unwrap();
        let (store, embeddings) = setup(dir.path()).await;
        let chat = Arc::new(CountingChat::new("unused"));
        let q = engine(store, embeddings, chat);

        let filter = MetadataFilter::eq("file_type", ".pdf");
        let answer = q.ask_filtered("anything", &filter).await.unwrap();
        assert_eq!(answer.text, NO_INFORMATION_ANSWER);
        assert_eq!(
            answer.filters_applied,
            Some(serde_json::json!({"file_type": ".pdf"}))
        );
    }

    #[test]
    fn confidence_mapping_matches_the_ladder() {
        assert_eq!(Confidence::from_source_count(0), Confidence::None);
        assert_eq!(Confidence::from_source_count(1), Confidence::Limited);
        assert_eq!(Confidence::from_source_count(2), Confidence::Medium);
        assert_eq!(Confidence::from_source_count(3), Confidence::High);
        assert_eq!(Confidence::from_source_count(9), Confidence::High);
    }

    #[test]
    fn excerpts_cut_at_char_boundaries() {
        let short = excerpt_of("short text");
        assert_eq!(short, "short text");

        let long_input = "λ".repeat(500);
        let long = excerpt_of(&long_input);
        assert!(long.chars().count() <= 241);
        assert!(long.ends_with('…'));
    }

    #[tokio::test]
    async fn empty_query_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let (store, embeddings) = setup(dir.path()).await;
        let chat = Arc::new(CountingChat::new("unused"));
        let q = engine(store, embeddings, chat);
        assert!(matches!(q.ask("   ").await, Err(StashError::Input(_))));
    }
}
