//! ```text
//! Files / text / URLs ──► loader ──► chunker ──► embedding service ──┐
//!                                       │             (two-tier      │
//!                                       │              cache)        ▼
//!                                       │                    SqliteVectorStore
//!                                       │                           │
//! ask / ask_filtered ──► query engine ──┴── search + threshold ─────┤
//!                              │                                    │
//!                              └──► chat model (grounded prompt)    │
//!                                                                   │
//! maintenance ops ──► cache stats/clear · optimize · reindex ◄──────┘
//! ```
//!
//! # Overview
//!
//! `ragstash` is a personal retrieval-augmented knowledge base. Documents
//! are broken into structure-aware chunks, embedded through a cached,
//! provider-pluggable service, and stored in a per-model SQLite
//! collection with metadata-filtered cosine search. Queries retrieve
//! grounding material first and refuse to invoke the language model when
//! nothing relevant exists.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ragstash::{
//!     CancelToken, EmbeddingService, KnowledgeBase, MockEmbedder, QueryEngine,
//!     Settings, SqliteVectorStore, StoreConfig,
//! };
//! use ragstash::query::CountingChat;
//!
//! # async fn run() -> ragstash::Result<()> {
//! let settings = Settings::from_env()?;
//! let embeddings = Arc::new(EmbeddingService::new(
//!     Arc::new(MockEmbedder::new()),
//!     &settings.cache_dir,
//!     settings.memory_cache_capacity,
//! )?);
//! let store = Arc::new(
//!     SqliteVectorStore::open(StoreConfig::from_settings(&settings), &embeddings.provider_id())
//!         .await?,
//! );
//!
//! let kb = KnowledgeBase::new(&settings, Arc::clone(&embeddings), Arc::clone(&store))?;
//! kb.learn_text("The melting point of titanium is 1668 C.", "materials").await?;
//!
//! let chat = Arc::new(CountingChat::new("Titanium melts at 1668 C."));
//! let engine = QueryEngine::new(&settings, store, embeddings, chat);
//! let answer = engine.ask("What is the melting point of titanium?").await?;
//! println!("{} ({:?})", answer.text, answer.confidence);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod kb;
pub mod loader;
pub mod maintenance;
pub mod normalize;
pub mod query;
pub mod store;
pub mod types;

pub use cancel::CancelToken;
pub use chunker::{ChunkDraft, ChunkerConfig, SemanticChunker};
pub use config::{EmbeddingProviderKind, ModelType, Settings};
pub use embedding::{
    embedding_provider_from_settings, CacheStats, EmbeddingProvider, EmbeddingService,
    MockEmbedder, OllamaEmbedder, OpenAiEmbedder,
};
pub use kb::{IngestSummary, KnowledgeBase};
pub use loader::{
    DocumentLoader, Element, ElementKind, LoadedDocument, ProcessingMethod, StructuralInfo,
};
pub use maintenance::{CacheClearReport, MaintenanceOps};
pub use query::{
    chat_model_from_settings, Answer, ChatModel, Confidence, QueryEngine, SourceRef,
    NO_INFORMATION_ANSWER,
};
pub use store::{
    collection_name, ChunkMetadata, ChunkRecord, MetadataFilter, OptimizeReport, ReindexProfile,
    ReindexProgress, ReindexReport, SqliteVectorStore, StoreConfig, StoreStats,
};
pub use types::{Result, StashError};
