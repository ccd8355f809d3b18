//! Knowledge base façade: the single entry point for ingestion.
//!
//! ```text
//! learn_text ────┐
//! learn_document ┼──► normalize ─► chunk ─► embed (batch) ─► upsert (atomic)
//! learn_from_url ┘                                   │
//!                                                    └─► converted_docs copy
//! ```
//!
//! The façade owns all writes to the vector store; query code holds a
//! read-only handle. Every ingestion is atomic at document granularity:
//! when anything fails mid-pipeline, the store keeps its pre-call row
//! count.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::cancel::CancelToken;
use crate::chunker::{ChunkerConfig, SemanticChunker};
use crate::config::Settings;
use crate::embedding::EmbeddingService;
use crate::loader::{
    self, configs, DocumentLoader, Element, ElementKind, ProcessingMethod, StructuralInfo,
};
use crate::store::{ChunkMetadata, ChunkRecord, SqliteVectorStore, StoreStats};
use crate::types::{Result, StashError};

/// What one ingestion accomplished.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub source: String,
    pub file_type: String,
    pub processing_method: String,
    pub chunk_count: usize,
    pub structural_info: StructuralInfo,
}

/// Ingestion orchestrator over loader, chunker, embeddings, and store.
pub struct KnowledgeBase {
    loader: DocumentLoader,
    chunker: SemanticChunker,
    embeddings: Arc<EmbeddingService>,
    store: Arc<SqliteVectorStore>,
    converted_dir: PathBuf,
    http: reqwest::Client,
}

impl KnowledgeBase {
    pub fn new(
        settings: &Settings,
        embeddings: Arc<EmbeddingService>,
        store: Arc<SqliteVectorStore>,
    ) -> Result<Self> {
        let chunker = SemanticChunker::new(ChunkerConfig {
            chunk_size: settings.chunk_size,
            chunk_overlap: settings.chunk_overlap,
            ..ChunkerConfig::default()
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| StashError::Config(format!("http client: {err}")))?;
        Ok(Self {
            loader: DocumentLoader::new(),
            chunker,
            embeddings,
            store,
            converted_dir: settings.converted_docs_dir.clone(),
            http,
        })
    }

    /// Read-only access to the underlying store, for query construction.
    pub fn store(&self) -> Arc<SqliteVectorStore> {
        Arc::clone(&self.store)
    }

    /// Add a piece of raw text as one synthetic document.
    pub async fn learn_text(&self, text: &str, source_name: &str) -> Result<IngestSummary> {
        let normalized = crate::normalize::normalize(text);
        if normalized.is_empty() {
            return Err(StashError::Input("text is empty after normalization".into()));
        }
        let source = if source_name.trim().is_empty() {
            "manual_input".to_string()
        } else {
            source_name.trim().to_string()
        };

        let elements: Vec<Element> = normalized
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .map(|p| Element::new(ElementKind::NarrativeText, p.trim()))
            .collect();
        let structural_info = StructuralInfo::from_elements(&elements);

        self.ingest(
            source,
            None,
            "manual_input".to_string(),
            ProcessingMethod::ManualText,
            &elements,
            structural_info,
            &CancelToken::new(),
        )
        .await
    }

    /// Load, chunk, embed, and store a document file.
    pub async fn learn_document(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancelToken,
    ) -> Result<IngestSummary> {
        let path = path.as_ref();
        let loaded = self.loader.load(path).await?;
        cancel.check()?;

        let source = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let file_type = loader::file_extension(path);

        self.save_converted_copy(&source, &loaded.elements, loaded.method)
            .await;

        self.ingest(
            source,
            Some(path.to_string_lossy().into_owned()),
            file_type,
            loaded.method,
            &loaded.elements,
            loaded.structural_info,
            cancel,
        )
        .await
    }

    /// Ingest a URL: direct document downloads go through the document
    /// pipeline; everything else is scraped as web text.
    pub async fn learn_from_url(&self, url: &str, cancel: &CancelToken) -> Result<IngestSummary> {
        let parsed =
            Url::parse(url).map_err(|err| StashError::Input(format!("malformed URL: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StashError::Input(format!(
                "unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        match downloadable_extension(&parsed) {
            Some(extension) => self.learn_downloaded_document(&parsed, &extension, cancel).await,
            None => self.learn_web_page(&parsed, cancel).await,
        }
    }

    /// Knowledge base statistics, straight from the store.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    async fn learn_downloaded_document(
        &self,
        url: &Url,
        extension: &str,
        cancel: &CancelToken,
    ) -> Result<IngestSummary> {
        info!(%url, extension, "downloading document from URL");
        let bytes = self.fetch_bytes(url).await?;
        cancel.check()?;

        let file_name = url
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|s| !s.is_empty())
            .unwrap_or("download")
            .to_string();

        let dir = tempfile::tempdir()?;
        let temp_path = dir.path().join(&file_name);
        tokio::fs::write(&temp_path, &bytes).await?;

        let loaded = self.loader.load(&temp_path).await?;
        cancel.check()?;

        self.save_converted_copy(&file_name, &loaded.elements, loaded.method)
            .await;

        self.ingest(
            file_name,
            Some(url.to_string()),
            extension.to_string(),
            loaded.method,
            &loaded.elements,
            loaded.structural_info,
            cancel,
        )
        .await
    }

    async fn learn_web_page(&self, url: &Url, cancel: &CancelToken) -> Result<IngestSummary> {
        info!(%url, "scraping web page");
        let body = self.fetch_text(url).await?;
        cancel.check()?;

        let elements = loader::elements_from_web_text(&body);
        let structural_info = StructuralInfo::from_elements(&elements);
        if elements.is_empty() {
            return Err(StashError::Input(format!(
                "no extractable text at {url}"
            )));
        }

        self.ingest(
            url.to_string(),
            None,
            "url".to_string(),
            ProcessingMethod::Web,
            &elements,
            structural_info,
            cancel,
        )
        .await
    }

    /// The shared tail of every ingestion path. Atomic: embedding happens
    /// before any write, and the upsert is one transaction.
    #[allow(clippy::too_many_arguments)]
    async fn ingest(
        &self,
        source: String,
        file_path: Option<String>,
        file_type: String,
        method: ProcessingMethod,
        elements: &[Element],
        structural_info: StructuralInfo,
        cancel: &CancelToken,
    ) -> Result<IngestSummary> {
        let drafts = self.chunker.chunk(elements);
        if drafts.is_empty() {
            return Err(StashError::Input(format!(
                "no chunkable content in '{source}'"
            )));
        }
        cancel.check()?;

        let texts: Vec<String> = drafts.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embeddings.embed_batch(&texts).await?;
        cancel.check()?;

        let processed_date = Utc::now().to_rfc3339();
        let chunk_total = drafts.len();
        let records: Vec<ChunkRecord> = drafts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(chunk_index, (draft, embedding))| ChunkRecord {
                id: ChunkRecord::fingerprint(&source, chunk_index, &draft.text),
                text: draft.text.clone(),
                metadata: ChunkMetadata {
                    source: source.clone(),
                    file_path: file_path.clone(),
                    file_type: file_type.clone(),
                    processed_date: processed_date.clone(),
                    processing_method: method.as_str().to_string(),
                    chunk_index,
                    chunk_total,
                    titles_count: structural_info.titles_count,
                    tables_count: structural_info.tables_count,
                    lists_count: structural_info.lists_count,
                    oversized: draft.oversized,
                },
                embedding: Some(embedding),
            })
            .collect();

        self.store.upsert(records).await?;
        info!(
            source = %source,
            method = %method,
            chunks = chunk_total,
            "document ingested"
        );

        Ok(IngestSummary {
            source,
            file_type,
            processing_method: method.as_str().to_string(),
            chunk_count: chunk_total,
            structural_info,
        })
    }

    /// Best-effort Markdown copy of the processed document. Failure only
    /// logs; the ingestion itself is unaffected.
    async fn save_converted_copy(
        &self,
        source: &str,
        elements: &[Element],
        method: ProcessingMethod,
    ) {
        let stem = Path::new(source)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(source);
        let file_name = format!("{stem}_{}.md", method.as_str());
        let path = self.converted_dir.join(file_name);
        let markdown = loader::render_markdown(elements);

        let outcome: std::io::Result<()> = async {
            tokio::fs::create_dir_all(&self.converted_dir).await?;
            tokio::fs::write(&path, markdown).await
        }
        .await;
        match outcome {
            Ok(()) => info!(path = %path.display(), "converted copy saved"),
            Err(err) => warn!(error = %err, "could not save converted copy"),
        }
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;
        let bytes = response.bytes().await.map_err(fetch_error)?;
        Ok(bytes.to_vec())
    }

    async fn fetch_text(&self, url: &Url) -> Result<String> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;
        response.text().await.map_err(fetch_error)
    }
}

fn fetch_error(err: reqwest::Error) -> StashError {
    if err.is_timeout() {
        StashError::Input(format!("URL fetch timed out: {err}"))
    } else {
        StashError::Input(format!("URL fetch failed: {err}"))
    }
}

/// The download-vs-scrape predicate: a URL is a direct document download
/// iff its final path segment carries a supported, non-image extension.
fn downloadable_extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.last()?;
    let extension = loader::file_extension(Path::new(last));
    configs::is_downloadable(&extension).then_some(extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbedder;
    use crate::store::StoreConfig;
    use async_trait::async_trait;
    use crate::embedding::EmbeddingProvider;

    async fn make_kb(dir: &Path) -> KnowledgeBase {
        make_kb_with_provider(dir, Arc::new(MockEmbedder::new())).await
    }

    async fn make_kb_with_provider(
        dir: &Path,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> KnowledgeBase {
        let settings = Settings {
            vector_db_path: dir.join("vector_store"),
            cache_dir: dir.join("embedding_cache"),
            converted_docs_dir: dir.join("converted_docs"),
            ..Settings::default()
        };
        let embeddings = Arc::new(
            EmbeddingService::new(provider, &settings.cache_dir, settings.memory_cache_capacity)
                .unwrap(),
        );
        let store = Arc::new(
            SqliteVectorStore::open(StoreConfig::from_settings(&settings), &embeddings.provider_id())
                .await
                .unwrap(),
        );
        KnowledgeBase::new(&settings, embeddings, store).unwrap()
    }

    #[tokio::test]
    async fn learn_text_populates_manual_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let kb = make_kb(dir.path()).await;

        let summary = kb
            .learn_text(
                "The melting point of titanium is 1668 C.",
                "material_properties",
            )
            .await
            .unwrap();

        assert_eq!(summary.source, "material_properties");
        assert_eq!(summary.file_type, "manual_input");
        assert_eq!(summary.processing_method, "manual_text");
        assert_eq!(summary.chunk_count, 1);
        assert_eq!(kb.stats().await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let kb = make_kb(dir.path()).await;
        assert!(kb.learn_text("   \n  ", "empty").await.is_err());
    }

    #[tokio::test]
    async fn learn_document_ingests_and_saves_a_copy() {
        let dir = tempfile::tempdir().unwrap();
        let kb = make_kb(dir.path()).await;

        let doc = dir.path().join("note.md");
        tokio::fs::write(&doc, "# Heading\n\nBody of the note with details.\n")
            .await
            .unwrap();

        let summary = kb
            .learn_document(&doc, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(summary.source, "note.md");
        assert_eq!(summary.file_type, ".md");
        assert_eq!(summary.processing_method, "enhanced");
        assert_eq!(summary.structural_info.titles_count, 1);

        let copy = dir.path().join("converted_docs/note_enhanced.md");
        assert!(copy.exists());
        let body = tokio::fs::read_to_string(copy).await.unwrap();
        assert!(body.contains("## Heading"));
    }

    #[tokio::test]
    async fn reingesting_the_same_document_adds_no_rows() {
        let dir = tempfile::tempdir().unwrap();
        let kb = make_kb(dir.path()).await;
        let doc = dir.path().join("doc.txt");
        tokio::fs::write(&doc, "Stable content that will not change.")
            .await
            .unwrap();

        kb.learn_document(&doc, &CancelToken::new()).await.unwrap();
        let count_after_first = kb.stats().await.unwrap().total;
        kb.learn_document(&doc, &CancelToken::new()).await.unwrap();
        assert_eq!(kb.stats().await.unwrap().total, count_after_first);
    }

    /// Provider that always fails, to prove failed ingestions write
    /// nothing.
    struct BrokenProvider;

    #[async_trait]
    impl EmbeddingProvider for BrokenProvider {
        async fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(StashError::EmbeddingBackend("provider offline".into()))
        }
        fn id(&self) -> String {
            "mock:hash-384".into()
        }
        fn dimension(&self) -> Option<usize> {
            Some(384)
        }
    }

    #[tokio::test]
    async fn failed_ingestion_leaves_count_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let kb = make_kb_with_provider(dir.path(), Arc::new(BrokenProvider)).await;

        let before = kb.stats().await.unwrap().total;
        let err = kb.learn_text("some text", "broken").await.unwrap_err();
        assert!(matches!(err, StashError::EmbeddingBackend(_)));
        assert_eq!(kb.stats().await.unwrap().total, before);
    }

    #[tokio::test]
    async fn cancelled_ingestion_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let kb = make_kb(dir.path()).await;
        let doc = dir.path().join("doc.txt");
        tokio::fs::write(&doc, "Content that will never land.")
            .await
            .unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = kb.learn_document(&doc, &cancel).await.unwrap_err();
        assert!(matches!(err, StashError::Cancelled));
        assert_eq!(kb.stats().await.unwrap().total, 0);
    }

    #[test]
    fn url_predicate_separates_downloads_from_pages() {
        let download = Url::parse("https://example.com/files/report.pdf").unwrap();
        assert_eq!(downloadable_extension(&download), Some(".pdf".into()));

        let page = Url::parse("https://example.com/blog/post").unwrap();
        assert_eq!(downloadable_extension(&page), None);

        // Images over HTTP are scraped, not downloaded.
        let image = Url::parse("https://example.com/photo.png").unwrap();
        assert_eq!(downloadable_extension(&image), None);

        let markdown = Url::parse("https://example.com/docs/readme.md").unwrap();
        assert_eq!(downloadable_extension(&markdown), Some(".md".into()));
    }

    #[tokio::test]
    async fn malformed_urls_are_input_errors() {
        let dir = tempfile::tempdir().unwrap();
        let kb = make_kb(dir.path()).await;
        let err = kb
            .learn_from_url("not a url", &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StashError::Input(_)));

        let err = kb
            .learn_from_url("ftp://example.com/file.pdf", &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StashError::Input(_)));
    }
}
