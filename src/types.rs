//! Shared error taxonomy for the knowledge base.
//!
//! Every fallible operation in the crate surfaces a [`StashError`]. The
//! variants mirror the failure domains of the pipeline (input validation,
//! extraction, embedding backends, storage, caching, cancellation,
//! configuration) so callers can branch on kind without string matching.
//! [`StashError::remediation`] carries the user-facing hint rendered by
//! front ends.

use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StashError>;

/// Error kinds surfaced by ingestion, retrieval, and maintenance.
#[derive(Debug, Error)]
pub enum StashError {
    /// Caller supplied something unusable: bad path, malformed URL,
    /// invalid filter expression.
    #[error("invalid input: {0}")]
    Input(String),

    /// The file extension is not in the supported registry.
    #[error("unsupported format '{extension}' for {path}")]
    UnsupportedFormat { extension: String, path: PathBuf },

    /// Every extraction strategy ran and none produced text.
    #[error("no extractable text in {path}")]
    EmptyDocument { path: PathBuf },

    /// A single extraction strategy failed. Only surfaces to callers when
    /// the whole cascade is exhausted.
    #[error("document extraction failed: {0}")]
    Loader(String),

    /// Embedding provider unreachable or returned a malformed vector.
    #[error("embedding backend error: {0}")]
    EmbeddingBackend(String),

    /// Chat model unreachable, timed out, or returned garbage.
    #[error("chat model error: {0}")]
    ChatBackend(String),

    /// Vector store I/O or index failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A batch carried vectors of a different length than the collection.
    #[error("embedding dimension mismatch: collection has {expected}, batch has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Disk cache I/O problem. Recoverable: the service degrades to
    /// memory-only caching for the affected entry.
    #[error("cache error: {0}")]
    Cache(String),

    /// A cooperative cancellation signal was observed.
    #[error("operation cancelled")]
    Cancelled,

    /// Lock acquisition timed out or a concurrency invariant was violated.
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// Missing or unparseable configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StashError {
    /// Stable machine-readable kind, independent of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            StashError::Input(_) => "input",
            StashError::UnsupportedFormat { .. } => "unsupported_format",
            StashError::EmptyDocument { .. } => "empty_document",
            StashError::Loader(_) => "loader",
            StashError::EmbeddingBackend(_) => "embedding_backend",
            StashError::ChatBackend(_) => "chat_backend",
            StashError::Storage(_) => "storage",
            StashError::DimensionMismatch { .. } => "dimension_mismatch",
            StashError::Cache(_) => "cache",
            StashError::Cancelled => "cancelled",
            StashError::Concurrency(_) => "concurrency",
            StashError::Config(_) => "config",
            StashError::Io(_) => "io",
        }
    }

    /// Short remediation hint suitable for direct display.
    pub fn remediation(&self) -> &'static str {
        match self {
            StashError::Input(_) => "check the path, URL, or filter expression and retry",
            StashError::UnsupportedFormat { .. } => {
                "convert the file to one of the supported formats (PDF, Office, markup, text)"
            }
            StashError::EmptyDocument { .. } => {
                "the file may be scanned or image-only; install an OCR toolchain or supply a text version"
            }
            StashError::Loader(_) => "the file may be corrupt; try re-exporting it",
            StashError::EmbeddingBackend(_) => {
                "check that the embedding endpoint is running and the API key is valid"
            }
            StashError::ChatBackend(_) => {
                "check that the language model endpoint is running and reachable"
            }
            StashError::Storage(_) => "check disk space and permissions for the vector store directory",
            StashError::DimensionMismatch { .. } => {
                "the collection was built with a different embedding model; switch models or use a new collection name"
            }
            StashError::Cache(_) => "check permissions on the cache directory; caching continues in memory",
            StashError::Cancelled => "the operation was cancelled; partial work was rolled back",
            StashError::Concurrency(_) => "another writer holds the store; retry once it finishes",
            StashError::Config(_) => "fix the environment variable named in the message",
            StashError::Io(_) => "check the file path and filesystem permissions",
        }
    }

    /// True for errors that leave the system healthy after local handling.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StashError::Cache(_) | StashError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(StashError::Input("x".into()).kind(), "input");
        assert_eq!(
            StashError::DimensionMismatch {
                expected: 384,
                actual: 768
            }
            .kind(),
            "dimension_mismatch"
        );
        assert_eq!(StashError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn every_error_carries_a_hint() {
        let samples = vec![
            StashError::Input("bad".into()),
            StashError::Loader("broken".into()),
            StashError::EmbeddingBackend("down".into()),
            StashError::Storage("full".into()),
            StashError::Cache("denied".into()),
            StashError::Cancelled,
            StashError::Config("CHUNK_SIZE".into()),
        ];
        for err in samples {
            assert!(!err.remediation().is_empty());
        }
    }

    #[test]
    fn cache_errors_are_recoverable() {
        assert!(StashError::Cache("disk".into()).is_recoverable());
        assert!(!StashError::Storage("disk".into()).is_recoverable());
    }
}
