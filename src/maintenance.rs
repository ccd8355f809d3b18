//! Out-of-band maintenance: cache hygiene, store statistics, index
//! optimization, and reindexing.
//!
//! Every operation is idempotent and reports before/after state where it
//! applies. Reindex progress is observable through the store's watch
//! channel so a front end can render current/total and the running batch.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::cancel::CancelToken;
use crate::embedding::{CacheStats, EmbeddingService};
use crate::store::{
    OptimizeReport, ReindexProfile, ReindexProgress, ReindexReport, SqliteVectorStore, StoreStats,
};
use crate::types::Result;

/// Cache state before and after a clear.
#[derive(Debug, Clone, Serialize)]
pub struct CacheClearReport {
    pub before: CacheStats,
    pub after: CacheStats,
}

/// Handle bundling the maintainable subsystems.
pub struct MaintenanceOps {
    embeddings: Arc<EmbeddingService>,
    store: Arc<SqliteVectorStore>,
}

impl MaintenanceOps {
    pub fn new(embeddings: Arc<EmbeddingService>, store: Arc<SqliteVectorStore>) -> Self {
        Self { embeddings, store }
    }

    /// Embedding cache counters and capacity.
    pub fn cache_stats(&self) -> CacheStats {
        self.embeddings.stats()
    }

    /// Drop both cache tiers, reporting the state on each side.
    pub async fn clear_cache(&self) -> Result<CacheClearReport> {
        let before = self.embeddings.stats();
        self.embeddings.clear().await?;
        let after = self.embeddings.stats();
        info!(
            entries_before = before.memory_size,
            "embedding cache cleared"
        );
        Ok(CacheClearReport { before, after })
    }

    /// Vector store statistics.
    pub async fn store_stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    /// Reorganize the store for faster queries; dispatches to the
    /// incremental variant for large collections.
    pub async fn optimize_store(&self, cancel: &CancelToken) -> Result<OptimizeReport> {
        self.store.optimize(cancel).await
    }

    /// Rebuild the store's index under the given profile.
    pub async fn reindex_store(
        &self,
        profile: ReindexProfile,
        cancel: &CancelToken,
    ) -> Result<ReindexReport> {
        self.store.reindex(profile, cancel).await
    }

    /// Live reindex progress for UI display.
    pub fn reindex_progress(&self) -> watch::Receiver<ReindexProgress> {
        self.store.reindex_progress()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::embedding::MockEmbedder;
    use crate::store::StoreConfig;

    async fn setup(dir: &std::path::Path) -> MaintenanceOps {
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
        MaintenanceOps::new(embeddings, store)
    }

    #[tokio::test]
    async fn clear_cache_reports_before_and_after() {
        let dir = tempfile::tempdir().unwrap();
        let ops = setup(dir.path()).await;

        ops.embeddings.embed("warm the cache").await.unwrap();
        assert_eq!(ops.cache_stats().memory_size, 1);

        let report = ops.clear_cache().await.unwrap();
        assert_eq!(report.before.memory_size, 1);
        assert_eq!(report.after.memory_size, 0);

        // Idempotent: clearing an empty cache is fine.
        let report = ops.clear_cache().await.unwrap();
        assert_eq!(report.after.memory_size, 0);
    }

    #[tokio::test]
    async fn optimize_on_empty_store_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let ops = setup(dir.path()).await;

        let report = ops.optimize_store(&CancelToken::new()).await.unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.mode, "standard");
    }

    #[tokio::test]
    async fn reindex_on_empty_store_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let ops = setup(dir.path()).await;

        let report = ops
            .reindex_store(ReindexProfile::Auto, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.profile, "small");
        assert_eq!(report.total, 0);
        assert_eq!(report.mode, "standard");
    }
}
