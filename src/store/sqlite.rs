//! SQLite + sqlite-vec implementation of the vector collection.
//!
//! One database file per collection. Chunks live in a regular table with
//! dedicated columns for every filterable metadata field; embeddings live
//! beside them as float32 blobs and are compared with
//! `vec_distance_cosine` at query time. A `meta` table pins the embedding
//! dimension the moment the first batch arrives.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::Once;

use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio_rusqlite::{ffi, Connection};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::store::reindex::ReindexProgress;
use crate::store::{collection_name, ChunkMetadata, ChunkRecord, MetadataFilter, StoreStats};
use crate::types::{Result, StashError};

/// Knobs the store needs beyond the collection identity.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_name: String,
    pub dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub large_threshold: usize,
    pub incremental_batch_size: usize,
    pub checkpoint_every: usize,
    pub memory_cap_mib: u64,
}

impl StoreConfig {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            base_name: settings.collection_name.clone(),
            dir: settings.vector_db_path.clone(),
            checkpoint_dir: settings
                .vector_db_path
                .join("reindex_checkpoints"),
            large_threshold: settings.large_db_threshold,
            incremental_batch_size: settings.incremental_batch_size,
            checkpoint_every: settings.checkpoint_every,
            memory_cap_mib: settings.memory_cap_mib,
        }
    }
}

/// Persistent, filterable vector collection.
pub struct SqliteVectorStore {
    pub(crate) conn: Connection,
    pub(crate) collection: String,
    pub(crate) db_path: PathBuf,
    pub(crate) config: StoreConfig,
    /// Single-writer / multi-reader policy. Writers (upsert, delete,
    /// optimize, reindex) take the write half; searches and stats share
    /// the read half.
    pub(crate) lock: RwLock<()>,
    pub(crate) progress_tx: watch::Sender<ReindexProgress>,
}

/// Result of an optimize run.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizeReport {
    /// "standard" or "incremental".
    pub mode: String,
    pub total: usize,
    pub stats_before: StoreStats,
    pub stats_after: StoreStats,
}

impl SqliteVectorStore {
    /// Open (or create) the collection for `provider_id` under the
    /// configured directory.
    pub async fn open(config: StoreConfig, provider_id: &str) -> Result<Self> {
        register_sqlite_vec()?;
        std::fs::create_dir_all(&config.dir)?;
        std::fs::create_dir_all(&config.checkpoint_dir)?;

        let collection = collection_name(&config.base_name, provider_id);
        let db_path = config.dir.join(format!("{collection}.sqlite3"));
        let conn = Connection::open(&db_path)
            .await
            .map_err(storage_error)?;

        conn.call(|conn| {
            conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "auto_vacuum", "INCREMENTAL")?;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS meta (
                     key   TEXT PRIMARY KEY,
                     value TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS chunks (
                     id                TEXT PRIMARY KEY,
                     source            TEXT NOT NULL,
                     file_path         TEXT,
                     file_type         TEXT NOT NULL,
                     processed_date    TEXT NOT NULL,
                     processing_method TEXT NOT NULL,
                     chunk_index       INTEGER NOT NULL,
                     chunk_total       INTEGER NOT NULL,
                     titles_count      INTEGER NOT NULL DEFAULT 0,
                     tables_count      INTEGER NOT NULL DEFAULT 0,
                     lists_count       INTEGER NOT NULL DEFAULT 0,
                     oversized         INTEGER NOT NULL DEFAULT 0,
                     content           TEXT NOT NULL,
                     metadata          TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source);
                 CREATE INDEX IF NOT EXISTS idx_chunks_file_type ON chunks(file_type);
                 CREATE INDEX IF NOT EXISTS idx_chunks_method ON chunks(processing_method);
                 CREATE TABLE IF NOT EXISTS embeddings (
                     id        TEXT PRIMARY KEY,
                     embedding BLOB NOT NULL
                 );",
            )?;
            Ok(())
        })
        .await
        .map_err(storage_error)?;

        info!(collection = %collection, path = %db_path.display(), "vector store opened");
        let (progress_tx, _) = watch::channel(ReindexProgress::default());
        Ok(Self {
            conn,
            collection,
            db_path,
            config,
            lock: RwLock::new(()),
            progress_tx,
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    /// Observe reindex progress (current/total and the running batch id).
    pub fn reindex_progress(&self) -> watch::Receiver<ReindexProgress> {
        self.progress_tx.subscribe()
    }

    /// Insert a batch of chunks atomically. Either every row lands or the
    /// transaction rolls back; readers never observe a partial document.
    pub async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let batch_dim = records
            .first()
            .and_then(|r| r.embedding.as_ref())
            .map(Vec::len)
            .ok_or_else(|| StashError::Storage("upsert batch missing embeddings".into()))?;
        for record in &records {
            match &record.embedding {
                Some(v) if v.len() == batch_dim => {}
                Some(v) => {
                    return Err(StashError::DimensionMismatch {
                        expected: batch_dim,
                        actual: v.len(),
                    })
                }
                None => {
                    return Err(StashError::Storage(format!(
                        "chunk {} has no embedding",
                        record.id
                    )))
                }
            }
        }

        let _guard = self.lock.write().await;
        let outcome = self
            .conn
            .call(move |conn| {
                let stored_dim = read_dimension(conn)?;
                if let Some(expected) = stored_dim {
                    if expected != batch_dim {
                        return Ok(Err(StashError::DimensionMismatch {
                            expected,
                            actual: batch_dim,
                        }));
                    }
                }

                let tx = conn.transaction()?;
                if stored_dim.is_none() {
                    tx.execute(
                        "INSERT OR REPLACE INTO meta (key, value) VALUES ('dimension', ?1)",
                        [batch_dim.to_string()],
                    )?;
                }
                {
                    let mut chunk_stmt = tx.prepare(
                        "INSERT OR REPLACE INTO chunks
                         (id, source, file_path, file_type, processed_date, processing_method,
                          chunk_index, chunk_total, titles_count, tables_count, lists_count,
                          oversized, content, metadata)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    )?;
                    let mut embed_stmt = tx.prepare(
                        "INSERT OR REPLACE INTO embeddings (id, embedding) VALUES (?1, ?2)",
                    )?;
                    for record in &records {
                        let metadata_json = serde_json::to_string(&record.metadata)
                            .map_err(|err| {
                                rusqlite::Error::ToSqlConversionFailure(Box::new(err))
                            })?;
                        let m = &record.metadata;
                        chunk_stmt.execute(rusqlite::params![
                            record.id,
                            m.source,
                            m.file_path,
                            m.file_type,
                            m.processed_date,
                            m.processing_method,
                            m.chunk_index as i64,
                            m.chunk_total as i64,
                            m.titles_count as i64,
                            m.tables_count as i64,
                            m.lists_count as i64,
                            m.oversized as i64,
                            record.text,
                            metadata_json,
                        ])?;
                        let blob = vector_to_blob(
                            record.embedding.as_ref().expect("validated above"),
                        );
                        embed_stmt.execute(rusqlite::params![record.id, blob])?;
                    }
                }
                tx.commit()?;
                Ok(Ok(records.len()))
            })
            .await
            .map_err(storage_error)?;

        let inserted = outcome?;
        debug!(collection = %self.collection, rows = inserted, "chunks upserted");
        Ok(())
    }

    /// Nearest neighbors by cosine distance, ascending, optionally
    /// restricted by a metadata filter.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(ChunkRecord, f32)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut where_sql = String::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(filter) = filter {
            where_sql.push_str(" WHERE ");
            filter.push_sql(&mut where_sql, &mut params)?;
        }

        let query_json = serde_json::to_string(query_embedding)
            .map_err(|err| StashError::Storage(err.to_string()))?;
        let sql = format!(
            "SELECT c.content, c.metadata, \
                    vec_distance_cosine(e.embedding, vec_f32(?1)) AS distance \
             FROM chunks c JOIN embeddings e ON e.id = c.id{where_sql} \
             ORDER BY distance ASC LIMIT {k}"
        );

        let _guard = self.lock.read().await;
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut all_params: Vec<rusqlite::types::Value> =
                    vec![rusqlite::types::Value::Text(query_json)];
                all_params.extend(params);

                let mapped = stmt.query_map(
                    rusqlite::params_from_iter(all_params),
                    |row| {
                        let content: String = row.get(0)?;
                        let metadata_json: String = row.get(1)?;
                        let distance: f64 = row.get(2)?;
                        Ok((content, metadata_json, distance))
                    },
                )?;

                let mut out = Vec::new();
                for row in mapped {
                    out.push(row?);
                }
                Ok(out)
            })
            .await
            .map_err(storage_error)?;

        let mut results = Vec::with_capacity(rows.len());
        for (content, metadata_json, distance) in rows {
            let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
                .map_err(|err| StashError::Storage(format!("corrupt metadata row: {err}")))?;
            let id = ChunkRecord::fingerprint(&metadata.source, metadata.chunk_index, &content);
            results.push((
                ChunkRecord {
                    id,
                    text: content,
                    metadata,
                    embedding: None,
                },
                distance as f32,
            ));
        }
        Ok(results)
    }

    /// Like [`search`](Self::search) but discards anything farther than
    /// `max_distance`.
    pub async fn search_with_threshold(
        &self,
        query_embedding: &[f32],
        k: usize,
        max_distance: f32,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(ChunkRecord, f32)>> {
        let mut results = self.search(query_embedding, k, filter).await?;
        results.retain(|(_, distance)| *distance <= max_distance);
        Ok(results)
    }

    pub async fn count(&self) -> Result<usize> {
        let _guard = self.lock.read().await;
        self.count_unlocked().await
    }

    pub(crate) async fn count_unlocked(&self) -> Result<usize> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(storage_error)?;
        Ok(count as usize)
    }

    /// Embedding dimension pinned by the first upsert, if any.
    pub async fn dimension(&self) -> Result<Option<usize>> {
        self.conn
            .call(|conn| Ok(read_dimension(conn)?))
            .await
            .map_err(storage_error)
    }

    /// Collection statistics: totals, per-type and per-method breakdowns,
    /// structural aggregates.
    pub async fn stats(&self) -> Result<StoreStats> {
        let _guard = self.lock.read().await;
        self.stats_unlocked().await
    }

    pub(crate) async fn stats_unlocked(&self) -> Result<StoreStats> {
        let collection = self.collection.clone();
        self.conn
            .call(move |conn| {
                let (total, total_titles, total_tables): (i64, i64, i64) = conn.query_row(
                    "SELECT COUNT(*), COALESCE(SUM(titles_count), 0),
                            COALESCE(SUM(tables_count), 0) FROM chunks",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;

                let mut by_file_type = std::collections::BTreeMap::new();
                let mut stmt =
                    conn.prepare("SELECT file_type, COUNT(*) FROM chunks GROUP BY file_type")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (file_type, count) = row?;
                    by_file_type.insert(file_type, count as usize);
                }

                let mut by_processing_method = std::collections::BTreeMap::new();
                let mut stmt = conn.prepare(
                    "SELECT processing_method, COUNT(*) FROM chunks GROUP BY processing_method",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;
                for row in rows {
                    let (method, count) = row?;
                    by_processing_method.insert(method, count as usize);
                }

                let dimension = read_dimension(conn)?;

                let denominator = total.max(1) as f64;
                Ok(StoreStats {
                    total: total as usize,
                    by_file_type,
                    by_processing_method,
                    total_titles: total_titles as u64,
                    total_tables: total_tables as u64,
                    avg_titles: total_titles as f64 / denominator,
                    avg_tables: total_tables as f64 / denominator,
                    dimension,
                    collection,
                })
            })
            .await
            .map_err(storage_error)
    }

    /// Remove every chunk of a logical source. Returns the number of rows
    /// deleted.
    pub async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let source = source.to_string();
        let _guard = self.lock.write().await;
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM embeddings WHERE id IN (SELECT id FROM chunks WHERE source = ?1)",
                    [&source],
                )?;
                let deleted = tx.execute("DELETE FROM chunks WHERE source = ?1", [&source])?;
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(storage_error)?;
        Ok(deleted)
    }

    /// Reorganize on-disk structures for faster queries. Non-destructive:
    /// search results are identical before and after. Collections at or
    /// above the large threshold use the incremental variant.
    pub async fn optimize(&self, cancel: &CancelToken) -> Result<OptimizeReport> {
        let _guard = self.lock.write().await;
        let stats_before = self.stats_unlocked().await?;
        let total = stats_before.total;

        let mode = if total >= self.config.large_threshold {
            self.optimize_incremental(cancel).await?;
            "incremental"
        } else {
            cancel.check()?;
            self.conn
                .call(|conn| {
                    conn.execute_batch("VACUUM; ANALYZE;")?;
                    Ok(())
                })
                .await
                .map_err(storage_error)?;
            "standard"
        };

        let stats_after = self.stats_unlocked().await?;
        info!(collection = %self.collection, mode, total, "optimize complete");
        Ok(OptimizeReport {
            mode: mode.to_string(),
            total,
            stats_before,
            stats_after,
        })
    }

    /// Incremental vacuum in bounded steps with cancellation and memory
    /// checks between rounds.
    async fn optimize_incremental(&self, cancel: &CancelToken) -> Result<()> {
        loop {
            cancel.check()?;
            if crate::store::reindex::resident_memory_mib() > self.config.memory_cap_mib as f64 {
                debug!("memory above soft cap during optimize; shrinking sqlite caches");
                self.conn
                    .call(|conn| {
                        conn.execute_batch("PRAGMA shrink_memory;")?;
                        Ok(())
                    })
                    .await
                    .map_err(storage_error)?;
            }
            let freelist = self
                .conn
                .call(|conn| {
                    conn.execute_batch("PRAGMA incremental_vacuum(512);")?;
                    let freelist: i64 =
                        conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))?;
                    Ok(freelist)
                })
                .await
                .map_err(storage_error)?;
            if freelist == 0 {
                break;
            }
        }
        self.conn
            .call(|conn| {
                conn.execute_batch("ANALYZE;")?;
                Ok(())
            })
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

pub(crate) fn storage_error(err: tokio_rusqlite::Error) -> StashError {
    StashError::Storage(err.to_string())
}

pub(crate) fn read_dimension(
    conn: &rusqlite::Connection,
) -> std::result::Result<Option<usize>, rusqlite::Error> {
    use rusqlite::OptionalExtension;
    let value: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'dimension'", [], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

pub(crate) fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Register the sqlite-vec extension for every future connection.
fn register_sqlite_vec() -> Result<()> {
    use std::sync::Mutex;

    static INIT: Once = Once::new();
    static INIT_RESULT: Mutex<Option<std::result::Result<(), String>>> = Mutex::new(None);

    INIT.call_once(|| {
        let result = unsafe {
            type SqliteExtensionInit = unsafe extern "C" fn(
                *mut ffi::sqlite3,
                *mut *const c_char,
                *const ffi::sqlite3_api_routines,
            ) -> i32;

            let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
            let init_fn: SqliteExtensionInit =
                transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
            let rc = ffi::sqlite3_auto_extension(Some(init_fn));
            if rc != 0 {
                Err(format!("failed to register sqlite-vec extension (code {rc})"))
            } else {
                Ok(())
            }
        };
        *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
    });

    INIT_RESULT
        .lock()
        .expect("init result mutex poisoned")
        .clone()
        .expect("init was called but result not set")
        .map_err(StashError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> StoreConfig {
        StoreConfig {
            base_name: "testkb".into(),
            dir: dir.join("vector_store"),
            checkpoint_dir: dir.join("reindex_checkpoints"),
            large_threshold: 10_000,
            incremental_batch_size: 2_000,
            checkpoint_every: 5_000,
            memory_cap_mib: 2_048,
        }
    }

    fn record(source: &str, index: usize, total: usize, text: &str, dim: usize) -> ChunkRecord {
        let mut embedding = vec![0.0f32; dim];
        // Spread each record to a distinct direction.
        embedding[index % dim] = 1.0;
        ChunkRecord {
            id: ChunkRecord::fingerprint(source, index, text),
            text: text.to_string(),
            metadata: ChunkMetadata {
                source: source.to_string(),
                file_path: None,
                file_type: ".txt".into(),
                processed_date: "2026-02-01T00:00:00Z".into(),
                processing_method: "enhanced".into(),
                chunk_index: index,
                chunk_total: total,
                titles_count: 1,
                tables_count: 0,
                lists_count: 0,
                oversized: false,
            },
            embedding: Some(embedding),
        }
    }

    async fn open_store(dir: &std::path::Path) -> SqliteVectorStore {
        SqliteVectorStore::open(test_config(dir), "mock:hash-8")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upsert_search_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        store
            .upsert(vec![
                record("a.txt", 0, 2, "first chunk", 8),
                record("a.txt", 1, 2, "second chunk", 8),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let mut query = vec![0.0f32; 8];
        query[0] = 1.0;
        let results = store.search(&query, 5, None).await.unwrap();
        assert_eq!(results.len(), 2);
        // Exact match sorts first with distance near zero.
        assert_eq!(results[0].0.text, "first chunk");
        assert!(results[0].1 < 0.001);
        assert!(results[0].1 <= results[1].1);
    }

    #[tokio::test]
    async fn k_larger_than_count_never_pads() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store
            .upsert(vec![record("a.txt", 0, 1, "only chunk", 8)])
            .await
            .unwrap();

        let query = vec![1.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let results = store.search(&query, 50, None).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn filters_restrict_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let mut pdf = record("report.pdf", 0, 1, "pdf content", 8);
        pdf.metadata.file_type = ".pdf".into();
        pdf.metadata.tables_count = 2;
        pdf.id = ChunkRecord::fingerprint("report.pdf", 0, "pdf content");
        let txt = record("notes.txt", 1, 1, "txt content", 8);
        store.upsert(vec![pdf, txt]).await.unwrap();

        let query = vec![1.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let filter = MetadataFilter::and(vec![
            MetadataFilter::eq("file_type", ".pdf"),
            MetadataFilter::gte("structural_info_tables_count", 1),
        ]);
        let results = store.search(&query, 10, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.metadata.source, "report.pdf");
    }

    #[tokio::test]
    async fn empty_filter_match_returns_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store
            .upsert(vec![record("a.txt", 0, 1, "content", 8)])
            .await
            .unwrap();

        let query = vec![1.0f32; 8];
        let filter = MetadataFilter::eq("file_type", ".docx");
        let results = store.search(&query, 10, Some(&filter)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn threshold_drops_distant_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store
            .upsert(vec![
                record("a.txt", 0, 2, "close", 8),
                record("a.txt", 1, 2, "far", 8),
            ])
            .await
            .unwrap();

        let mut query = vec![0.0f32; 8];
        query[0] = 1.0;
        let results = store
            .search_with_threshold(&query, 10, 0.3, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.text, "close");
    }

    #[tokio::test]
    async fn dimension_is_pinned_by_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store
            .upsert(vec![record("a.txt", 0, 1, "eight dims", 8)])
            .await
            .unwrap();
        assert_eq!(store.dimension().await.unwrap(), Some(8));

        let wrong = record("b.txt", 0, 1, "sixteen dims", 16);
        let err = store.upsert(vec![wrong]).await.unwrap_err();
        assert!(matches!(err, StashError::DimensionMismatch { expected: 8, actual: 16 }));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reingest_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let batch = vec![
            record("doc.txt", 0, 2, "alpha", 8),
            record("doc.txt", 1, 2, "beta", 8),
        ];
        store.upsert(batch.clone()).await.unwrap();
        let before = store.count().await.unwrap();
        store.upsert(batch).await.unwrap();
        assert_eq!(store.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn stats_aggregate_by_type_and_method() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;

        let mut pdf = record("r.pdf", 0, 1, "pdf text", 8);
        pdf.metadata.file_type = ".pdf".into();
        pdf.metadata.tables_count = 3;
        store
            .upsert(vec![pdf, record("n.txt", 1, 1, "txt text", 8)])
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_file_type[".pdf"], 1);
        assert_eq!(stats.by_file_type[".txt"], 1);
        assert_eq!(stats.by_processing_method["enhanced"], 2);
        assert_eq!(stats.total_tables, 3);
        assert_eq!(stats.dimension, Some(8));
    }

    #[tokio::test]
    async fn delete_by_source_removes_both_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store
            .upsert(vec![
                record("gone.txt", 0, 1, "to delete", 8),
                record("kept.txt", 1, 1, "to keep", 8),
            ])
            .await
            .unwrap();

        let deleted = store.delete_by_source("gone.txt").await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn optimize_preserves_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path()).await;
        store
            .upsert(vec![
                record("a.txt", 0, 2, "one", 8),
                record("a.txt", 1, 2, "two", 8),
            ])
            .await
            .unwrap();

        let mut query = vec![0.0f32; 8];
        query[1] = 1.0;
        let before = store.search(&query, 5, None).await.unwrap();

        let report = store.optimize(&CancelToken::new()).await.unwrap();
        assert_eq!(report.mode, "standard");
        assert_eq!(report.stats_before.total, report.stats_after.total);

        let after = store.search(&query, 5, None).await.unwrap();
        assert_eq!(
            before.iter().map(|(r, _)| &r.id).collect::<Vec<_>>(),
            after.iter().map(|(r, _)| &r.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn provider_switch_uses_a_separate_collection_file() {
        let dir = tempfile::tempdir().unwrap();
        let store_a = SqliteVectorStore::open(test_config(dir.path()), "mock:hash-8")
            .await
            .unwrap();
        let store_b = SqliteVectorStore::open(test_config(dir.path()), "other:model")
            .await
            .unwrap();

        assert_ne!(store_a.db_path(), store_b.db_path());
        store_a
            .upsert(vec![record("a.txt", 0, 1, "vector in A", 8)])
            .await
            .unwrap();
        assert_eq!(store_a.count().await.unwrap(), 1);
        assert_eq!(store_b.count().await.unwrap(), 0);
    }
}
