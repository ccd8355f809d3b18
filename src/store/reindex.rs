//! Index rebuilding with size-tuned profiles and resumable checkpoints.
//!
//! A reindex rebuilds the embeddings table in insertion order and records
//! the profile's graph parameters. Small collections rebuild in one
//! transaction; large ones copy in bounded batches, persist a checkpoint
//! file every few thousand rows, and watch resident memory against the
//! configured soft cap. A failed or cancelled run resumes from the last
//! checkpoint; the outcome is always a pure reorganization — the set of
//! (id, vector, metadata) is preserved exactly.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::store::sqlite::{storage_error, SqliteVectorStore};
use crate::types::{Result, StashError};

/// Index tuning profile. `Auto` picks by collection size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexProfile {
    Small,
    Medium,
    Large,
    Auto,
}

impl ReindexProfile {
    /// Neighbor fan-out and search beam width for this profile, resolving
    /// `Auto` against the current collection size.
    pub fn params(self, count: usize) -> ProfileParams {
        let resolved = match self {
            ReindexProfile::Auto => {
                if count < 1_000 {
                    ReindexProfile::Small
                } else if count < 50_000 {
                    ReindexProfile::Medium
                } else {
                    ReindexProfile::Large
                }
            }
            fixed => fixed,
        };
        match resolved {
            ReindexProfile::Small => ProfileParams {
                name: "small",
                fanout: 8,
                beam: 32,
            },
            ReindexProfile::Medium => ProfileParams {
                name: "medium",
                fanout: 16,
                beam: 64,
            },
            ReindexProfile::Large => ProfileParams {
                name: "large",
                fanout: 32,
                beam: 128,
            },
            ReindexProfile::Auto => unreachable!("auto resolved above"),
        }
    }
}

impl FromStr for ReindexProfile {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "small" => Ok(ReindexProfile::Small),
            "medium" => Ok(ReindexProfile::Medium),
            "large" => Ok(ReindexProfile::Large),
            "auto" => Ok(ReindexProfile::Auto),
            other => Err(StashError::Input(format!(
                "unknown reindex profile '{other}' (expected small|medium|large|auto)"
            ))),
        }
    }
}

/// Resolved index parameters recorded in the collection's meta table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProfileParams {
    pub name: &'static str,
    pub fanout: usize,
    pub beam: usize,
}

/// Live progress of a reindex run, published on a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReindexProgress {
    pub current: usize,
    pub total: usize,
    pub batch_id: usize,
}

/// Summary returned when a reindex run completes.
#[derive(Debug, Clone, Serialize)]
pub struct ReindexReport {
    pub profile: String,
    pub fanout: usize,
    pub beam: usize,
    /// "standard" or "incremental".
    pub mode: String,
    pub total: usize,
    pub batches: usize,
    /// Row count restored from a checkpoint, when the run resumed.
    pub resumed_from: Option<usize>,
}

/// On-disk checkpoint, written atomically after every
/// `checkpoint_every` rows. Safe to delete once a reindex finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Checkpoint {
    last_rowid: i64,
    processed: usize,
    batch_id: usize,
    total: usize,
}

impl SqliteVectorStore {
    /// Rebuild the embedding index under `profile`. Takes the exclusive
    /// writer lock for the whole run.
    pub async fn reindex(
        &self,
        profile: ReindexProfile,
        cancel: &CancelToken,
    ) -> Result<ReindexReport> {
        let _guard = self.lock.write().await;
        let total = self.count_unlocked().await?;
        let params = profile.params(total);

        if total < self.config.large_threshold {
            self.reindex_standard(params, total, cancel).await
        } else {
            self.reindex_incremental(params, total, cancel).await
        }
    }

    /// One-transaction rebuild for collections below the large threshold.
    async fn reindex_standard(
        &self,
        params: ProfileParams,
        total: usize,
        cancel: &CancelToken,
    ) -> Result<ReindexReport> {
        cancel.check()?;
        let (fanout, beam, name) = (params.fanout, params.beam, params.name);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute_batch(
                    "DROP TABLE IF EXISTS embeddings_new;
                     CREATE TABLE embeddings_new (id TEXT PRIMARY KEY, embedding BLOB NOT NULL);",
                )?;
                tx.execute(
                    "INSERT INTO embeddings_new (id, embedding)
                     SELECT id, embedding FROM embeddings ORDER BY rowid",
                    [],
                )?;
                tx.execute_batch(
                    "DROP TABLE embeddings;
                     ALTER TABLE embeddings_new RENAME TO embeddings;",
                )?;
                write_profile(&tx, name, fanout, beam)?;
                tx.commit()?;
                conn.execute_batch("ANALYZE;")?;
                Ok(())
            })
            .await
            .map_err(storage_error)?;

        let _ = self.progress_tx.send(ReindexProgress {
            current: total,
            total,
            batch_id: 1,
        });
        info!(collection = %self.collection, profile = params.name, total, "reindex complete");
        Ok(ReindexReport {
            profile: params.name.to_string(),
            fanout: params.fanout,
            beam: params.beam,
            mode: "standard".into(),
            total,
            batches: 1,
            resumed_from: None,
        })
    }

    /// Batched rebuild with persisted checkpoints for large collections.
    async fn reindex_incremental(
        &self,
        params: ProfileParams,
        total: usize,
        cancel: &CancelToken,
    ) -> Result<ReindexReport> {
        let checkpoint_path = self.checkpoint_path();
        let mut checkpoint = load_checkpoint(&checkpoint_path).await.unwrap_or(Checkpoint {
            last_rowid: 0,
            processed: 0,
            batch_id: 0,
            total,
        });
        let resumed_from = (checkpoint.processed > 0).then_some(checkpoint.processed);
        if let Some(processed) = resumed_from {
            info!(
                collection = %self.collection,
                processed, "resuming reindex from checkpoint"
            );
        }

        // The scratch table persists across failures so resumed runs keep
        // already-copied rows.
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS embeddings_new
                         (id TEXT PRIMARY KEY, embedding BLOB NOT NULL);",
                )?;
                Ok(())
            })
            .await
            .map_err(storage_error)?;

        let batch_size = self.config.incremental_batch_size.max(1);
        let mut rows_since_checkpoint = 0usize;
        let mut batches_run = 0usize;

        loop {
            cancel.check()?;

            if resident_memory_mib() > self.config.memory_cap_mib as f64 {
                warn!(
                    cap_mib = self.config.memory_cap_mib,
                    "resident memory above soft cap; flushing sqlite caches"
                );
                self.conn
                    .call(|conn| {
                        conn.execute_batch("PRAGMA shrink_memory;")?;
                        Ok(())
                    })
                    .await
                    .map_err(storage_error)?;
            }

            let last_rowid = checkpoint.last_rowid;
            let limit = batch_size as i64;
            let (max_rowid, copied) = self
                .conn
                .call(move |conn| {
                    let (max_rowid, copied): (i64, i64) = conn.query_row(
                        "SELECT COALESCE(MAX(rowid), ?1), COUNT(*) FROM (
                             SELECT rowid FROM embeddings
                             WHERE rowid > ?1 ORDER BY rowid LIMIT ?2)",
                        rusqlite::params![last_rowid, limit],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?;
                    if copied > 0 {
                        let tx = conn.transaction()?;
                        tx.execute(
                            "INSERT OR REPLACE INTO embeddings_new (id, embedding)
                             SELECT id, embedding FROM embeddings
                             WHERE rowid > ?1 AND rowid <= ?2",
                            rusqlite::params![last_rowid, max_rowid],
                        )?;
                        tx.commit()?;
                    }
                    Ok((max_rowid, copied as usize))
                })
                .await
                .map_err(storage_error)?;

            if copied == 0 {
                break;
            }

            checkpoint.last_rowid = max_rowid;
            checkpoint.processed += copied;
            checkpoint.batch_id += 1;
            batches_run += 1;
            rows_since_checkpoint += copied;

            let _ = self.progress_tx.send(ReindexProgress {
                current: checkpoint.processed.min(total),
                total,
                batch_id: checkpoint.batch_id,
            });
            debug!(
                batch = checkpoint.batch_id,
                processed = checkpoint.processed,
                total,
                "reindex batch copied"
            );

            if rows_since_checkpoint >= self.config.checkpoint_every {
                save_checkpoint(&checkpoint_path, &checkpoint).await?;
                rows_since_checkpoint = 0;
            }
        }

        // Atomic swap, profile record, and checkpoint cleanup.
        let (fanout, beam, name) = (params.fanout, params.beam, params.name);
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute_batch(
                    "DROP TABLE embeddings;
                     ALTER TABLE embeddings_new RENAME TO embeddings;",
                )?;
                write_profile(&tx, name, fanout, beam)?;
                tx.commit()?;
                conn.execute_batch("ANALYZE;")?;
                Ok(())
            })
            .await
            .map_err(storage_error)?;

        if let Err(err) = tokio::fs::remove_file(&checkpoint_path).await {
            debug!(error = %err, "no checkpoint file to remove");
        }

        info!(
            collection = %self.collection,
            profile = params.name,
            total,
            batches = batches_run,
            "incremental reindex complete"
        );
        Ok(ReindexReport {
            profile: params.name.to_string(),
            fanout: params.fanout,
            beam: params.beam,
            mode: "incremental".into(),
            total,
            batches: batches_run,
            resumed_from,
        })
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.config
            .checkpoint_dir
            .join(format!("{}.json", self.collection))
    }
}

fn write_profile(
    tx: &rusqlite::Transaction<'_>,
    name: &str,
    fanout: usize,
    beam: usize,
) -> std::result::Result<(), rusqlite::Error> {
    tx.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES
         ('index_profile', ?1), ('index_fanout', ?2), ('index_beam', ?3)",
        rusqlite::params![name, fanout.to_string(), beam.to_string()],
    )?;
    Ok(())
}

async fn load_checkpoint(path: &PathBuf) -> Option<Checkpoint> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn save_checkpoint(path: &PathBuf, checkpoint: &Checkpoint) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_vec(checkpoint)
        .map_err(|err| StashError::Storage(format!("serialize checkpoint: {err}")))?;
    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), processed = checkpoint.processed, "checkpoint saved");
    Ok(())
}

/// Resident set size in MiB. Returns 0 on platforms without procfs; the
/// soft cap then simply never triggers.
pub(crate) fn resident_memory_mib() -> f64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kib: f64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0.0);
                    return kib / 1024.0;
                }
            }
        }
    }
    0.0
}
