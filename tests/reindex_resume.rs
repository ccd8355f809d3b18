//! Large-collection maintenance: incremental dispatch at the size
//! threshold, checkpointed reindex, cancellation, and resume.

use std::path::Path;
use std::sync::Arc;

use ragstash::{
    CancelToken, ChunkMetadata, ChunkRecord, ReindexProfile, SqliteVectorStore, StashError,
    StoreConfig,
};

const DIM: usize = 16;

fn config(dir: &Path, large_threshold: usize) -> StoreConfig {
    StoreConfig {
        base_name: "bulk".into(),
        dir: dir.join("vector_store"),
        checkpoint_dir: dir.join("reindex_checkpoints"),
        large_threshold,
        incremental_batch_size: 20,
        checkpoint_every: 40,
        memory_cap_mib: 2_048,
    }
}

fn record(index: usize) -> ChunkRecord {
    let text = format!("chunk number {index} with some body text");
    // Every vector is unique so search orderings have no distance ties.
    let mut embedding = vec![0.0f32; DIM];
    embedding[index % DIM] = 1.0;
    embedding[(index + 5) % DIM] = index as f32 / 10_000.0;
    ChunkRecord {
        id: ChunkRecord::fingerprint("bulk.txt", index, &text),
        text,
        metadata: ChunkMetadata {
            source: "bulk.txt".into(),
            file_path: None,
            file_type: ".txt".into(),
            processed_date: "2026-02-01T00:00:00Z".into(),
            processing_method: "enhanced".into(),
            chunk_index: index,
            chunk_total: 3_000,
            titles_count: 0,
            tables_count: 0,
            lists_count: 0,
            oversized: false,
        },
        embedding: Some(embedding),
    }
}

async fn populate(store: &SqliteVectorStore, count: usize) {
    let mut batch = Vec::with_capacity(500);
    for index in 0..count {
        batch.push(record(index));
        if batch.len() == 500 {
            store.upsert(std::mem::take(&mut batch)).await.unwrap();
        }
    }
    if !batch.is_empty() {
        store.upsert(batch).await.unwrap();
    }
}

fn probe_query(seed: usize) -> Vec<f32> {
    let mut query = vec![0.0f32; DIM];
    query[seed % DIM] = 1.0;
    query
}

async fn snapshot(store: &SqliteVectorStore) -> Vec<Vec<(String, f32)>> {
    let mut all = Vec::new();
    for seed in [0, 5, 11] {
        let hits = store.search(&probe_query(seed), 8, None).await.unwrap();
        all.push(
            hits.into_iter()
                .map(|(record, distance)| (record.id, distance))
                .collect(),
        );
    }
    all
}

#[tokio::test]
async fn threshold_boundary_picks_the_reindex_mode() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteVectorStore::open(config(dir.path(), 100), "mock:hash-16")
        .await
        .unwrap();
    populate(&store, 99).await;

    // One below the threshold: standard path.
    let report = store
        .reindex(ReindexProfile::Auto, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.mode, "standard");

    // At the threshold: incremental path.
    store.upsert(vec![record(99)]).await.unwrap();
    let report = store
        .reindex(ReindexProfile::Auto, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.mode, "incremental");
    assert!(report.batches >= 5);
}

#[tokio::test]
async fn incremental_reindex_preserves_the_collection() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteVectorStore::open(config(dir.path(), 100), "mock:hash-16")
        .await
        .unwrap();
    populate(&store, 300).await;

    let before = snapshot(&store).await;
    let count_before = store.count().await.unwrap();

    let report = store
        .reindex(ReindexProfile::Auto, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.mode, "incremental");
    assert_eq!(report.total, 300);
    assert_eq!(report.resumed_from, None);

    assert_eq!(store.count().await.unwrap(), count_before);
    assert_eq!(snapshot(&store).await, before);
    assert_eq!(store.dimension().await.unwrap(), Some(DIM));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_reindex_resumes_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteVectorStore::open(config(dir.path(), 100), "mock:hash-16")
            .await
            .unwrap(),
    );
    // 3,000 rows in batches of 20: 150 batches, a checkpoint every 2.
    populate(&store, 3_000).await;

    let before = snapshot(&store).await;
    let checkpoint_file = dir
        .path()
        .join("reindex_checkpoints")
        .join(format!("{}.json", store.collection()));

    // Cancel once the run has passed its second checkpoint.
    let cancel = CancelToken::new();
    let mut progress = store.reindex_progress();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                if progress.borrow().current >= 80 {
                    cancel.cancel();
                    break;
                }
            }
        })
    };

    let outcome = {
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        tokio::spawn(async move { store.reindex(ReindexProfile::Auto, &cancel).await })
            .await
            .unwrap()
    };
    watcher.abort();

    match outcome {
        Err(StashError::Cancelled) => {
            // The interrupted run left a valid checkpoint behind and the
            // collection itself is untouched.
            assert!(checkpoint_file.exists(), "checkpoint should survive cancellation");
            assert_eq!(store.count().await.unwrap(), 3_000);
            assert_eq!(snapshot(&store).await, before);

            // The next run resumes from the checkpoint and converges to
            // the same state a fault-free reindex would produce.
            let report = store
                .reindex(ReindexProfile::Auto, &CancelToken::new())
                .await
                .unwrap();
            assert_eq!(report.mode, "incremental");
            assert!(report.resumed_from.is_some(), "expected a checkpoint resume");
            assert!(report.resumed_from.unwrap() >= 40);
        }
        Ok(report) => {
            // The run can finish before the watcher lands the cancel on a
            // fast machine; the preservation property still must hold.
            assert_eq!(report.mode, "incremental");
        }
        Err(other) => panic!("unexpected reindex failure: {other}"),
    }

    assert_eq!(store.count().await.unwrap(), 3_000);
    assert_eq!(snapshot(&store).await, before);
    assert!(!checkpoint_file.exists(), "checkpoint is removed after success");
    assert_eq!(store.dimension().await.unwrap(), Some(DIM));
}

#[tokio::test]
async fn large_collection_optimize_goes_incremental() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteVectorStore::open(config(dir.path(), 100), "mock:hash-16")
        .await
        .unwrap();
    populate(&store, 150).await;

    let before = snapshot(&store).await;
    let report = store.optimize(&CancelToken::new()).await.unwrap();
    assert_eq!(report.mode, "incremental");
    assert_eq!(report.stats_before.total, report.stats_after.total);
    assert_eq!(snapshot(&store).await, before);
}
