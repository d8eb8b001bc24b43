//! Ingestion pipeline tests
//!
//! Runs the pipeline against in-memory logs and sinks to check retry,
//! skip and dual-sink behavior without any network or database.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{
    hashedrekord_body, init_test_tracing, pgp_rekord_body, raw_entry, unsupported_body,
    MemoryBlobs, MemoryLog, MemoryStore,
};
use phren_ingest::entry::{object_key, EntryKind, Identity};
use phren_ingest::pipeline::{IngestionPipeline, PipelineConfig};
use phren_ingest::planner::Range;
use std::sync::Arc;
use std::time::Duration;

fn fast_config(concurrency: usize) -> PipelineConfig {
    PipelineConfig {
        concurrency,
        retry_budget: 3,
        retry_base_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

fn pipeline(
    log: &Arc<MemoryLog>,
    store: &Arc<MemoryStore>,
    blobs: &Arc<MemoryBlobs>,
    config: PipelineConfig,
) -> IngestionPipeline {
    IngestionPipeline::new(log.clone(), store.clone(), blobs.clone(), config).unwrap()
}

#[tokio::test]
async fn test_every_index_reaches_both_sinks() {
    init_test_tracing();

    // A run cannot be cancelled midway; every index in the range is processed
    let log = Arc::new(MemoryLog::with_entries(100..=199, &hashedrekord_body()));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());

    let stats = pipeline(&log, &store, &blobs, fast_config(8))
        .run(Range::new(100, 199).unwrap())
        .await
        .unwrap();

    assert_eq!(stats.indices_seen, 100);
    assert_eq!(stats.fetched, 100);
    assert_eq!(stats.stored, 100);
    assert_eq!(stats.uploaded, 100);
    assert_eq!(store.indices(), (100..=199).collect::<Vec<_>>());
    assert_eq!(blobs.keys().len(), 100);
    assert!(stats.completed_at.is_some());

    // Each index is fetched exactly once
    for index in 100..=199 {
        assert_eq!(log.calls(index), 1, "index {index}");
    }
}

#[tokio::test]
async fn test_blob_is_canonical_entry_json() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries([7], &pgp_rekord_body()));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());

    pipeline(&log, &store, &blobs, fast_config(1))
        .run(Range::single(7))
        .await
        .unwrap();

    let bytes = blobs.get(&object_key(7)).expect("object for index 7");
    let document: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(document["log_index"], 7);
    assert_eq!(document["kind"], "rekord");

    // Angle brackets of the user id survive unescaped
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("<a@example.com>"), "{text}");

    let row = store.get(7).unwrap();
    assert!(matches!(row.identity(), Some(Identity::Pgp(ids)) if !ids.is_empty()));
}

#[tokio::test]
async fn test_store_failure_does_not_block_blob() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries(0..=9, &hashedrekord_body()));
    let store = Arc::new(MemoryStore::failing_on([3, 4]));
    let blobs = Arc::new(MemoryBlobs::default());

    let stats = pipeline(&log, &store, &blobs, fast_config(4))
        .run(Range::new(0, 9).unwrap())
        .await
        .unwrap();

    assert_eq!(stats.stored, 8);
    assert_eq!(stats.store_failed, 2);
    assert_eq!(stats.uploaded, 10);
    assert!(blobs.get(&object_key(3)).is_some());
    assert!(store.get(3).is_none());
}

#[tokio::test]
async fn test_blob_failure_does_not_block_store() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries(0..=4, &hashedrekord_body()));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::failing_on([object_key(2)]));

    let stats = pipeline(&log, &store, &blobs, fast_config(2))
        .run(Range::new(0, 4).unwrap())
        .await
        .unwrap();

    assert_eq!(stats.stored, 5);
    assert_eq!(stats.uploaded, 4);
    assert_eq!(stats.upload_failed, 1);
    assert!(store.get(2).is_some());
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries(0..=2, &hashedrekord_body()).fail_transiently(1, 2));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());

    let stats = pipeline(&log, &store, &blobs, fast_config(2))
        .run(Range::new(0, 2).unwrap())
        .await
        .unwrap();

    assert_eq!(log.calls(1), 3);
    assert_eq!(stats.fetch_retries, 2);
    assert_eq!(stats.fetch_skipped, 0);
    assert_eq!(store.indices(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_exhausted_budget_skips_index() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries(0..=2, &hashedrekord_body()).fail_transiently(1, 100));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());
    let config = PipelineConfig {
        retry_budget: 2,
        ..fast_config(2)
    };

    let stats = pipeline(&log, &store, &blobs, config)
        .run(Range::new(0, 2).unwrap())
        .await
        .unwrap();

    // First attempt plus two retries
    assert_eq!(log.calls(1), 3);
    assert_eq!(stats.fetch_skipped, 1);
    assert_eq!(store.indices(), vec![0, 2]);
    assert!(blobs.get(&object_key(1)).is_none());
}

#[tokio::test]
async fn test_zero_budget_still_retries_once() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries([5], &hashedrekord_body()).fail_transiently(5, 1));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());
    let config = PipelineConfig {
        retry_budget: 0,
        ..fast_config(1)
    };

    let stats = pipeline(&log, &store, &blobs, config)
        .run(Range::single(5))
        .await
        .unwrap();

    assert_eq!(log.calls(5), 2);
    assert_eq!(stats.stored, 1);
}

#[tokio::test]
async fn test_not_found_is_skipped_without_retry() {
    init_test_tracing();

    // The range ends one past the last entry, as the final planned chunk does
    let log = Arc::new(MemoryLog::with_entries(0..=4, &hashedrekord_body()));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());

    let stats = pipeline(&log, &store, &blobs, fast_config(2))
        .run(Range::new(0, 5).unwrap())
        .await
        .unwrap();

    assert_eq!(log.calls(5), 1);
    assert_eq!(stats.fetch_skipped, 1);
    assert_eq!(stats.fetch_retries, 0);
    assert_eq!(stats.stored, 5);
}

#[tokio::test]
async fn test_undecodable_entry_is_skipped() {
    init_test_tracing();

    let mut log = MemoryLog::with_entries(0..=3, &hashedrekord_body());
    // Envelope claims a different index than the one requested
    log.insert(2, raw_entry(42, &hashedrekord_body()));
    let log = Arc::new(log);
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());

    let stats = pipeline(&log, &store, &blobs, fast_config(2))
        .run(Range::new(0, 3).unwrap())
        .await
        .unwrap();

    assert_eq!(stats.fetched, 4);
    assert_eq!(stats.decode_failed, 1);
    assert_eq!(store.indices(), vec![0, 1, 3]);
    assert_eq!(blobs.keys().len(), 3);
}

#[tokio::test]
async fn test_unsupported_entries_are_stored_minimally() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries([11], &unsupported_body()));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());

    let stats = pipeline(&log, &store, &blobs, fast_config(1))
        .run(Range::single(11))
        .await
        .unwrap();

    assert_eq!(stats.unsupported, 1);
    let row = store.get(11).unwrap();
    assert_eq!(row.kind, EntryKind::Unsupported);
    assert!(row.signature.is_none());
    assert!(blobs.get(&object_key(11)).is_some());
}

#[tokio::test]
async fn test_unsupported_entries_can_be_skipped() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries([11], &unsupported_body()));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());
    let config = PipelineConfig {
        store_unsupported: false,
        ..fast_config(1)
    };

    let stats = pipeline(&log, &store, &blobs, config)
        .run(Range::single(11))
        .await
        .unwrap();

    assert_eq!(stats.unsupported, 1);
    assert_eq!(store.upserts(), 0);
    assert!(blobs.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_blob_store_times_out() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries([1, 2], &hashedrekord_body()));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::stalling(Duration::from_secs(60)));
    let config = PipelineConfig {
        blob_timeout: Duration::from_secs(10),
        ..fast_config(2)
    };

    let stats = pipeline(&log, &store, &blobs, config)
        .run(Range::new(1, 2).unwrap())
        .await
        .unwrap();

    assert_eq!(stats.upload_failed, 2);
    assert_eq!(stats.uploaded, 0);
    assert_eq!(stats.stored, 2);
    assert!(blobs.keys().is_empty());
}

#[tokio::test]
async fn test_more_workers_than_indices() {
    init_test_tracing();

    let log = Arc::new(MemoryLog::with_entries([3], &hashedrekord_body()));
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());

    let stats = pipeline(&log, &store, &blobs, fast_config(32))
        .run(Range::single(3))
        .await
        .unwrap();

    assert_eq!(stats.indices_seen, 1);
    assert_eq!(stats.stored, 1);
}

#[test]
fn test_zero_concurrency_is_rejected() {
    let log = Arc::new(MemoryLog::default());
    let store = Arc::new(MemoryStore::default());
    let blobs = Arc::new(MemoryBlobs::default());
    let config = PipelineConfig {
        concurrency: 0,
        ..Default::default()
    };

    let result = IngestionPipeline::new(log, store, blobs, config);
    assert!(result.is_err());
}
