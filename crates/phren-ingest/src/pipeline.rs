//! Concurrent ingestion of an index range
//!
//! One producer feeds every index of the range into a bounded channel;
//! `concurrency` workers pull from it. Each worker fetches (with bounded
//! retry), decodes, and commits to the entry store and the blob store at the
//! same time. Per-entry failures are logged and counted, never returned.

use futures::future::join_all;
use phren_common::{PhrenError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::entry::{decode_entry, EntryKind, LogEntry};
use crate::error::SinkError;
use crate::planner::Range;
use crate::sinks::{BlobStore, EntryStore};
use crate::stats::IngestStats;
use crate::tlog::{RawEntry, TransparencyLog};

pub const DEFAULT_CONCURRENCY: usize = 16;
pub const DEFAULT_RETRY_BUDGET: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_BLOB_TIMEOUT_SECS: u64 = 10;

/// Upper bound for a single backoff sleep
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of workers, also the channel capacity
    pub concurrency: usize,
    /// Retries after the first failed fetch; values below 1 are raised to 1
    pub retry_budget: u32,
    /// First backoff delay, doubled on every further retry
    pub retry_base_delay: Duration,
    /// Deadline for one blob upload
    pub blob_timeout: Duration,
    /// Commit minimal records for kinds the decoder does not understand
    pub store_unsupported: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_budget: DEFAULT_RETRY_BUDGET,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            blob_timeout: Duration::from_secs(DEFAULT_BLOB_TIMEOUT_SECS),
            store_unsupported: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(PhrenError::config("concurrency must be greater than zero"));
        }
        if self.blob_timeout.is_zero() {
            return Err(PhrenError::config("blob timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Total fetch attempts per index
    pub fn fetch_attempts(&self) -> u32 {
        self.retry_budget.max(1).saturating_add(1)
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_base_delay
            .checked_mul(factor)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

/// Fetch → decode → dual-sink commit over a range of log indices
pub struct IngestionPipeline {
    log: Arc<dyn TransparencyLog>,
    store: Arc<dyn EntryStore>,
    blobs: Arc<dyn BlobStore>,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        log: Arc<dyn TransparencyLog>,
        store: Arc<dyn EntryStore>,
        blobs: Arc<dyn BlobStore>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            log,
            store,
            blobs,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Ingest every index in `range` and return the merged counters
    ///
    /// Only an invalid range is an error. Indices that cannot be fetched,
    /// decoded or committed are logged and skipped.
    ///
    /// There is no mid-run cancellation: once started, a run drains the whole
    /// range before returning. Stop a run by stopping the process.
    #[instrument(skip(self), fields(from = range.from, to = range.to))]
    pub async fn run(&self, range: Range) -> Result<IngestStats> {
        if range.is_empty() {
            return Err(PhrenError::config(format!("invalid range {range}")));
        }

        let concurrency = self.config.concurrency;
        info!(
            entries = range.len(),
            concurrency,
            retry_budget = self.config.retry_budget,
            "Starting ingestion"
        );

        let mut stats = IngestStats::new();
        let (tx, rx) = mpsc::channel::<u64>(concurrency);
        let rx = Arc::new(Mutex::new(rx));

        let handles: Vec<_> = (0..concurrency)
            .map(|id| {
                let worker = Worker {
                    id,
                    log: Arc::clone(&self.log),
                    store: Arc::clone(&self.store),
                    blobs: Arc::clone(&self.blobs),
                    config: self.config.clone(),
                };
                let rx = Arc::clone(&rx);
                tokio::spawn(async move { worker.run(rx).await })
            })
            .collect();

        for index in range.indices() {
            if tx.send(index).await.is_err() {
                error!(index, "All workers stopped before the range was drained");
                break;
            }
        }
        drop(tx);

        for (id, result) in join_all(handles).await.into_iter().enumerate() {
            match result {
                Ok(worker_stats) => stats = stats.merge(worker_stats),
                Err(e) => error!(worker = id, error = %e, "Worker task failed"),
            }
        }
        stats.complete();

        info!(
            fetched = stats.fetched,
            stored = stats.stored,
            uploaded = stats.uploaded,
            fetch_skipped = stats.fetch_skipped,
            decode_failed = stats.decode_failed,
            store_failed = stats.store_failed,
            upload_failed = stats.upload_failed,
            duration_secs = stats.duration_secs,
            "Ingestion finished"
        );
        Ok(stats)
    }
}

struct Worker {
    id: usize,
    log: Arc<dyn TransparencyLog>,
    store: Arc<dyn EntryStore>,
    blobs: Arc<dyn BlobStore>,
    config: PipelineConfig,
}

impl Worker {
    async fn run(self, rx: Arc<Mutex<mpsc::Receiver<u64>>>) -> IngestStats {
        let mut stats = IngestStats::default();
        loop {
            let next = rx.lock().await.recv().await;
            let Some(index) = next else { break };
            self.process(index, &mut stats).await;
        }
        debug!(worker = self.id, indices = stats.indices_seen, "Worker drained");
        stats
    }

    async fn process(&self, index: u64, stats: &mut IngestStats) {
        stats.indices_seen += 1;

        let Some(raw) = self.fetch_with_retry(index, stats).await else {
            stats.fetch_skipped += 1;
            return;
        };
        stats.fetched += 1;

        let entry = match decode_entry(index, &raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index, error = %e, "Skipping entry that failed to decode");
                stats.decode_failed += 1;
                return;
            },
        };

        if entry.kind == EntryKind::Unsupported {
            stats.unsupported += 1;
            if !self.config.store_unsupported {
                debug!(index, "Skipping unsupported entry");
                return;
            }
        }

        self.commit(&entry, stats).await;
    }

    async fn fetch_with_retry(&self, index: u64, stats: &mut IngestStats) -> Option<RawEntry> {
        let attempts = self.config.fetch_attempts();

        for attempt in 1..=attempts {
            match self.log.fetch_entry(index).await {
                Ok(raw) => return Some(raw),
                Err(e) if !e.is_transient() => {
                    warn!(index, error = %e, "Skipping entry after permanent fetch failure");
                    return None;
                },
                Err(e) if attempt == attempts => {
                    error!(index, attempts, error = %e, "Giving up on entry after retries");
                    return None;
                },
                Err(e) => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        index,
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    stats.fetch_retries += 1;
                    tokio::time::sleep(delay).await;
                },
            }
        }
        None
    }

    /// Write to both sinks concurrently; each outcome is handled on its own
    async fn commit(&self, entry: &LogEntry, stats: &mut IngestStats) {
        let index = entry.log_index;
        let key = entry.object_key();
        let timeout = self.config.blob_timeout;

        let store = self.store.upsert(entry);
        let blob = async {
            let body = entry.to_canonical_json()?;
            let size = body.len() as u64;
            tokio::time::timeout(timeout, self.blobs.put_object(&key, body))
                .await
                .map_err(|_| SinkError::Timeout {
                    sink: "blob store",
                    elapsed: timeout,
                })??;
            Ok::<u64, SinkError>(size)
        };

        let (stored, uploaded) = tokio::join!(store, blob);

        match stored {
            Ok(()) => stats.stored += 1,
            Err(e) => {
                error!(index, error = %e, "Entry store commit failed");
                stats.store_failed += 1;
            },
        }
        match uploaded {
            Ok(size) => {
                stats.uploaded += 1;
                stats.bytes_uploaded += size;
            },
            Err(e) => {
                error!(index, key = %key, error = %e, "Blob store commit failed");
                stats.upload_failed += 1;
            },
        }
        debug!(index, "Entry committed");
    }
}
