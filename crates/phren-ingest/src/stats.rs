use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters collected by one pipeline run
///
/// Each worker keeps its own instance; the pipeline merges them after the
/// workers have joined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestStats {
    /// Indices handed to workers
    pub indices_seen: u64,
    /// Entries fetched from the log
    pub fetched: u64,
    /// Fetch attempts beyond the first
    pub fetch_retries: u64,
    /// Indices given up on after fetch failures
    pub fetch_skipped: u64,
    /// Fetched entries that could not be decoded
    pub decode_failed: u64,
    /// Entries of a kind the decoder does not understand
    pub unsupported: u64,
    /// Rows written to the structured store
    pub stored: u64,
    pub store_failed: u64,
    /// Objects written to the blob store
    pub uploaded: u64,
    pub upload_failed: u64,
    pub bytes_uploaded: u64,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestStats {
    /// Empty stats stamped with the current time
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    /// Sum the counters of `other` into `self`, keeping `self`'s timestamps
    pub fn merge(mut self, other: Self) -> Self {
        self.indices_seen += other.indices_seen;
        self.fetched += other.fetched;
        self.fetch_retries += other.fetch_retries;
        self.fetch_skipped += other.fetch_skipped;
        self.decode_failed += other.decode_failed;
        self.unsupported += other.unsupported;
        self.stored += other.stored;
        self.store_failed += other.store_failed;
        self.uploaded += other.uploaded;
        self.upload_failed += other.upload_failed;
        self.bytes_uploaded += other.bytes_uploaded;
        self.started_at = self.started_at.or(other.started_at);
        self.completed_at = self.completed_at.or(other.completed_at);
        self
    }

    /// Entries that reached both sinks or at least one of them
    pub fn committed(&self) -> u64 {
        self.stored.max(self.uploaded)
    }

    pub fn entries_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.fetched as f64 / self.duration_secs
        } else {
            0.0
        }
    }

    /// Share of seen indices that were stored, as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.indices_seen > 0 {
            (self.stored as f64 / self.indices_seen as f64) * 100.0
        } else {
            0.0
        }
    }
}
