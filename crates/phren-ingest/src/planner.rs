//! Gap and range planning
//!
//! Works out which part of the log index space is not yet in the structured
//! store and cuts it into chunks, one per batch job.

use phren_common::{PhrenError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::sinks::EntryStore;
use crate::tlog::TransparencyLog;

/// Chunk size used by `scan` when none is configured
pub const DEFAULT_CHUNK_SIZE: u64 = 50_000;

/// Inclusive index range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub from: u64,
    pub to: u64,
}

impl Range {
    pub fn new(from: u64, to: u64) -> Result<Self> {
        if from > to {
            return Err(PhrenError::config(format!(
                "range start {from} is after range end {to}"
            )));
        }
        Ok(Self { from, to })
    }

    pub fn single(index: u64) -> Self {
        Self {
            from: index,
            to: index,
        }
    }

    /// Number of indices covered
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from).saturating_add(1)
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    pub fn indices(&self) -> std::ops::RangeInclusive<u64> {
        self.from..=self.to
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Split the work between `last_committed` and `log_size` into chunks that
/// end on multiples of `chunk_size`
///
/// The first range starts at `last_committed` itself; the trailing range ends
/// at `log_size`. Returns no ranges at all when not even one chunk boundary
/// lies below `log_size - 1`.
pub fn plan_ranges(last_committed: u64, log_size: u64, chunk_size: u64) -> Result<Vec<Range>> {
    if chunk_size == 0 {
        return Err(PhrenError::config("chunk size must be greater than zero"));
    }

    let mut ranges = Vec::new();
    let Some(limit) = log_size.checked_sub(1) else {
        return Ok(ranges);
    };

    let first_boundary = (last_committed / chunk_size)
        .checked_mul(chunk_size)
        .and_then(|b| b.checked_add(chunk_size));
    let mut next = first_boundary;
    let mut last_step = None;

    while let Some(i) = next.filter(|&i| i < limit) {
        ranges.push(Range {
            from: (i - chunk_size + 1).max(last_committed),
            to: i,
        });
        last_step = Some(i);
        next = i.checked_add(chunk_size);
    }

    if let Some(step) = last_step {
        ranges.push(Range {
            from: step + 1,
            to: log_size,
        });
    }
    Ok(ranges)
}

/// Reads the committed frontier and the log size, then plans
pub struct RangePlanner {
    store: Arc<dyn EntryStore>,
    log: Arc<dyn TransparencyLog>,
}

impl RangePlanner {
    pub fn new(store: Arc<dyn EntryStore>, log: Arc<dyn TransparencyLog>) -> Self {
        Self { store, log }
    }

    /// Chunks between the highest committed index and the log head
    #[instrument(skip(self))]
    pub async fn pending_ranges(&self, chunk_size: u64) -> Result<Vec<Range>> {
        let last = self
            .store
            .max_index()
            .await
            .map_err(|e| PhrenError::Database(format!("failed to read last committed index: {e}")))?;
        let size = self
            .log
            .size()
            .await
            .map_err(|e| PhrenError::Log(format!("failed to read log size: {e}")))?;

        info!(last_committed = last, log_size = size, "Planning ranges");
        let ranges = plan_ranges(last, size, chunk_size)?;
        debug!(count = ranges.len(), "Planned ranges");
        Ok(ranges)
    }

    /// One single-index range per hole inside the committed span, at most
    /// `limit` of them
    #[instrument(skip(self))]
    pub async fn missing_ranges(&self, limit: usize) -> Result<Vec<Range>> {
        let missing = self
            .store
            .missing_indices(limit)
            .await
            .map_err(|e| PhrenError::Database(format!("failed to scan for missing indices: {e}")))?;

        info!(count = missing.len(), limit, "Found missing indices");
        Ok(missing.into_iter().take(limit).map(Range::single).collect())
    }
}
