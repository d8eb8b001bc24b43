//! Durable destinations for decoded entries
//!
//! Every entry goes to two places: a structured table (the system of record
//! for which indices are committed) and an object store holding one JSON
//! document per entry. The pipeline writes both concurrently and treats
//! their failures independently.

use async_trait::async_trait;

use crate::entry::LogEntry;
use crate::error::SinkError;

pub mod config;
pub mod postgres;
pub mod storage;

pub use config::StorageConfig;
pub use postgres::PgEntryStore;
pub use storage::S3BlobStore;

/// Content type of every object written to the blob store
pub const ENTRY_CONTENT_TYPE: &str = "application/json";

/// Structured, table-oriented store keyed by log index
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Create the table, or add any columns it is missing
    async fn ensure_schema(&self) -> Result<(), SinkError>;

    /// Insert the entry, replacing any previous row for the same index
    async fn upsert(&self, entry: &LogEntry) -> Result<(), SinkError>;

    /// Highest committed index, 0 when nothing is committed yet
    async fn max_index(&self) -> Result<u64, SinkError>;

    /// Indices absent between the lowest and highest committed index,
    /// ascending, at most `limit`
    async fn missing_indices(&self, limit: usize) -> Result<Vec<u64>, SinkError>;
}

/// Object store addressed by key
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), SinkError>;
}
