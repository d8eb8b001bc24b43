//! Phren Ingest Library
//!
//! Mirrors a Rekor transparency log into a PostgreSQL table and an
//! S3-compatible bucket, and fans large backfills out as batch jobs.
//!
//! # Components
//!
//! - **tlog**: HTTP client for log size and single entries
//! - **entry**: kind-aware decoding and signer identity extraction
//! - **pipeline**: bounded worker pool with retry and dual-sink commit
//! - **planner**: committed frontier, chunking and gap detection
//! - **dispatcher** / **scheduler**: one Kubernetes Job per planned range
//!
//! # Example
//!
//! ```no_run
//! use phren_ingest::pipeline::{IngestionPipeline, PipelineConfig};
//! use phren_ingest::planner::Range;
//! use phren_ingest::sinks::{PgEntryStore, S3BlobStore, StorageConfig};
//! use phren_ingest::tlog::{RekorClient, DEFAULT_REKOR_URL};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let log = Arc::new(RekorClient::new(DEFAULT_REKOR_URL)?);
//!     let store = Arc::new(PgEntryStore::connect("postgresql://localhost/phren", "rekor_entries", 16).await?);
//!     let blobs = Arc::new(S3BlobStore::new(StorageConfig::from_env("rekor-entries")).await?);
//!
//!     let pipeline = IngestionPipeline::new(log, store, blobs, PipelineConfig::default())?;
//!     let stats = pipeline.run(Range::new(0, 99)?).await?;
//!     println!("stored {} entries", stats.stored);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod pipeline;
pub mod planner;
pub mod scheduler;
pub mod sinks;
pub mod stats;
pub mod tlog;

pub use config::{DispatchConfig, IngestConfig};
pub use dispatcher::{DispatchReport, JobDispatcher, JobTemplate};
pub use entry::{decode_entry, EntryKind, Identity, LogEntry};
pub use pipeline::{IngestionPipeline, PipelineConfig};
pub use planner::{plan_ranges, Range, RangePlanner};
pub use stats::IngestStats;
