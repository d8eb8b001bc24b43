//! Shared test support
//!
//! In-memory implementations of the pipeline capabilities, entry body
//! builders over the fixtures, and a PostgreSQL test container.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use phren_ingest::entry::LogEntry;
use phren_ingest::error::{FetchError, SinkError};
use phren_ingest::sinks::{BlobStore, EntryStore};
use phren_ingest::tlog::{RawEntry, TransparencyLog};
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

pub const KEYRING: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/keyring.asc"));
pub const CERT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/cert.pem"));
pub const HELLO_SHA256: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";
pub const LOG_ID: &str = "c0d23d6ad406973f9559f3ba2d1ca01f84147d8ffc5b8445c224f98b9591801d";

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,phren_ingest=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Entry bodies
// ============================================================================

pub fn hashedrekord_body() -> Value {
    json!({
        "apiVersion": "0.0.1",
        "kind": "hashedrekord",
        "spec": {
            "data": {"hash": {"algorithm": "sha256", "value": HELLO_SHA256}},
            "signature": {
                "content": STANDARD.encode("sig"),
                "publicKey": {"content": STANDARD.encode(CERT)}
            }
        }
    })
}

pub fn pgp_rekord_body() -> Value {
    json!({
        "apiVersion": "0.0.1",
        "kind": "rekord",
        "spec": {
            "data": {"hash": {"algorithm": "sha256", "value": HELLO_SHA256}},
            "signature": {
                "content": STANDARD.encode("sig"),
                "format": "pgp",
                "publicKey": {"content": STANDARD.encode(KEYRING)}
            }
        }
    })
}

pub fn unsupported_body() -> Value {
    json!({"apiVersion": "0.0.1", "kind": "alpine", "spec": {}})
}

pub fn raw_entry(index: u64, body: &Value) -> RawEntry {
    RawEntry {
        body: STANDARD.encode(body.to_string()),
        integrated_time: 1_700_000_000 + index as i64,
        log_id: LOG_ID.to_string(),
        log_index: index,
    }
}

/// Rekor's `GET /api/v1/log/entries` response for one entry
pub fn entries_response(uuid: &str, raw: &RawEntry) -> Value {
    json!({ uuid: raw })
}

// ============================================================================
// Transparency log
// ============================================================================

/// Serves entries from memory; unknown indices are `NotFound`
#[derive(Default)]
pub struct MemoryLog {
    entries: HashMap<u64, RawEntry>,
    /// Remaining transient failures per index
    flaky: Mutex<HashMap<u64, u32>>,
    calls: Mutex<HashMap<u64, u32>>,
}

impl MemoryLog {
    pub fn with_entries(indices: impl IntoIterator<Item = u64>, body: &Value) -> Self {
        let entries = indices.into_iter().map(|i| (i, raw_entry(i, body))).collect();
        Self {
            entries,
            ..Default::default()
        }
    }

    pub fn insert(&mut self, index: u64, raw: RawEntry) {
        self.entries.insert(index, raw);
    }

    /// Fail the next `times` fetches of `index` with HTTP 503
    pub fn fail_transiently(self, index: u64, times: u32) -> Self {
        self.flaky.lock().unwrap().insert(index, times);
        self
    }

    pub fn calls(&self, index: u64) -> u32 {
        self.calls.lock().unwrap().get(&index).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TransparencyLog for MemoryLog {
    async fn size(&self) -> Result<u64, FetchError> {
        Ok(self.entries.keys().max().map_or(0, |max| max + 1))
    }

    async fn fetch_entry(&self, index: u64) -> Result<RawEntry, FetchError> {
        *self.calls.lock().unwrap().entry(index).or_default() += 1;

        if let Some(remaining) = self.flaky.lock().unwrap().get_mut(&index) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchError::Status {
                    what: format!("entry {index}"),
                    status: 503,
                });
            }
        }
        self.entries
            .get(&index)
            .cloned()
            .ok_or(FetchError::NotFound(index))
    }
}

// ============================================================================
// Sinks
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<u64, LogEntry>>,
    failing: HashSet<u64>,
    upserts: AtomicU64,
}

impl MemoryStore {
    pub fn failing_on(indices: impl IntoIterator<Item = u64>) -> Self {
        Self {
            failing: indices.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn seeded(indices: impl IntoIterator<Item = u64>) -> Self {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().unwrap();
            for index in indices {
                let raw = raw_entry(index, &unsupported_body());
                let entry = phren_ingest::decode_entry(index, &raw).unwrap();
                rows.insert(index, entry);
            }
        }
        store
    }

    pub fn indices(&self) -> Vec<u64> {
        self.rows.lock().unwrap().keys().copied().collect()
    }

    pub fn get(&self, index: u64) -> Option<LogEntry> {
        self.rows.lock().unwrap().get(&index).cloned()
    }

    pub fn upserts(&self) -> u64 {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn ensure_schema(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn upsert(&self, entry: &LogEntry) -> Result<(), SinkError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&entry.log_index) {
            return Err(SinkError::Storage(format!("row {} rejected", entry.log_index)));
        }
        self.rows.lock().unwrap().insert(entry.log_index, entry.clone());
        Ok(())
    }

    async fn max_index(&self) -> Result<u64, SinkError> {
        Ok(self.rows.lock().unwrap().keys().next_back().copied().unwrap_or(0))
    }

    async fn missing_indices(&self, limit: usize) -> Result<Vec<u64>, SinkError> {
        let rows = self.rows.lock().unwrap();
        let (Some(&low), Some(&high)) = (rows.keys().next(), rows.keys().next_back()) else {
            return Ok(Vec::new());
        };
        Ok((low..=high).filter(|i| !rows.contains_key(i)).take(limit).collect())
    }
}

#[derive(Default)]
pub struct MemoryBlobs {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failing: HashSet<String>,
    /// Every put sleeps this long before completing
    delay: Option<Duration>,
}

impl MemoryBlobs {
    pub fn failing_on(keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            failing: keys.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn stalling(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(key) {
            return Err(SinkError::Storage(format!("put {key} rejected")));
        }
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(())
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/postgres");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}
