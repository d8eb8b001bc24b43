//! PostgreSQL entry store
//!
//! One row per log index. The table is created on first use and new
//! nullable columns are added in place, so older tables keep working as the
//! record shape grows.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::EntryStore;
use crate::entry::LogEntry;
use crate::error::SinkError;

/// Table used when none is configured
pub const DEFAULT_TABLE: &str = "rekor_entries";

/// Every column besides the `log_index` key, all nullable
const COLUMNS: &[(&str, &str)] = &[
    ("integrated_time", "TIMESTAMPTZ"),
    ("log_id", "TEXT"),
    ("kind", "TEXT"),
    ("api_version", "TEXT"),
    ("hash_algorithm", "TEXT"),
    ("hash_value", "TEXT"),
    ("signature_format", "TEXT"),
    ("public_key", "TEXT"),
    ("identity_text", "TEXT"),
    ("identity", "JSONB"),
    ("ingested_at", "TIMESTAMPTZ"),
];

/// [`EntryStore`] over a PostgreSQL table
#[derive(Clone)]
pub struct PgEntryStore {
    pool: PgPool,
    table: String,
    upsert_sql: String,
}

impl PgEntryStore {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Result<Self, SinkError> {
        let table = table.into();
        validate_table_name(&table)?;
        let upsert_sql = upsert_statement(&table);
        Ok(Self {
            pool,
            table,
            upsert_sql,
        })
    }

    /// Open a pool against `database_url` and wrap it
    pub async fn connect(
        database_url: &str,
        table: impl Into<String>,
        max_connections: u32,
    ) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Self::new(pool, table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn validate_table_name(table: &str) -> Result<(), SinkError> {
    if table.is_empty() {
        return Err(SinkError::Config("table name is required".into()));
    }

    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 || !parts.iter().all(|p| valid_part(p)) {
        return Err(SinkError::Config(format!("invalid table name '{table}'")));
    }
    Ok(())
}

fn upsert_statement(table: &str) -> String {
    let names: Vec<&str> = COLUMNS.iter().map(|(name, _)| *name).collect();
    let placeholders: Vec<String> = (1..=names.len() + 1).map(|i| format!("${i}")).collect();
    let updates: Vec<String> = names
        .iter()
        .map(|name| format!("{name} = EXCLUDED.{name}"))
        .collect();

    format!(
        "INSERT INTO {table} (log_index, {}) VALUES ({}) ON CONFLICT (log_index) DO UPDATE SET {}",
        names.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

fn to_db_index(index: u64) -> Result<i64, SinkError> {
    i64::try_from(index).map_err(|_| SinkError::Config(format!("log index {index} exceeds BIGINT")))
}

#[async_trait]
impl EntryStore for PgEntryStore {
    #[instrument(skip(self), fields(table = %self.table))]
    async fn ensure_schema(&self) -> Result<(), SinkError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (log_index BIGINT PRIMARY KEY)",
            self.table
        ))
        .execute(&self.pool)
        .await?;

        for (name, ty) in COLUMNS {
            sqlx::query(&format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {name} {ty}",
                self.table
            ))
            .execute(&self.pool)
            .await?;
        }

        info!(columns = COLUMNS.len() + 1, "Schema is up to date");
        Ok(())
    }

    async fn upsert(&self, entry: &LogEntry) -> Result<(), SinkError> {
        let signature = entry.signature.as_ref();
        let hash = entry.hash.as_ref();

        sqlx::query(&self.upsert_sql)
            .bind(to_db_index(entry.log_index)?)
            .bind(entry.integrated_time)
            .bind(&entry.log_id)
            .bind(entry.kind.as_str())
            .bind(entry.api_version.as_deref())
            .bind(hash.map(|h| h.algorithm.as_str()))
            .bind(hash.map(|h| h.value.as_str()))
            .bind(signature.map(|s| s.format.as_str()))
            .bind(signature.map(|s| s.public_key.as_str()))
            .bind(signature.map(|s| s.identity.legacy_text()))
            .bind(signature.map(|s| Json(&s.identity)))
            .bind(chrono::Utc::now())
            .execute(&self.pool)
            .await?;

        debug!(index = entry.log_index, "Upserted row");
        Ok(())
    }

    async fn max_index(&self) -> Result<u64, SinkError> {
        let max: Option<i64> =
            sqlx::query_scalar(&format!("SELECT MAX(log_index) FROM {}", self.table))
                .fetch_one(&self.pool)
                .await?;

        Ok(max.map_or(0, |m| u64::try_from(m).unwrap_or(0)))
    }

    #[instrument(skip(self), fields(table = %self.table))]
    async fn missing_indices(&self, limit: usize) -> Result<Vec<u64>, SinkError> {
        let sql = format!(
            "SELECT s.i FROM generate_series(
                 (SELECT MIN(log_index) FROM {t}),
                 (SELECT MAX(log_index) FROM {t})
             ) AS s(i)
             LEFT JOIN {t} e ON e.log_index = s.i
             WHERE e.log_index IS NULL
             ORDER BY s.i
             LIMIT $1",
            t = self.table
        );

        let rows: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        debug!(found = rows.len(), "Scanned for missing indices");
        Ok(rows.into_iter().filter_map(|i| u64::try_from(i).ok()).collect())
    }
}
