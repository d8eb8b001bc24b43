//! Configuration management

use phren_common::{PhrenError, Result};
use serde::{Deserialize, Serialize};

use crate::dispatcher::{JobTemplate, DEFAULT_JOB_TTL_SECS, DEFAULT_SERVICE_ACCOUNT};
use crate::pipeline::{PipelineConfig, DEFAULT_CONCURRENCY, DEFAULT_RETRY_BUDGET};
use crate::planner::DEFAULT_CHUNK_SIZE;
use crate::sinks::postgres::DEFAULT_TABLE;
use crate::tlog::DEFAULT_REKOR_URL;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/phren";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 20;

/// Default object store bucket.
pub const DEFAULT_BUCKET: &str = "rekor-entries";

/// Namespace used when none is configured and none is mounted into the pod.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default cap on single-index jobs per `missing` run.
pub const DEFAULT_MISSING_LIMIT: usize = 100;

/// Settings shared by every subcommand
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub rekor_url: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub table: String,
    pub bucket: String,
    pub concurrency: usize,
    pub retry_budget: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            rekor_url: DEFAULT_REKOR_URL.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            table: DEFAULT_TABLE.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rekor_url.is_empty() {
            return Err(PhrenError::config("Rekor URL cannot be empty"));
        }
        if self.database_url.is_empty() {
            return Err(PhrenError::config("Database URL cannot be empty"));
        }
        if self.table.is_empty() {
            return Err(PhrenError::config("Table name cannot be empty"));
        }
        if self.bucket.is_empty() {
            return Err(PhrenError::config("Bucket name cannot be empty"));
        }
        if self.concurrency == 0 {
            return Err(PhrenError::config("Concurrency must be greater than 0"));
        }
        if self.database_max_connections == 0 {
            return Err(PhrenError::config(
                "Database max_connections must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            concurrency: self.concurrency,
            retry_budget: self.retry_budget,
            ..Default::default()
        }
    }

    /// Pool size large enough that no worker waits on a connection
    pub fn pool_size(&self) -> u32 {
        let workers = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        self.database_max_connections.max(workers)
    }
}

/// Settings for the subcommands that create batch jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Falls back to the pod's own namespace, then [`DEFAULT_NAMESPACE`]
    pub namespace: Option<String>,
    pub image: String,
    pub service_account: String,
    pub env_secret: Option<String>,
    pub job_ttl_secs: u32,
    pub chunk_size: u64,
    pub missing_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            image: String::new(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            env_secret: None,
            job_ttl_secs: DEFAULT_JOB_TTL_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            missing_limit: DEFAULT_MISSING_LIMIT,
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty() {
            return Err(PhrenError::config("Job image cannot be empty"));
        }
        if self.namespace.as_deref() == Some("") {
            return Err(PhrenError::config("Namespace cannot be empty"));
        }
        if self.chunk_size == 0 {
            return Err(PhrenError::config("Chunk size must be greater than 0"));
        }
        Ok(())
    }

    /// Job template that makes workers ingest into the same sinks as `ingest`
    pub fn job_template(&self, ingest: &IngestConfig) -> JobTemplate {
        JobTemplate {
            image: self.image.clone(),
            service_account: self.service_account.clone(),
            rekor_url: ingest.rekor_url.clone(),
            table: ingest.table.clone(),
            bucket: ingest.bucket.clone(),
            env_secret: self.env_secret.clone(),
            ttl_seconds_after_finished: self.job_ttl_secs,
        }
    }
}
