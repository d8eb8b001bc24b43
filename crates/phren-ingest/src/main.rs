//! Phren - Rekor transparency log ingestion

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use phren_common::logging::{init_logging, LogConfig};
use phren_ingest::config::{
    DispatchConfig, IngestConfig, DEFAULT_BUCKET, DEFAULT_DATABASE_MAX_CONNECTIONS,
    DEFAULT_DATABASE_URL, DEFAULT_MISSING_LIMIT,
};
use phren_ingest::dispatcher::{
    DispatchReport, JobDispatcher, DEFAULT_JOB_TTL_SECS, DEFAULT_SERVICE_ACCOUNT,
};
use phren_ingest::pipeline::{IngestionPipeline, DEFAULT_CONCURRENCY, DEFAULT_RETRY_BUDGET};
use phren_ingest::planner::{Range, RangePlanner, DEFAULT_CHUNK_SIZE};
use phren_ingest::scheduler::{KubernetesConfig, KubernetesScheduler};
use phren_ingest::sinks::postgres::DEFAULT_TABLE;
use phren_ingest::sinks::{EntryStore, PgEntryStore, S3BlobStore, StorageConfig};
use phren_ingest::tlog::{RekorClient, DEFAULT_REKOR_URL};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "phren")]
#[command(author, version, about = "Rekor transparency log ingestion and backfill")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base URL of the Rekor server
    #[arg(long, env = "REKOR_URL", default_value = DEFAULT_REKOR_URL, global = true)]
    rekor_url: String,

    /// PostgreSQL connection string
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = DEFAULT_DATABASE_URL,
        hide_env_values = true,
        global = true
    )]
    database_url: String,

    /// Maximum database connections in the pool
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = DEFAULT_DATABASE_MAX_CONNECTIONS, global = true)]
    database_max_connections: u32,

    /// Table entries are upserted into
    #[arg(long, env = "PHREN_TABLE", default_value = DEFAULT_TABLE, global = true)]
    table: String,

    /// Bucket entry documents are uploaded to
    #[arg(long, env = "S3_BUCKET", default_value = DEFAULT_BUCKET, global = true)]
    bucket: String,

    /// Number of concurrent ingestion workers
    #[arg(long, env = "PHREN_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY, global = true)]
    concurrency: usize,

    /// Fetch retries per entry before it is skipped
    #[arg(long, env = "PHREN_RETRY_BUDGET", default_value_t = DEFAULT_RETRY_BUDGET, global = true)]
    retry_budget: u32,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest every entry in an index range
    Update {
        /// First index to ingest
        #[arg(long)]
        start_index: u64,

        /// Last index to ingest (inclusive)
        #[arg(long)]
        end_index: u64,
    },

    /// Plan the ranges between the last stored entry and the log head and
    /// submit one job per range
    Scan {
        /// Maximum number of indices per job
        #[arg(long, env = "PHREN_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Submit one job per index missing from the stored span
    Missing {
        /// Maximum number of jobs to submit
        #[arg(long, default_value_t = DEFAULT_MISSING_LIMIT)]
        limit: usize,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Create the table or add missing columns
    Schema,
}

#[derive(Args, Debug)]
struct JobArgs {
    /// Namespace jobs are created in (defaults to the pod's namespace)
    #[arg(long, env = "PHREN_NAMESPACE")]
    namespace: Option<String>,

    /// Container image the jobs run
    #[arg(long, env = "PHREN_IMAGE")]
    image: String,

    /// Service account the jobs run as
    #[arg(long, env = "PHREN_SERVICE_ACCOUNT", default_value = DEFAULT_SERVICE_ACCOUNT)]
    service_account: String,

    /// Secret exported into each job's environment
    #[arg(long, env = "PHREN_JOB_SECRET")]
    job_secret: Option<String>,

    /// Seconds a finished job is kept before removal
    #[arg(long, env = "PHREN_JOB_TTL_SECS", default_value_t = DEFAULT_JOB_TTL_SECS)]
    job_ttl_secs: u32,
}

impl JobArgs {
    fn into_config(self, chunk_size: u64, missing_limit: usize) -> DispatchConfig {
        DispatchConfig {
            namespace: self.namespace,
            image: self.image,
            service_account: self.service_account,
            env_secret: self.job_secret,
            job_ttl_secs: self.job_ttl_secs,
            chunk_size,
            missing_limit,
        }
    }
}

impl Cli {
    fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            rekor_url: self.rekor_url.clone(),
            database_url: self.database_url.clone(),
            database_max_connections: self.database_max_connections,
            table: self.table.clone(),
            bucket: self.bucket.clone(),
            concurrency: self.concurrency,
            retry_budget: self.retry_budget,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // LOG_* variables override the defaults; --verbose overrides LOG_LEVEL
    let log_config = LogConfig::builder()
        .log_file_prefix("phren")
        .build()
        .merge_env()?
        .with_verbose(cli.verbose);
    let _guard = init_logging(&log_config)?;

    let config = cli.ingest_config();
    config.validate()?;

    match cli.command {
        Command::Update {
            start_index,
            end_index,
        } => update(&config, Range::new(start_index, end_index)?).await,
        Command::Scan { chunk_size, job } => {
            let dispatch = job.into_config(chunk_size, DEFAULT_MISSING_LIMIT);
            scan(&config, &dispatch).await
        },
        Command::Missing { limit, job } => {
            let dispatch = job.into_config(DEFAULT_CHUNK_SIZE, limit);
            missing(&config, &dispatch).await
        },
        Command::Schema => schema(&config).await,
    }
}

async fn connect_store(config: &IngestConfig) -> Result<PgEntryStore> {
    PgEntryStore::connect(&config.database_url, &config.table, config.pool_size())
        .await
        .context("Failed to connect to the database")
}

fn rekor_client(config: &IngestConfig) -> Result<RekorClient> {
    RekorClient::new(&config.rekor_url).context("Failed to build Rekor client")
}

fn dispatcher(dispatch: &DispatchConfig) -> Result<JobDispatcher> {
    let k8s = KubernetesConfig::from_env(dispatch.namespace.clone())
        .context("Failed to resolve Kubernetes API configuration")?;
    let scheduler = KubernetesScheduler::new(k8s).context("Failed to build Kubernetes client")?;
    Ok(JobDispatcher::new(Arc::new(scheduler)))
}

async fn update(config: &IngestConfig, range: Range) -> Result<()> {
    let log = Arc::new(rekor_client(config)?);
    let store = Arc::new(connect_store(config).await?);
    let blobs = Arc::new(
        S3BlobStore::new(StorageConfig::from_env(config.bucket.clone()))
            .await
            .context("Failed to initialize blob store")?,
    );

    let pipeline = IngestionPipeline::new(log, store, blobs, config.pipeline_config())?;
    let stats = pipeline.run(range).await?;

    info!(
        range = %range,
        seen = stats.indices_seen,
        stored = stats.stored,
        uploaded = stats.uploaded,
        skipped = stats.fetch_skipped + stats.decode_failed,
        success_rate = stats.success_rate(),
        entries_per_second = stats.entries_per_second(),
        "Update complete"
    );
    Ok(())
}

async fn scan(config: &IngestConfig, dispatch: &DispatchConfig) -> Result<()> {
    dispatch.validate()?;
    let store = Arc::new(connect_store(config).await?);
    store
        .ensure_schema()
        .await
        .context("Failed to ensure table schema")?;

    let planner = RangePlanner::new(store, Arc::new(rekor_client(config)?));
    let ranges = planner.pending_ranges(dispatch.chunk_size).await?;

    let report = dispatcher(dispatch)?
        .dispatch(&ranges, &dispatch.job_template(config))
        .await
        .context("Failed to dispatch range jobs")?;
    log_report(&report);
    Ok(())
}

async fn missing(config: &IngestConfig, dispatch: &DispatchConfig) -> Result<()> {
    dispatch.validate()?;
    let store = Arc::new(connect_store(config).await?);

    let planner = RangePlanner::new(store, Arc::new(rekor_client(config)?));
    let ranges = planner.missing_ranges(dispatch.missing_limit).await?;
    if ranges.is_empty() {
        info!("No missing entries found");
        return Ok(());
    }

    let report = dispatcher(dispatch)?
        .dispatch(&ranges, &dispatch.job_template(config))
        .await
        .context("Failed to dispatch missing-entry jobs")?;
    log_report(&report);
    Ok(())
}

async fn schema(config: &IngestConfig) -> Result<()> {
    let store = connect_store(config).await?;
    store
        .ensure_schema()
        .await
        .context("Failed to ensure table schema")?;
    info!(table = %store.table(), "Schema is up to date");
    Ok(())
}

fn log_report(report: &DispatchReport) {
    if let Some(job) = &report.conflict {
        warn!(job = %job, "Skipped dispatch while a previous job is still running");
        return;
    }
    for (range, reason) in &report.failed {
        warn!(range = %range, reason = %reason, "Job was not submitted");
    }
    info!(
        submitted = report.submitted.len(),
        failed = report.failed.len(),
        "Dispatch complete"
    );
}
