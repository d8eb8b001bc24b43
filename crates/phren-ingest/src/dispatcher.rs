//! Turns planned ranges into batch jobs
//!
//! A dispatch cycle first lists the scheduler's active jobs. If any of them
//! belongs to us (name starts with [`JOB_NAME_PREFIX`]) the whole cycle is
//! skipped, so two scans never fan out over the same gap.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use crate::error::SchedulerError;
use crate::planner::Range;
use crate::scheduler::BatchScheduler;

/// Every job this crate creates is named `phren-{from}-{to}`
pub const JOB_NAME_PREFIX: &str = "phren";

pub const DEFAULT_SERVICE_ACCOUNT: &str = "phren";
/// Finished range jobs are removed immediately
pub const DEFAULT_JOB_TTL_SECS: u32 = 0;
/// Name of the binary inside the job image
pub const WORKER_BINARY: &str = "phren";

/// Everything a worker job needs besides its range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTemplate {
    pub image: String,
    pub service_account: String,
    pub rekor_url: String,
    pub table: String,
    pub bucket: String,
    /// Secret whose keys are exported as environment variables
    /// (`DATABASE_URL`, S3 credentials)
    pub env_secret: Option<String>,
    pub ttl_seconds_after_finished: u32,
}

impl JobTemplate {
    pub fn job_for(&self, range: Range) -> JobSpec {
        JobSpec {
            name: job_name(range),
            range,
            image: self.image.clone(),
            command: vec![
                WORKER_BINARY.to_string(),
                "--rekor-url".to_string(),
                self.rekor_url.clone(),
                "--table".to_string(),
                self.table.clone(),
                "--bucket".to_string(),
                self.bucket.clone(),
                "update".to_string(),
                "--start-index".to_string(),
                range.from.to_string(),
                "--end-index".to_string(),
                range.to.to_string(),
            ],
            service_account: self.service_account.clone(),
            env_secret: self.env_secret.clone(),
            ttl_seconds_after_finished: self.ttl_seconds_after_finished,
        }
    }
}

/// One batch job, fully determined by its range and template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub range: Range,
    pub image: String,
    pub command: Vec<String>,
    pub service_account: String,
    pub env_secret: Option<String>,
    pub ttl_seconds_after_finished: u32,
}

pub fn job_name(range: Range) -> String {
    format!("{JOB_NAME_PREFIX}-{}-{}", range.from, range.to)
}

/// Outcome of one dispatch cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub submitted: Vec<String>,
    /// Ranges whose submission failed, with the reason
    pub failed: Vec<(Range, String)>,
    /// Active job that caused the cycle to be skipped
    pub conflict: Option<String>,
}

impl DispatchReport {
    pub fn skipped(&self) -> bool {
        self.conflict.is_some()
    }
}

pub struct JobDispatcher {
    scheduler: Arc<dyn BatchScheduler>,
}

impl JobDispatcher {
    pub fn new(scheduler: Arc<dyn BatchScheduler>) -> Self {
        Self { scheduler }
    }

    /// Submit one job per range unless one of ours is still active
    ///
    /// Failing to list active jobs is an error. Failing to submit a single
    /// job is recorded in the report and the remaining ranges still go out.
    #[instrument(skip(self, ranges, template), fields(ranges = ranges.len()))]
    pub async fn dispatch(
        &self,
        ranges: &[Range],
        template: &JobTemplate,
    ) -> Result<DispatchReport, SchedulerError> {
        let mut report = DispatchReport::default();

        let active = self.scheduler.list_active_jobs().await?;
        if let Some(running) = active.into_iter().find(|name| name.starts_with(JOB_NAME_PREFIX)) {
            warn!(job = %running, "A phren job is already running, not dispatching");
            report.conflict = Some(running);
            return Ok(report);
        }

        if ranges.is_empty() {
            info!("No pending ranges");
            return Ok(report);
        }

        for &range in ranges {
            let job = template.job_for(range);
            match self.scheduler.submit(&job).await {
                Ok(()) => {
                    info!(job = %job.name, "Submitted job");
                    report.submitted.push(job.name);
                },
                Err(e) => {
                    error!(job = %job.name, error = %e, "Failed to submit job");
                    report.failed.push((range, e.to_string()));
                },
            }
        }

        info!(
            submitted = report.submitted.len(),
            failed = report.failed.len(),
            "Dispatch finished"
        );
        Ok(report)
    }
}
