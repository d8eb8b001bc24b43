//! Batch job scheduling

use async_trait::async_trait;

use crate::dispatcher::JobSpec;
use crate::error::SchedulerError;

pub mod kubernetes;

pub use kubernetes::{KubernetesConfig, KubernetesScheduler};

/// Something that runs one-off batch jobs
#[async_trait]
pub trait BatchScheduler: Send + Sync {
    /// Names of jobs that have not finished yet
    async fn list_active_jobs(&self) -> Result<Vec<String>, SchedulerError>;

    async fn submit(&self, job: &JobSpec) -> Result<(), SchedulerError>;
}
