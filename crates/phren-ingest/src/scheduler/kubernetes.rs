//! Kubernetes `batch/v1` Jobs over the REST API
//!
//! Inside a pod the service account token and CA bundle are picked up from
//! the standard mount. Outside a cluster point `KUBERNETES_API_URL` at an API
//! server (for example `kubectl proxy`) and optionally set `KUBERNETES_TOKEN`.

use async_trait::async_trait;
use reqwest::{Certificate, Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::BatchScheduler;
use crate::config::DEFAULT_NAMESPACE;
use crate::dispatcher::{JobSpec, WORKER_BINARY};
use crate::error::SchedulerError;

pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    pub api_url: String,
    pub namespace: String,
    pub token: Option<String>,
    /// PEM bundle trusted in addition to the system roots
    pub ca_cert_pem: Option<Vec<u8>>,
}

impl KubernetesConfig {
    pub fn new(api_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            token: None,
            ca_cert_pem: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Service account credentials mounted into the current pod
    pub fn in_cluster(namespace: Option<String>) -> Result<Self, SchedulerError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            SchedulerError::Config(
                "KUBERNETES_SERVICE_HOST is not set; not running inside a cluster".into(),
            )
        })?;
        let port = std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let host = if host.contains(':') {
            format!("[{host}]")
        } else {
            host
        };

        let dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(dir.join("token"))?.trim().to_string();
        let ca_cert_pem = std::fs::read(dir.join("ca.crt")).ok();
        let namespace = namespace
            .or_else(|| {
                std::fs::read_to_string(dir.join("namespace"))
                    .ok()
                    .map(|ns| ns.trim().to_string())
            })
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        Ok(Self {
            api_url: format!("https://{host}:{port}"),
            namespace,
            token: Some(token),
            ca_cert_pem,
        })
    }

    /// `KUBERNETES_API_URL` (+ `KUBERNETES_TOKEN`) when set, in-cluster otherwise
    pub fn from_env(namespace: Option<String>) -> Result<Self, SchedulerError> {
        match std::env::var("KUBERNETES_API_URL") {
            Ok(url) if !url.is_empty() => {
                let mut config =
                    Self::new(url, namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()));
                config.token = std::env::var("KUBERNETES_TOKEN").ok().filter(|t| !t.is_empty());
                Ok(config)
            },
            _ => Self::in_cluster(namespace),
        }
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.api_url, self.namespace
        )
    }
}

#[derive(Deserialize)]
struct JobList {
    #[serde(default)]
    items: Vec<JobItem>,
}

#[derive(Deserialize)]
struct JobItem {
    metadata: ObjectMeta,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Deserialize, Default)]
struct JobStatus {
    #[serde(default)]
    conditions: Vec<JobCondition>,
}

#[derive(Deserialize)]
struct JobCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl JobItem {
    fn is_finished(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| matches!(c.kind.as_str(), "Complete" | "Failed") && c.status == "True")
    }
}

/// The `batch/v1` Job object submitted for `job`
pub fn job_manifest(job: &JobSpec) -> Value {
    let mut container = json!({
        "name": WORKER_BINARY,
        "image": job.image,
        "command": job.command,
    });
    if let Some(secret) = &job.env_secret {
        container["envFrom"] = json!([{ "secretRef": { "name": secret } }]);
    }

    json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job.name,
            "labels": {
                "app.kubernetes.io/name": WORKER_BINARY,
                "phren/from": job.range.from.to_string(),
                "phren/to": job.range.to.to_string(),
            },
        },
        "spec": {
            "ttlSecondsAfterFinished": job.ttl_seconds_after_finished,
            "template": {
                "spec": {
                    "containers": [container],
                    "restartPolicy": "Never",
                    "serviceAccountName": job.service_account,
                },
            },
        },
    })
}

/// [`BatchScheduler`] that creates Kubernetes Jobs
pub struct KubernetesScheduler {
    client: Client,
    config: KubernetesConfig,
}

impl KubernetesScheduler {
    pub fn new(config: KubernetesConfig) -> Result<Self, SchedulerError> {
        let mut builder = Client::builder().timeout(Duration::from_secs(DEFAULT_API_TIMEOUT_SECS));
        if let Some(pem) = &config.ca_cert_pem {
            builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
        }
        let client = builder.build()?;

        info!(api = %config.api_url, namespace = %config.namespace, "Kubernetes scheduler ready");
        Ok(Self { client, config })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SchedulerError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SchedulerError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BatchScheduler for KubernetesScheduler {
    #[instrument(skip(self), fields(namespace = %self.config.namespace))]
    async fn list_active_jobs(&self) -> Result<Vec<String>, SchedulerError> {
        let response = self
            .authorized(self.client.get(self.config.jobs_url()))
            .send()
            .await?;
        let list: JobList = check_status(response).await?.json().await?;

        let active: Vec<String> = list
            .items
            .into_iter()
            .filter(|job| !job.is_finished())
            .map(|job| job.metadata.name)
            .collect();

        debug!(count = active.len(), "Listed active jobs");
        Ok(active)
    }

    #[instrument(skip(self, job), fields(job = %job.name))]
    async fn submit(&self, job: &JobSpec) -> Result<(), SchedulerError> {
        let response = self
            .authorized(self.client.post(self.config.jobs_url()))
            .json(&job_manifest(job))
            .send()
            .await?;
        check_status(response).await?;

        debug!("Job created");
        Ok(())
    }
}
