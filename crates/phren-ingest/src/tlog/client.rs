//! HTTP client for a Rekor-compatible transparency log

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

use super::types::{LogInfo, RawEntry};
use crate::error::FetchError;

/// Public Sigstore instance
pub const DEFAULT_REKOR_URL: &str = "https://rekor.sigstore.dev";

/// Per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Read access to a transparency log
#[async_trait]
pub trait TransparencyLog: Send + Sync {
    /// Current number of entries in the log
    async fn size(&self) -> Result<u64, FetchError>;

    /// The raw entry at `index`
    async fn fetch_entry(&self, index: u64) -> Result<RawEntry, FetchError>;
}

/// [`TransparencyLog`] over the Rekor REST API
#[derive(Clone)]
pub struct RekorClient {
    client: Client,
    base_url: String,
}

impl RekorClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("phren/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base_url = base_url.into();
        let base_url = if base_url.is_empty() {
            DEFAULT_REKOR_URL.to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TransparencyLog for RekorClient {
    #[instrument(skip(self), fields(url = %self.base_url))]
    async fn size(&self) -> Result<u64, FetchError> {
        let response = self
            .client
            .get(format!("{}/api/v1/log", self.base_url))
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                what: "log info".to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        let info: LogInfo = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::Malformed(format!("log info: {e}")))?;

        debug!(tree_size = info.tree_size, "Fetched log size");
        Ok(info.tree_size)
    }

    #[instrument(skip(self))]
    async fn fetch_entry(&self, index: u64) -> Result<RawEntry, FetchError> {
        let response = self
            .client
            .get(format!("{}/api/v1/log/entries", self.base_url))
            .query(&[("logIndex", index)])
            .header("Accept", "application/json")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound(index)),
            status if !status.is_success() => {
                return Err(FetchError::Status {
                    what: format!("entry {index}"),
                    status: status.as_u16(),
                });
            },
            _ => {},
        }

        let bytes = response.bytes().await?;
        let entries: BTreeMap<String, RawEntry> = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::Malformed(format!("entry {index}: {e}")))?;

        let Some((uuid, entry)) = entries.into_iter().next() else {
            return Err(FetchError::Malformed(format!("entry {index}: empty response")));
        };

        debug!(index, %uuid, "Fetched entry");
        Ok(entry)
    }
}
