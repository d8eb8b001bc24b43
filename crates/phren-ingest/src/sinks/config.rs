use std::env;

/// Region used when `S3_REGION` is unset
pub const DEFAULT_S3_REGION: &str = "us-east-1";

/// Connection settings for the S3-compatible blob store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub bucket: String,
    /// Custom endpoint (MinIO, GCS interop); `None` means AWS
    pub endpoint: Option<String>,
    pub region: String,
    /// Static credentials. When absent the default AWS provider chain is used.
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl StorageConfig {
    /// Read connection details from the environment for `bucket`
    ///
    /// `S3_ENDPOINT`, `S3_REGION`, `S3_ACCESS_KEY`/`AWS_ACCESS_KEY_ID`,
    /// `S3_SECRET_KEY`/`AWS_SECRET_ACCESS_KEY`, `S3_PATH_STYLE`
    pub fn from_env(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_S3_REGION.to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    /// Local MinIO with its stock credentials
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            endpoint: Some(endpoint.into()),
            region: DEFAULT_S3_REGION.to_string(),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }

    /// Both halves of a static key pair, if configured
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}
