use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{config::Region, error::DisplayErrorContext, primitives::ByteStream, Client};
use tracing::{debug, info, instrument};

use super::config::StorageConfig;
use super::{BlobStore, ENTRY_CONTENT_TYPE};
use crate::error::SinkError;

/// [`BlobStore`] backed by an S3-compatible bucket
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(config: StorageConfig) -> Result<Self, SinkError> {
        if config.bucket.is_empty() {
            return Err(SinkError::Config("bucket name is required".into()));
        }
        debug!(bucket = %config.bucket, endpoint = ?config.endpoint, "Initializing blob store");

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);

        if let Some((access_key, secret_key)) = config.static_credentials() {
            builder = builder.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "phren-storage",
            ));
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(bucket = %config.bucket, "Blob store client initialized");

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<(), SinkError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(ENTRY_CONTENT_TYPE)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                SinkError::Storage(format!(
                    "put s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        debug!(key, "Uploaded object");
        Ok(())
    }
}
