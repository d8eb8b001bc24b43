//! Error taxonomy for ingestion
//!
//! Each stage has its own error type so the pipeline can decide, per entry,
//! whether to retry (`FetchError::is_transient`), skip (`DecodeError`),
//! degrade (`IdentityError`) or just log (`SinkError`).

use std::time::Duration;
use thiserror::Error;

/// Failure to obtain an entry or the tree size from the transparency log
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transparency log returned HTTP {status} for {what}")]
    Status { what: String, status: u16 },

    #[error("entry {0} not found")]
    NotFound(u64),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(e) => {
                if let Some(status) = e.status() {
                    return status.is_server_error() || status.as_u16() == 429;
                }
                !e.is_decode() && !e.is_builder()
            },
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::NotFound(_) | FetchError::Malformed(_) => false,
        }
    }
}

/// An entry payload that cannot be turned into a [`crate::entry::LogEntry`]
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64 in {field}: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("invalid JSON in {context}: {source}")]
    Json {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("entry reports log index {actual}, expected {expected}")]
    IndexMismatch { expected: u64, actual: u64 },

    #[error("integrated time {0} is out of range")]
    Timestamp(i64),

    #[error("missing {0}")]
    MissingField(&'static str),
}

/// The embedded public key did not yield a signer identity
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("armored key ring: {0}")]
    Armor(String),

    #[error("OpenPGP packet stream: {0}")]
    Packet(String),

    #[error("key ring contains no public key")]
    NoKey,

    #[error("PEM: {0}")]
    Pem(String),

    #[error("X.509 certificate: {0}")]
    Certificate(String),
}

/// A write to one of the two sinks failed
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("object storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{sink} commit timed out after {elapsed:?}")]
    Timeout { sink: &'static str, elapsed: Duration },

    #[error("invalid sink configuration: {0}")]
    Config(String),
}

/// Talking to the batch-job scheduler failed
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("scheduler returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("scheduler configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
