//! Error types shared across phren crates

use thiserror::Error;

/// Result type alias for phren operations
pub type Result<T> = std::result::Result<T, PhrenError>;

/// Errors that stop a run before any entry is processed.
///
/// Per-entry failures never surface as a `PhrenError`; they are logged and
/// counted by the ingestion pipeline instead.
#[derive(Error, Debug)]
pub enum PhrenError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid settings (table, bucket, endpoint, sizes)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transparency log error: {0}")]
    Log(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl PhrenError {
    /// Shorthand for [`PhrenError::Config`]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error stems from bad configuration rather than a
    /// remote system
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = PhrenError::config("table name is required");
        assert!(err.is_config());
        assert_eq!(err.to_string(), "Configuration error: table name is required");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PhrenError = io.into();
        assert!(!err.is_config());
        assert!(err.to_string().starts_with("IO error"));
    }
}
