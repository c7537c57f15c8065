//! Retry queue error types.

use thiserror::Error;

/// Retry queue error type.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Storage read or write failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using QueueError.
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = QueueError::Config("maxRetries must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: maxRetries must be at least 1"
        );
    }

    #[test]
    fn io_error_from_std() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: QueueError = io.into();
        assert!(err.to_string().starts_with("IO error:"));
    }
}
