//! Transport error types.

use thiserror::Error;

/// Errors raised while setting up a transport.
///
/// Delivery failures never surface here; they are reported through
/// observers and the retry queue.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint is not a valid URL
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Started outside a Tokio runtime
    #[error("No Tokio runtime available")]
    NoRuntime,
}

/// Result type alias using TransportError.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_from_parse_error() {
        let err: TransportError = url::Url::parse("not a url").unwrap_err().into();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
        assert!(err.to_string().starts_with("Invalid endpoint URL:"));
    }

    #[test]
    fn no_runtime_display() {
        assert_eq!(
            TransportError::NoRuntime.to_string(),
            "No Tokio runtime available"
        );
    }
}
