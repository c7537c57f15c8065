//! Delivery error type.

use thiserror::Error;

/// Why a batch did not reach the ingest endpoint.
///
/// Every variant is treated as transient by the pipeline: the batch is
/// handed to the retry queue regardless of which one occurred.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Connection, TLS or timeout failure before a response arrived.
    #[error("Network error: {0}")]
    Network(String),

    /// The endpoint answered with a non-2xx status.
    #[error("Ingestion API error: {status} - {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The batch could not be encoded.
    #[error("Encoding error: {0}")]
    Encode(String),
}

impl DeliveryError {
    /// HTTP status if the endpoint responded.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_error_display() {
        let err = DeliveryError::Rejected {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Ingestion API error: 503 - unavailable");
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn network_error_has_no_status() {
        let err = DeliveryError::Network("connection refused".to_string());
        assert_eq!(err.to_string(), "Network error: connection refused");
        assert_eq!(err.status(), None);
    }

    #[test]
    fn encode_error_from_serde() {
        let serde_err = serde_json::from_str::<serde_json::Value>("{{{").unwrap_err();
        let err: DeliveryError = serde_err.into();
        assert!(err.to_string().starts_with("Encoding error:"));
    }
}
