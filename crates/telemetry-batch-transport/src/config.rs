//! Transport configuration.

use crate::{TransportError, TransportResult};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use telemetry_event_types::{INGEST_PATH, MAX_BATCH_EVENTS};
use telemetry_retry_queue::EventQueueConfig;
use url::Url;

/// Default ingestion base URL.
pub const DEFAULT_ENDPOINT: &str = "https://api.aethermind.io";
/// Default flush threshold.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Default flush timer period.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`BatchTransport`](crate::BatchTransport).
#[derive(Clone)]
pub struct TransportConfig {
    /// API key sent with every request.
    pub api_key: String,
    /// Ingestion base URL.
    pub endpoint: String,
    /// Buffered events that trigger an immediate flush.
    pub batch_size: usize,
    /// Period of the timer flush.
    pub flush_interval: Duration,
    /// Persist failed batches for retry. When off, failed batches are dropped.
    pub enable_dlq: bool,
    /// Timeout for a single ingest request.
    pub request_timeout: Duration,
    /// Retry queue settings, used when `enable_dlq` is set.
    pub queue: EventQueueConfig,
}

impl TransportConfig {
    /// Default configuration for the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            enable_dlq: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            queue: EventQueueConfig::default(),
        }
    }

    /// Build configuration from `TELEMETRY_*` environment variables.
    ///
    /// `TELEMETRY_API_KEY` is required. Unparseable numeric values fall back
    /// to their defaults.
    pub fn from_env() -> TransportResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> TransportResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("TELEMETRY_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| TransportError::Config("TELEMETRY_API_KEY is not set".to_string()))?;

        let mut config = Self::new(api_key);

        if let Some(endpoint) = lookup("TELEMETRY_ENDPOINT") {
            config.endpoint = endpoint;
        }

        if let Some(batch_size) = lookup("TELEMETRY_BATCH_SIZE").and_then(|s| s.parse().ok()) {
            config.batch_size = batch_size;
        }

        if let Some(ms) = lookup("TELEMETRY_FLUSH_INTERVAL_MS").and_then(|s| s.parse().ok()) {
            config.flush_interval = Duration::from_millis(ms);
        }

        if let Some(flag) = lookup("TELEMETRY_ENABLE_DLQ") {
            config.enable_dlq = !matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            );
        }

        if let Some(dir) = lookup("TELEMETRY_STORAGE_DIR") {
            config.queue.storage_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the transport cannot operate with.
    pub fn validate(&self) -> TransportResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(TransportError::Config("apiKey is required".to_string()));
        }
        self.ingest_url()?;
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_EVENTS {
            return Err(TransportError::Config(format!(
                "batchSize must be between 1 and {}",
                MAX_BATCH_EVENTS
            )));
        }
        if self.flush_interval.is_zero() {
            return Err(TransportError::Config(
                "flushInterval must be greater than 0".to_string(),
            ));
        }
        if self.enable_dlq {
            self.queue
                .validate()
                .map_err(|e| TransportError::Config(e.to_string()))?;
        }
        Ok(())
    }

    /// Full URL of the ingest endpoint.
    pub fn ingest_url(&self) -> TransportResult<Url> {
        let base = self.endpoint.trim_end_matches('/');
        Ok(Url::parse(&format!("{}{}", base, INGEST_PATH))?)
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("enable_dlq", &self.enable_dlq)
            .field("request_timeout", &self.request_timeout)
            .field("queue", &self.queue)
            .finish()
    }
}
