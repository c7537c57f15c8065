//! Retry queue configuration.

use crate::{QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directory for queue files, relative to the working directory.
pub const DEFAULT_STORAGE_DIR: &str = ".telemetry-queue";
/// Default cap on queued entries before new failures are dropped.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
/// Default number of failed re-attempts before an entry is dead-lettered.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default base retry delay (1 minute).
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 60 * 1000;
/// Default retry delay cap (1 hour).
pub const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 60 * 60 * 1000;
/// Default background pass interval (5 minutes).
pub const DEFAULT_PROCESS_INTERVAL_MS: u64 = 5 * 60 * 1000;
/// Default number of entries sent per retry request.
pub const DEFAULT_PROCESS_BATCH_SIZE: usize = 100;

/// Configuration for [`EventQueue`](crate::EventQueue).
///
/// Field names follow the camelCase option names when read from JSON, and
/// any omitted option takes its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventQueueConfig {
    /// Directory holding the active, dead-letter and statistics files.
    pub storage_dir: PathBuf,
    /// Maximum entries in the active store.
    pub max_queue_size: usize,
    /// Failed re-attempts before an entry moves to the dead-letter store.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_base_delay_ms: u64,
    /// Cap for exponential backoff.
    pub max_retry_delay_ms: u64,
    /// Period of the background retry pass.
    pub process_interval_ms: u64,
    /// Entries delivered per retry request.
    pub process_batch_size: usize,
    /// Emit per-operation diagnostics at debug level.
    pub debug: bool,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
            process_interval_ms: DEFAULT_PROCESS_INTERVAL_MS,
            process_batch_size: DEFAULT_PROCESS_BATCH_SIZE,
            debug: false,
        }
    }
}

impl EventQueueConfig {
    /// Default configuration rooted at `storage_dir`.
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    pub fn load_from_file(path: &Path) -> QueueResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EventQueueConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the queue cannot operate with.
    pub fn validate(&self) -> QueueResult<()> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(QueueError::Config("storageDir must not be empty".to_string()));
        }
        if self.max_queue_size == 0 {
            return Err(QueueError::Config("maxQueueSize must be at least 1".to_string()));
        }
        if self.process_batch_size == 0 {
            return Err(QueueError::Config(
                "processBatchSize must be at least 1".to_string(),
            ));
        }
        if self.process_interval_ms == 0 {
            return Err(QueueError::Config(
                "processIntervalMs must be greater than 0".to_string(),
            ));
        }
        if self.retry_base_delay_ms > self.max_retry_delay_ms {
            return Err(QueueError::Config(
                "retryBaseDelayMs must not exceed maxRetryDelayMs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn process_interval(&self) -> Duration {
        Duration::from_millis(self.process_interval_ms.max(1))
    }
}
