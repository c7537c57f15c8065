//! Durable retry queue for telemetry deliveries.
//!
//! Events whose first delivery failed are appended to a JSONL file and
//! re-sent in the background with exponential backoff. Entries that keep
//! failing are moved to a dead-letter file for inspection. The queue knows
//! nothing about HTTP: delivery goes through an injected [`SendBatchFn`].
//!
//! ```text
//! enqueue ──► failed-events.jsonl ──► process_queue ──► send_batch
//!                    ▲                      │
//!                    └──── reschedule ◄─────┤ failure (retries left)
//!                                           │
//!               dead-events.jsonl ◄─────────┘ failure (retries exhausted)
//! ```

pub mod backoff;
mod config;
mod entry;
mod error;
mod queue;
pub mod store;

pub use config::{
    EventQueueConfig, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_MAX_RETRY_DELAY_MS,
    DEFAULT_PROCESS_BATCH_SIZE, DEFAULT_PROCESS_INTERVAL_MS, DEFAULT_RETRY_BASE_DELAY_MS,
    DEFAULT_STORAGE_DIR,
};
pub use entry::{QueueEntry, QueueStats};
pub use error::{QueueError, QueueResult};
pub use queue::{
    EnqueueOutcome, EventFailedFn, EventProcessedFn, EventQueue, PassSummary, ProcessOutcome,
    ProcessingState, QueueCallbacks, QueueFullFn,
};
pub use store::QueueStore;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use telemetry_event_types::{DeliveryError, TelemetryEvent};

/// Future returned by a batch sender.
pub type BatchFuture = Pin<Box<dyn Future<Output = Result<(), DeliveryError>> + Send>>;

/// Delivers one batch of events. Shared by the transport and the retry queue.
pub type SendBatchFn = Arc<dyn Fn(Vec<TelemetryEvent>) -> BatchFuture + Send + Sync>;
