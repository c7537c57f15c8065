//! Batching transport for LLM telemetry.
//!
//! [`BatchTransport`] buffers [`TelemetryEvent`]s from instrumented calls and
//! posts them to the ingest endpoint in batches, either when the buffer
//! fills or on a timer. Batches that fail delivery are handed to a durable
//! [`EventQueue`] that retries them with backoff.
//!
//! ```no_run
//! use telemetry_batch_transport::{
//!     create_transport, Provider, TelemetryEvent, TokenUsage, TransportConfig,
//! };
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = create_transport(TransportConfig::new("ak_live_123"))?;
//! transport.start()?;
//!
//! transport.send(TelemetryEvent::success(
//!     Provider::OpenAi,
//!     "gpt-4",
//!     TokenUsage::new(100, 50),
//!     0.0045,
//!     Duration::from_millis(420),
//! ));
//!
//! transport.stop().await;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod transport;

pub use client::IngestClient;
pub use config::{
    TransportConfig, DEFAULT_BATCH_SIZE, DEFAULT_ENDPOINT, DEFAULT_FLUSH_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use error::{TransportError, TransportResult};
pub use transport::{create_transport, BatchTransport, FailureFn, SuccessFn, TransportCallbacks};

pub use telemetry_event_types::{DeliveryError, Provider, TelemetryEvent, TokenUsage};
pub use telemetry_retry_queue::{
    EventQueue, EventQueueConfig, ProcessOutcome, QueueCallbacks, QueueStats, SendBatchFn,
};
