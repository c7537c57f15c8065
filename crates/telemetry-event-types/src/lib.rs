//! Telemetry event and ingest wire types.
//!
//! Shared by the retry queue and the batching transport. Pure data: no I/O,
//! no async.

mod error;
mod event;
mod observer;

pub use error::DeliveryError;
pub use event::{EventStatus, IngestionResponse, Provider, TelemetryEvent, TokenUsage};
pub use observer::call_observer;

/// Path of the ingest endpoint, relative to the configured base URL.
pub const INGEST_PATH: &str = "/v1/ingest";

/// Header carrying the SDK API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Upper bound on events accepted by the ingest endpoint in one request.
pub const MAX_BATCH_EVENTS: usize = 1000;
