//! Queue records and statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use telemetry_event_types::TelemetryEvent;

/// A telemetry event that failed delivery at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Unique identifier assigned at enqueue time.
    pub id: String,
    /// The original event.
    pub event: TelemetryEvent,
    /// When the entry was added to the queue.
    pub queued_at: DateTime<Utc>,
    /// Failed re-attempts so far.
    pub retry_count: u32,
    /// Message of the most recent failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Earliest time of the next re-attempt. Absent means due now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Whether the processor may re-attempt this entry at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.next_retry_at {
            Some(at) => at <= now,
            None => true,
        }
    }
}

/// Aggregate counters for a queue instance.
///
/// `queued_count`, `ready_count` and `corrupt_count` are recomputed from the
/// active store by [`EventQueue::get_stats`](crate::EventQueue::get_stats);
/// the remaining counters are lifetime totals persisted across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueStats {
    /// Entries currently in the active store.
    pub queued_count: u64,
    /// Active entries whose retry time has passed.
    pub ready_count: u64,
    /// Entries moved to the dead-letter store.
    pub dead_count: u64,
    /// Entries delivered by a retry pass.
    pub processed_count: u64,
    /// Entries that exhausted their retries.
    pub failed_count: u64,
    /// Malformed lines skipped in the last scan of the active store.
    pub corrupt_count: u64,
    /// Last time a retry batch was delivered.
    pub last_flush_at: Option<DateTime<Utc>>,
    /// Last time a delivery failure was recorded.
    pub last_error_at: Option<DateTime<Utc>>,
}
