//! Exponential backoff for queued entries.

use crate::EventQueueConfig;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Delay before the next re-attempt of an entry with `retry_count` failures.
///
/// `delay = min(base * 2^retry_count, max)`
///
/// | Retry Count | Delay (base=1s, max=8s) |
/// |-------------|-------------------------|
/// | 0           | 1s                      |
/// | 1           | 2s                      |
/// | 2           | 4s                      |
/// | 3           | 8s                      |
/// | 4+          | 8s (capped)             |
pub fn retry_delay(retry_count: u32, config: &EventQueueConfig) -> Duration {
    let multiplier = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
    let delay_ms = config
        .retry_base_delay_ms
        .saturating_mul(multiplier)
        .min(config.max_retry_delay_ms);
    Duration::from_millis(delay_ms)
}

/// Absolute time of the next re-attempt, counted from `now`.
pub fn next_retry_at(
    retry_count: u32,
    now: DateTime<Utc>,
    config: &EventQueueConfig,
) -> DateTime<Utc> {
    let delay = retry_delay(retry_count, config);
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
