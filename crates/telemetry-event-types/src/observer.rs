//! Isolation for host-supplied observer callbacks.

use std::panic::{self, AssertUnwindSafe};
use tracing::warn;

/// Run an observer callback, containing any panic it raises.
///
/// Observers are best-effort notifications. A panicking observer is logged
/// and otherwise ignored so it cannot take down a flush or retry pass.
/// Returns `false` if the callback panicked.
pub fn call_observer<F: FnOnce()>(name: &'static str, f: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!(observer = name, reason = %reason, "Observer callback panicked");
            false
        }
    }
}
