//! Time utilities

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock reads before the Unix epoch.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
