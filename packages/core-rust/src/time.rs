//! Wall-clock helpers shared by the model and the engine.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, UTC.
pub type UnixMillis = i64;

/// Returns the current wall-clock time as milliseconds since the Unix epoch.
///
/// Millisecond timestamps fit comfortably in i64 until the year 292 million.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn now_millis() -> UnixMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
