//! Wall-clock helpers shared by clients and the simulated control plane.

use std::time::{SystemTime, UNIX_EPOCH};

use prost_types::Timestamp;

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// The current instant as a protobuf timestamp.
pub fn now_timestamp() -> Timestamp {
    Timestamp::from(SystemTime::now())
}

/// A whole-second protobuf timestamp.
pub fn timestamp_from_secs(seconds: i64) -> Timestamp {
    Timestamp { seconds, nanos: 0 }
}

/// Convert a protobuf timestamp to milliseconds since the epoch.
///
/// Sub-millisecond precision is truncated.
pub fn timestamp_millis(ts: &Timestamp) -> i64 {
    ts.seconds
        .saturating_mul(1000)
        .saturating_add(i64::from(ts.nanos) / 1_000_000)
}
