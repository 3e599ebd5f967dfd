//! Absolute expiry encoding
//!
//! Expiry is always handed to the backend as an absolute number of
//! milliseconds since the Unix epoch, so the backend enforces wall-clock
//! expiry no matter how long the command takes to arrive.

use chrono::{DateTime, TimeZone, Utc};

/// Milliseconds since the Unix epoch for the given instant
///
/// Instants before the epoch yield negative values, which the backend
/// treats as already elapsed.
pub fn millisecond_timestamp(at: &DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Inverse of [`millisecond_timestamp`]
///
/// Returns None when the value is outside chrono's representable range.
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    millisecond_timestamp(&Utc::now())
}

/// Whether an absolute expiry has been reached at `now_ms`
///
/// An expiry equal to the current millisecond counts as elapsed.
pub fn is_elapsed(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms <= now_ms
}
