//! Timestamp utilities
//!
//! Timestamps are stored as RFC 3339 UTC text with fixed microsecond precision,
//! so lexical order in SQLite matches chronological order.

use crate::{Error, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

/// Length of `beats` at `tempo` beats per minute
///
/// Returns zero for a non-positive tempo rather than dividing by zero.
pub fn beats_to_duration(beats: f64, tempo: f64) -> Duration {
    if tempo <= 0.0 || beats <= 0.0 {
        return Duration::zero();
    }
    let nanos = beats / tempo * 60.0 * 1_000_000_000.0;
    Duration::nanoseconds(nanos.round() as i64)
}

/// Signed number of seconds from `from` until `to`
pub fn seconds_between(from: &DateTime<Utc>, to: &DateTime<Utc>) -> f64 {
    (*to - *from).num_milliseconds() as f64 / 1000.0
}
