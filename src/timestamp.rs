//! ISO 8601 timestamp helpers.
//!
//! Every timestamp in the model is kept as text so that both storage backends
//! persist exactly what they were given. New timestamps are local wall-clock
//! times without an offset, e.g. `2026-10-16T09:30:00.000000`.

use crate::error::{Error, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};

/// Format used for every timestamp this crate produces.
pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// The current local time as a naive datetime.
#[must_use]
pub fn now_naive() -> NaiveDateTime {
    Local::now().naive_local()
}

/// The current local time in canonical text form.
#[must_use]
pub fn now() -> String {
    format(now_naive())
}

/// Render a datetime in canonical text form.
#[must_use]
pub fn format(dt: NaiveDateTime) -> String {
    dt.format(FORMAT).to_string()
}

/// Parse an ISO 8601 timestamp.
///
/// Accepts naive datetimes (with or without seconds and fractions), RFC 3339
/// timestamps with an offset (converted to local time), and bare dates
/// (interpreted as midnight).
///
/// # Errors
///
/// Returns [`Error::InvalidTimestamp`] if none of the accepted forms match.
pub fn parse(s: &str) -> Result<NaiveDateTime> {
    let s = s.trim();
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Local).naive_local());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::InvalidTimestamp(s.to_string()))
}
