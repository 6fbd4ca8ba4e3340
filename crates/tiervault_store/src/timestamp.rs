//! Timestamp parsing for stored documents.
//!
//! Writers always emit `%Y-%m-%dT%H:%M:%S%.f`. Readers are lenient: files
//! written by older deployments may carry empty strings, a space separator,
//! or a zone offset.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};

/// Parses a stored timestamp. Zone offsets are dropped, keeping wall time.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
}

/// Parses an event end time.
///
/// A bare date means the end of that day (23:59:59).
#[must_use]
pub fn parse_end_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.len() <= 10 {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(23, 59, 59));
    }
    parse_timestamp(raw)
}

/// Deserializes an optional timestamp; empty or malformed values become `None`.
pub(crate) fn lenient_option<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

/// Deserializes a required timestamp; empty or malformed values become the epoch.
pub(crate) fn lenient<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_option(deserializer)?.unwrap_or_default())
}

/// Deserializes an optional calendar date; empty or malformed values become `None`.
pub(crate) fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .as_deref()
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()))
}
