//! Whole-second expiration timestamps.
//!
//! Every `expires` value written to or compared against the table is a Unix
//! timestamp in whole seconds, rounded half-up from milliseconds.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, StoreError};

/// Cookie fields consulted for an explicit expiration, in precedence order.
///
/// `_expires` is where cookie serializers keep the value when `expires` is
/// exposed through an accessor.
pub const COOKIE_EXPIRY_FIELDS: [&str; 2] = ["expires", "_expires"];

/// Largest magnitude, in milliseconds from the epoch, of a representable
/// cookie date (100,000,000 days either side of 1970).
pub const MAX_EXPIRY_MILLIS: i64 = 8_640_000_000_000_000;

/// Round milliseconds to whole seconds (half-up).
pub fn millis_to_unix_seconds(millis: i64) -> i64 {
    millis.saturating_add(500).div_euclid(1000)
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current Unix time in whole seconds.
pub fn now_unix() -> i64 {
    millis_to_unix_seconds(now_millis())
}

/// Expiration for a session payload.
///
/// Uses `cookie.expires`, then `cookie._expires`, and falls back to
/// `now + default_ttl` when neither holds a usable value.
pub fn expiration_for(session: &Value, default_ttl: Duration) -> Result<i64> {
    expiration_at(session, default_ttl, now_millis())
}

/// [`expiration_for`] with an explicit clock.
pub fn expiration_at(session: &Value, default_ttl: Duration, now_millis: i64) -> Result<i64> {
    let explicit = session.get("cookie").filter(|c| is_truthy(c)).and_then(|cookie| {
        COOKIE_EXPIRY_FIELDS
            .iter()
            .filter_map(|field| cookie.get(*field))
            .find(|value| is_truthy(value))
    });

    let millis = match explicit {
        Some(value) => parse_expiry_millis(value)?,
        None => {
            let ttl = i64::try_from(default_ttl.as_millis()).unwrap_or(i64::MAX);
            now_millis.saturating_add(ttl)
        }
    };
    Ok(millis_to_unix_seconds(millis))
}

/// Parse a cookie expiration: a date string (RFC 3339 as produced by JSON
/// date serialization, or RFC 2822 as used in `Expires` headers) or a
/// millisecond timestamp.
///
/// Timestamps beyond [`MAX_EXPIRY_MILLIS`] are rejected.
pub fn parse_expiry_millis(value: &Value) -> Result<i64> {
    let in_range = |millis: &i64| millis.unsigned_abs() <= MAX_EXPIRY_MILLIS as u64;
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.abs() <= MAX_EXPIRY_MILLIS as f64)
                    .map(|f| f as i64)
            })
            .filter(in_range)
            .ok_or_else(|| StoreError::InvalidExpiration(n.to_string())),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .or_else(|_| DateTime::parse_from_rfc2822(s))
            .map(|dt| dt.timestamp_millis())
            .ok()
            .filter(in_range)
            .ok_or_else(|| StoreError::InvalidExpiration(s.clone())),
        other => Err(StoreError::InvalidExpiration(other.to_string())),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
