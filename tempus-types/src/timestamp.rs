//! Millisecond timestamps for effective-time bounds.
//!
//! Effective intervals are half-open: a version with `effective_from = a` and
//! `effective_to = b` is authoritative for every instant `t` with
//! `a <= t < b`.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An instant, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The earliest representable instant.
    pub const MIN: Timestamp = Timestamp(i64::MIN);

    /// The latest representable instant.
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    /// Creates a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Parses an RFC 3339 string such as `2024-03-01T00:00:00Z`.
    pub fn parse_rfc3339(s: &str) -> Result<Self> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.timestamp_millis()))
            .map_err(|e| Error::InvalidTimestamp(format!("{s}: {e}")))
    }

    /// Reads a timestamp from a JSON value: an integer number of
    /// milliseconds or an RFC 3339 string.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Self)
                .ok_or_else(|| Error::InvalidTimestamp(n.to_string())),
            serde_json::Value::String(s) => Self::parse_rfc3339(s),
            other => Err(Error::InvalidTimestamp(other.to_string())),
        }
    }

    /// Returns true if this instant lies in the half-open interval `[from, to)`.
    /// An absent `to` means the interval is unbounded.
    #[must_use]
    pub fn within(&self, from: Timestamp, to: Option<Timestamp>) -> bool {
        from <= *self && to.is_none_or(|to| *self < to)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl From<i64> for Timestamp {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match DateTime::<Utc>::from_timestamp_millis(self.0) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}
