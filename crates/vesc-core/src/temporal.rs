//! # Temporal Types: UTC Timestamps at Second Precision
//!
//! Defines `Timestamp`, a UTC-only timestamp truncated to whole seconds.
//!
//! ## Clock Ownership
//!
//! The escrow core never reads the wall clock. Every call carries `now`
//! from its caller, and deadlines (`expires_at`, the fraud-check window,
//! the dispute window) are absolute timestamps compared against it.
//! Only the host edges call [`Timestamp::now()`].
//!
//! Second precision keeps timestamps exactly representable in the 8-byte
//! slots of the ledger codec.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A UTC-only timestamp, truncated to seconds precision.
///
/// # Construction
///
/// - [`Timestamp::now()`]: current UTC time, truncated.
/// - [`Timestamp::from_utc()`]: from a `DateTime<Utc>`, truncating sub-seconds.
/// - [`Timestamp::from_epoch_secs()`]: from Unix seconds.
/// - [`Timestamp::parse()`]: from an RFC 3339 string with a `Z` suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create a timestamp from the current UTC time, truncated to seconds.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// Create a timestamp from a `chrono::DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Parse an RFC 3339 timestamp. Only the `Z` suffix is accepted.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !s.ends_with('Z') {
            return Err(ValidationError::InvalidTimestamp {
                value: s.to_string(),
                reason: "timestamp must be UTC with Z suffix".to_string(),
            });
        }
        let dt = DateTime::parse_from_rfc3339(s).map_err(|e| ValidationError::InvalidTimestamp {
            value: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Create a timestamp from a Unix epoch timestamp (seconds).
    pub fn from_epoch_secs(secs: i64) -> Result<Self, ValidationError> {
        let dt = DateTime::from_timestamp(secs, 0).ok_or_else(|| ValidationError::InvalidTimestamp {
            value: secs.to_string(),
            reason: "out of range for a UTC date".to_string(),
        })?;
        Ok(Self(dt))
    }

    /// Returns the Unix epoch timestamp in seconds.
    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// The timestamp `secs` seconds later.
    ///
    /// Fails with [`ValidationError::ArithmeticOverflow`] when the result
    /// leaves chrono's representable range.
    pub fn plus_seconds(&self, secs: u64) -> Result<Self, ValidationError> {
        let overflow = || ValidationError::ArithmeticOverflow {
            operation: "timestamp + duration",
        };
        let secs = i64::try_from(secs).map_err(|_| overflow())?;
        let target = self.epoch_secs().checked_add(secs).ok_or_else(overflow)?;
        Self::from_epoch_secs(target).map_err(|_| overflow())
    }

    /// Whether `now` is strictly past this deadline.
    pub fn is_passed_at(&self, now: Timestamp) -> bool {
        now > *self
    }

    /// Render as ISO8601 with Z suffix (e.g., `2026-01-15T12:00:00Z`).
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

/// Truncate a `DateTime<Utc>` to seconds precision (discard nanoseconds).
fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}
