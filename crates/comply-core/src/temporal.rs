//! # Temporal Types — UTC-Only Timestamps
//!
//! `Timestamp` is a UTC instant truncated to seconds. Reminder times, SLA
//! deadlines and transition records all use it, so comparisons such as
//! "is this reminder already in the past" never mix offsets or sub-second
//! noise. Non-UTC inputs are rejected by [`Timestamp::parse`].

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A UTC-only timestamp, truncated to seconds precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current UTC time, truncated.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// From a `chrono::DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// `date` at `hour`:00:00 UTC. Hours above 23 are capped at 23.
    pub fn at_hour(date: NaiveDate, hour: u32) -> Self {
        let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
        Self(Utc.from_utc_datetime(&date.and_time(time)))
    }

    /// Last second of `date` (23:59:59 UTC).
    pub fn end_of_day(date: NaiveDate) -> Self {
        let time = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Self(Utc.from_utc_datetime(&date.and_time(time)))
    }

    /// Parse an RFC 3339 string. Only the `Z` suffix is accepted.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !s.ends_with('Z') {
            return Err(ValidationError::Field {
                field: "timestamp",
                message: format!("timestamp must use Z suffix (UTC only), got {s:?}"),
            });
        }
        let dt = DateTime::parse_from_rfc3339(s).map_err(|e| ValidationError::Field {
            field: "timestamp",
            message: format!("invalid RFC 3339 timestamp {s:?}: {e}"),
        })?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Calendar date of the instant in UTC.
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }

    /// Whole seconds elapsed from `earlier` to `self` (negative if earlier is later).
    pub fn seconds_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).num_seconds()
    }

    /// Render as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_utc(dt)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn now_has_no_subseconds() {
        assert_eq!(Timestamp::now().as_datetime().nanosecond(), 0);
    }

    #[test]
    fn at_hour_and_end_of_day() {
        assert_eq!(
            Timestamp::at_hour(date(2025, 2, 13), 9).to_iso8601(),
            "2025-02-13T09:00:00Z"
        );
        assert_eq!(
            Timestamp::at_hour(date(2025, 2, 13), 99).to_iso8601(),
            "2025-02-13T23:00:00Z"
        );
        assert_eq!(
            Timestamp::end_of_day(date(2025, 2, 20)).to_iso8601(),
            "2025-02-20T23:59:59Z"
        );
    }

    #[test]
    fn parse_rejects_offsets() {
        assert!(Timestamp::parse("2025-02-13T09:00:00Z").is_ok());
        assert!(Timestamp::parse("2025-02-13T09:00:00+00:00").is_err());
        assert!(Timestamp::parse("2025-02-13").is_err());
    }

    #[test]
    fn seconds_since_and_ordering() {
        let a = Timestamp::parse("2025-02-13T09:00:00Z").unwrap();
        let b = Timestamp::parse("2025-02-13T10:30:00Z").unwrap();
        assert!(a < b);
        assert_eq!(b.seconds_since(a), 5400);
        assert_eq!(b.date(), date(2025, 2, 13));
    }

    #[test]
    fn serde_roundtrip() {
        let ts = Timestamp::parse("2025-02-13T09:00:00Z").unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        let parsed: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, parsed);
    }
}
