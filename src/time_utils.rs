// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting and timezone conversion.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc,
};

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Convert Fitbit's `offsetFromUTCMillis` to hours (e.g. -18000000 -> -5.0).
pub fn offset_hours_from_millis(millis: i64) -> f64 {
    millis as f64 / MILLIS_PER_HOUR
}

/// Build a fixed offset from a (possibly fractional) hour count.
pub fn fixed_offset_from_hours(hours: f64) -> Option<FixedOffset> {
    if !hours.is_finite() {
        return None;
    }
    FixedOffset::east_opt((hours * 3600.0).round() as i32)
}

/// Parse an intraday sample time such as "08:30:00" or "08:30".
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

/// Interpret a wall-clock time on `date` in the account's timezone and return
/// the absolute instant.
pub fn local_to_utc(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local = NaiveDateTime::new(date, time);
    // A fixed offset has exactly one mapping for every local time.
    let naive_utc = local - Duration::seconds(i64::from(offset.local_minus_utc()));
    Utc.from_utc_datetime(&naive_utc)
}

/// Parse a series `dateTime`, either a bare date (midnight UTC) or RFC 3339.
pub fn parse_series_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
