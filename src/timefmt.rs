//! Timestamp normalization for the store.
//!
//! SQLite keeps our timestamp columns as untyped text. Rows written by
//! `CURRENT_TIMESTAMP` defaults, by this crate, by older tools and by hand
//! edits all end up in slightly different layouts, so every read goes through
//! [`normalize`] instead of assuming one format.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};

use crate::error::{Error, Result};

/// A timestamp value as it comes out of a column.
#[derive(Debug, Clone, Copy)]
pub enum RawTime<'a> {
    Instant(DateTime<Utc>),
    Unix(i64),
    /// SQLite's REAL date convention, as produced by `julianday()`.
    JulianDay(f64),
    Text(&'a str),
    Absent,
}

/// Layouts that carry their own offset, tried in order.
const OFFSET_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%dT%H:%M:%S%.f%z"];

/// Layouts without an offset; these are taken as UTC.
const NAIVE_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

const UNIX_EPOCH_JULIAN_DAY: f64 = 2_440_587.5;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Normalize a raw column value. Absent and empty values are `Ok(None)`.
pub fn normalize(raw: RawTime<'_>) -> Result<Option<DateTime<Utc>>> {
    match raw {
        RawTime::Instant(t) => Ok(Some(t)),
        RawTime::Unix(secs) => DateTime::from_timestamp(secs, 0)
            .map(Some)
            .ok_or_else(|| Error::InvalidTimestamp(secs.to_string())),
        RawTime::JulianDay(jd) => {
            let millis = (jd - UNIX_EPOCH_JULIAN_DAY) * MILLIS_PER_DAY;
            if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
                return Err(Error::InvalidTimestamp(jd.to_string()));
            }
            DateTime::from_timestamp_millis(millis.round() as i64)
                .map(Some)
                .ok_or_else(|| Error::InvalidTimestamp(jd.to_string()))
        }
        RawTime::Text(s) if s.trim().is_empty() => Ok(None),
        RawTime::Text(s) => parse_timestamp(s).map(Some),
        RawTime::Absent => Ok(None),
    }
}

/// Parse a non-empty textual timestamp, first matching layout wins.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let s = raw.trim();

    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }

    for candidate in [s, without_zone_suffix(s)] {
        for layout in OFFSET_LAYOUTS {
            if let Ok(t) = DateTime::parse_from_str(candidate, layout) {
                return Ok(t.with_timezone(&Utc));
            }
        }
    }

    for layout in NAIVE_LAYOUTS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, layout) {
            return Ok(t.and_utc());
        }
    }

    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(t.and_utc());
        }
    }

    Err(Error::InvalidTimestamp(raw.to_string()))
}

/// Drop a trailing zone name, either an abbreviation ("... +0000 UTC") or a
/// repeated numeric offset for unnamed zones ("... +0000 +0000").
fn without_zone_suffix(s: &str) -> &str {
    match s.rsplit_once(' ') {
        Some((head, tail)) if is_zone_name(tail) && head.contains(' ') => head,
        _ => s,
    }
}

fn is_zone_name(token: &str) -> bool {
    if !token.is_empty() && token.chars().all(|c| c.is_ascii_alphabetic()) {
        return true;
    }
    match token.strip_prefix(|c: char| c == '+' || c == '-') {
        Some(digits) => digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// The single layout this crate writes. Microseconds keep rows written in
/// the same second ordered.
pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn raw_from_value(value: ValueRef<'_>) -> FromSqlResult<RawTime<'_>> {
    match value {
        ValueRef::Null => Ok(RawTime::Absent),
        ValueRef::Integer(secs) => Ok(RawTime::Unix(secs)),
        ValueRef::Real(jd) => Ok(RawTime::JulianDay(jd)),
        ValueRef::Text(bytes) => std::str::from_utf8(bytes)
            .map(RawTime::Text)
            .map_err(|e| FromSqlError::Other(Box::new(e))),
        ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
    }
}

/// A nullable timestamp column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NullableTime(pub Option<DateTime<Utc>>);

impl FromSql for NullableTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = raw_from_value(value)?;
        normalize(raw)
            .map(NullableTime)
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// A timestamp column that must hold a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequiredTime(pub DateTime<Utc>);

impl FromSql for RequiredTime {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match NullableTime::column_result(value)? {
            NullableTime(Some(t)) => Ok(RequiredTime(t)),
            NullableTime(None) => Err(FromSqlError::Other(Box::new(Error::InvalidTimestamp(
                String::new(),
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_known_layouts() {
        let expected = utc(2024, 1, 15, 10, 30, 0);
        assert_eq!(parse_timestamp("2024-01-15T10:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-15T12:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-15 10:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-15 10:30:00 +0000 UTC").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-15 05:30:00 -0500 EST").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-15 10:30:00 +0000").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-15 10:30:00 +0000 +0000").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-15 11:30:00 +0100 +0100").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-15T10:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-01-15").unwrap(), utc(2024, 1, 15, 0, 0, 0));
    }

    #[test]
    fn test_fractional_seconds() {
        let t = parse_timestamp("2024-01-15 10:30:00.250").unwrap();
        assert_eq!(t.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_empty_is_absent_but_garbage_is_error() {
        assert_eq!(normalize(RawTime::Absent).unwrap(), None);
        assert_eq!(normalize(RawTime::Text("  ")).unwrap(), None);
        assert!(matches!(
            normalize(RawTime::Text("last tuesday")),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_structured_values_pass_through() {
        let t = utc(2023, 6, 1, 0, 0, 0);
        assert_eq!(normalize(RawTime::Instant(t)).unwrap(), Some(t));
        assert_eq!(normalize(RawTime::Unix(t.timestamp())).unwrap(), Some(t));
    }

    #[test]
    fn test_format_round_trips_through_parse() {
        let t = utc(2024, 12, 31, 23, 59, 59);
        assert_eq!(format_timestamp(&t), "2024-12-31T23:59:59.000000Z");
        assert_eq!(parse_timestamp(&format_timestamp(&t)).unwrap(), t);
    }

    #[test]
    fn test_format_keeps_sub_second_order() {
        let earlier = utc(2024, 3, 1, 8, 0, 0) + chrono::Duration::microseconds(1_500);
        let later = earlier + chrono::Duration::microseconds(250);
        let (a, b) = (
            parse_timestamp(&format_timestamp(&earlier)).unwrap(),
            parse_timestamp(&format_timestamp(&later)).unwrap(),
        );
        assert!(a < b);
        assert_eq!(b, later);
    }

    #[test]
    fn test_real_columns_are_julian_days() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let t: NullableTime = conn
            .query_row("SELECT julianday('2024-01-15 10:30:00')", [], |row| row.get(0))
            .unwrap();
        assert_eq!(t.0, Some(utc(2024, 1, 15, 10, 30, 0)));

        assert!(matches!(
            normalize(RawTime::JulianDay(1e300)),
            Err(Error::InvalidTimestamp(_))
        ));
        assert!(matches!(
            normalize(RawTime::JulianDay(f64::NAN)),
            Err(Error::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_column_adapters() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let (a, b, c): (NullableTime, NullableTime, RequiredTime) = conn
            .query_row(
                "SELECT NULL, '', '2024-01-15 10:30:00'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(a.0, None);
        assert_eq!(b.0, None);
        assert_eq!(c.0, utc(2024, 1, 15, 10, 30, 0));

        let bad: rusqlite::Result<RequiredTime> =
            conn.query_row("SELECT NULL", [], |row| row.get(0));
        assert!(bad.is_err());
    }
}
