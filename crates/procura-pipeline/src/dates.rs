//! Registry date parsing.
//!
//! Accepted forms:
//!
//! - `2023-01-05` (ISO date)
//! - `2023-01-05T14:30:00Z`, `2023-01-05T14:30:00-04:00`, `2023-01-05 00:00:00`
//!   (ISO date-time; offset forms become the UTC calendar date)
//! - `/Date(1672876800000)/` (ASP.NET JSON date; milliseconds when the
//!   magnitude exceeds 10^12, seconds otherwise)
//! - `05/01/2023` (slash date, read in the configured day/month order)
//!
//! Two-digit years are never accepted.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

use crate::config::SlashDateOrder;

const MILLIS_THRESHOLD: u64 = 1_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateParseError {
    #[error("empty date")]
    Empty,

    #[error("ambiguous date '{0}'")]
    Ambiguous(String),

    #[error("unrecognized date '{0}'")]
    Unrecognized(String),

    #[error("date out of range '{0}'")]
    OutOfRange(String),
}

pub fn parse_date(input: &str, order: SlashDateOrder) -> Result<NaiveDate, DateParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DateParseError::Empty);
    }
    if let Some(inner) = s.strip_prefix("/Date(").and_then(|r| r.strip_suffix(")/")) {
        return parse_epoch(inner, s);
    }
    if s.contains('/') {
        return parse_slash(s, order);
    }
    parse_iso(s)
}

/// `/Date(...)/` body: signed integer, optionally followed by a `+hhmm`
/// offset which does not move the instant.
fn parse_epoch(inner: &str, original: &str) -> Result<NaiveDate, DateParseError> {
    let digits_end = inner
        .char_indices()
        .skip(1)
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(inner.len());
    let value: i64 = inner[..digits_end]
        .parse()
        .map_err(|_| DateParseError::Unrecognized(original.to_string()))?;
    let instant = if value.unsigned_abs() > MILLIS_THRESHOLD {
        DateTime::<Utc>::from_timestamp_millis(value)
    } else {
        DateTime::<Utc>::from_timestamp(value, 0)
    };
    instant
        .map(|dt| dt.date_naive())
        .ok_or_else(|| DateParseError::OutOfRange(original.to_string()))
}

fn parse_slash(s: &str, order: SlashDateOrder) -> Result<NaiveDate, DateParseError> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit())) {
        return Err(DateParseError::Unrecognized(s.to_string()));
    }
    let num = |p: &str| p.parse::<u32>().map_err(|_| DateParseError::Unrecognized(s.to_string()));

    // YYYY/MM/DD is unambiguous whatever the configured order.
    if parts[0].len() == 4 {
        let (y, m, d) = (num(parts[0])?, num(parts[1])?, num(parts[2])?);
        return ymd(y as i32, m, d, s);
    }
    if parts[2].len() != 4 {
        return Err(DateParseError::Ambiguous(s.to_string()));
    }
    let year = num(parts[2])? as i32;
    let (a, b) = (num(parts[0])?, num(parts[1])?);
    match order {
        SlashDateOrder::DayFirst => ymd(year, b, a, s),
        SlashDateOrder::MonthFirst => ymd(year, a, b, s),
        SlashDateOrder::Reject => Err(DateParseError::Ambiguous(s.to_string())),
    }
}

fn ymd(year: i32, month: u32, day: u32, original: &str) -> Result<NaiveDate, DateParseError> {
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| DateParseError::OutOfRange(original.to_string()))
}

fn parse_iso(s: &str) -> Result<NaiveDate, DateParseError> {
    let bytes = s.as_bytes();
    let four_digit_year =
        bytes.len() >= 10 && bytes[..4].iter().all(u8::is_ascii_digit) && bytes[4] == b'-';
    if !four_digit_year {
        return Err(DateParseError::Unrecognized(s.to_string()));
    }
    if s.len() == 10 {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| DateParseError::OutOfRange(s.to_string()));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }
    Err(DateParseError::Unrecognized(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn parse(s: &str) -> Result<NaiveDate, DateParseError> {
        parse_date(s, SlashDateOrder::DayFirst)
    }

    #[test]
    fn iso_date() {
        assert_eq!(parse("2023-01-05").unwrap(), date("2023-01-05"));
        assert_eq!(parse(" 2023-01-05 ").unwrap(), date("2023-01-05"));
    }

    #[test]
    fn iso_datetime_variants() {
        assert_eq!(parse("2023-01-05T14:30:00").unwrap(), date("2023-01-05"));
        assert_eq!(parse("2023-01-05 00:00:00").unwrap(), date("2023-01-05"));
        assert_eq!(parse("2023-01-05T14:30:00.123Z").unwrap(), date("2023-01-05"));
        // 22:00 at -04:00 is 02:00 UTC the next day.
        assert_eq!(parse("2023-01-05T22:00:00-04:00").unwrap(), date("2023-01-06"));
    }

    #[test]
    fn aspnet_epoch_extremes_are_out_of_range() {
        assert!(matches!(
            parse("/Date(-9223372036854775808)/"),
            Err(DateParseError::OutOfRange(_))
        ));
        assert!(matches!(
            parse("/Date(9223372036854775807)/"),
            Err(DateParseError::OutOfRange(_))
        ));
    }

    #[test]
    fn aspnet_epoch_millis_and_seconds() {
        assert_eq!(parse("/Date(1672876800000)/").unwrap(), date("2023-01-05"));
        assert_eq!(parse("/Date(1672876800)/").unwrap(), date("2023-01-05"));
        assert_eq!(parse("/Date(1672876800000-0400)/").unwrap(), date("2023-01-05"));
        assert_eq!(parse("/Date(-86400)/").unwrap(), date("1969-12-31"));
    }

    #[test]
    fn aspnet_garbage() {
        assert!(matches!(parse("/Date(abc)/"), Err(DateParseError::Unrecognized(_))));
    }

    #[test]
    fn slash_day_first() {
        assert_eq!(parse("05/01/2023").unwrap(), date("2023-01-05"));
        assert_eq!(parse("31/12/2023").unwrap(), date("2023-12-31"));
    }

    #[test]
    fn slash_month_first() {
        let d = parse_date("01/05/2023", SlashDateOrder::MonthFirst).unwrap();
        assert_eq!(d, date("2023-01-05"));
    }

    #[test]
    fn slash_rejected_when_configured() {
        assert!(matches!(
            parse_date("05/01/2023", SlashDateOrder::Reject),
            Err(DateParseError::Ambiguous(_))
        ));
    }

    #[test]
    fn year_first_slash_ignores_order() {
        let d = parse_date("2023/01/05", SlashDateOrder::Reject).unwrap();
        assert_eq!(d, date("2023-01-05"));
    }

    #[test]
    fn two_digit_years_are_ambiguous() {
        assert!(matches!(parse("05/01/23"), Err(DateParseError::Ambiguous(_))));
        assert!(matches!(parse("23-01-05"), Err(DateParseError::Unrecognized(_))));
    }

    #[test]
    fn impossible_dates() {
        assert!(matches!(parse("2023-02-30"), Err(DateParseError::OutOfRange(_))));
        assert!(matches!(parse("13/13/2023"), Err(DateParseError::OutOfRange(_))));
    }

    #[test]
    fn garbage() {
        assert_eq!(parse(""), Err(DateParseError::Empty));
        assert!(matches!(parse("January 5th"), Err(DateParseError::Unrecognized(_))));
        assert!(matches!(parse("5/1"), Err(DateParseError::Unrecognized(_))));
    }
}
