//! Parsing of the `modified_since` filter.
//!
//! Accepted forms (case-insensitive, surrounding whitespace ignored):
//! - empty: no filter
//! - RFC 3339 timestamp: `2024-03-01T12:00:00+02:00`
//! - naive date or date-time, read as UTC: `2024-03-01`, `2024-03-01 12:00:00`
//! - `now`, `today`, `yesterday`
//! - `last day|week|month|year`
//! - `<n> <unit>[s] ago` with unit `minute`, `hour`, `day`, `week`, `month`, `year`

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::ConfigError;

const FIELD: &str = "extract.modified_since";

fn unit_duration(unit: &str, amount: i64) -> Option<Duration> {
    let unit = unit.strip_suffix('s').unwrap_or(unit);
    match unit {
        "minute" | "min" => Duration::try_minutes(amount),
        "hour" => Duration::try_hours(amount),
        "day" => Duration::try_days(amount),
        "week" => Duration::try_weeks(amount),
        "month" => amount.checked_mul(30).and_then(Duration::try_days),
        "year" => amount.checked_mul(365).and_then(Duration::try_days),
        _ => None,
    }
}

fn before(now: DateTime<Utc>, unit: &str, amount: i64) -> Option<DateTime<Utc>> {
    unit_duration(unit, amount).and_then(|d| now.checked_sub_signed(d))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Resolve a `modified_since` value relative to `now`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] when the value matches none of the
/// accepted forms.
pub fn parse_modified_since(
    input: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, ConfigError> {
    let value = input.trim().to_ascii_lowercase();
    if value.is_empty() {
        return Ok(None);
    }

    match value.as_str() {
        "now" => return Ok(Some(now)),
        "today" => return Ok(Some(start_of_day(now.date_naive()))),
        "yesterday" => return Ok(Some(start_of_day(now.date_naive()) - Duration::days(1))),
        _ => {}
    }

    if let Some(unit) = value.strip_prefix("last ") {
        return before(now, unit.trim(), 1)
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(FIELD, format!("unknown unit in '{input}'")));
    }

    if let Some(rest) = value.strip_suffix(" ago") {
        let mut parts = rest.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ConfigError::invalid(
                FIELD,
                format!("expected '<n> <unit> ago', got '{input}'"),
            ));
        };
        let amount: i64 = amount
            .parse()
            .map_err(|_| ConfigError::invalid(FIELD, format!("'{amount}' is not a number")))?;
        return before(now, unit, amount)
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(FIELD, format!("unknown unit '{unit}'")));
    }

    let raw = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Some(ts.and_utc()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Some(start_of_day(date)));
    }

    Err(ConfigError::invalid(
        FIELD,
        format!("'{input}' is neither a date nor a relative phrase"),
    ))
}
