use crate::domain::errors::{PipelineError, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Parses a target offset such as `"+09:00"`, `"-05:00"`, `"UTC"` or `"Z"`.
pub fn parse_offset(value: &str) -> Result<FixedOffset> {
    let parse_err = || PipelineError::Parse {
        what: "timezone offset",
        value: value.to_string(),
    };

    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("utc") || trimmed == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(parse_err);
    }

    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(parse_err()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| parse_err())?;
    let minutes: i32 = minutes.parse().map_err(|_| parse_err())?;
    if hours > 23 || minutes > 59 {
        return Err(parse_err());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(parse_err)
}

/// Parses a provider timestamp and converts it to `target`.
///
/// Offset-aware strings keep their offset before conversion; naive
/// datetimes and plain dates are taken to be UTC.
pub fn parse_timestamp(value: &str, target: &FixedOffset) -> Result<DateTime<FixedOffset>> {
    let trimmed = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(target));
    }
    if let Ok(ts) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(ts.with_timezone(target));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive).with_timezone(target));
        }
    }
    if let Some(naive) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive).with_timezone(target));
    }
    Err(PipelineError::Parse {
        what: "timestamp",
        value: value.to_string(),
    })
}
