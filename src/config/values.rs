// src/config/values.rs

//! Parsers for scalar values that TOML has no native type for.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;
    let unit = unit_part.trim().to_lowercase();

    let secs = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{s}' is too large"))
    };

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => secs(1),
        "m" => secs(60),
        "h" => secs(60 * 60),
        _ => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}

/// Parse a logical date: either `YYYY-MM-DD` (midnight UTC) or RFC 3339.
pub fn parse_logical_date(s: &str) -> Result<DateTime<Utc>, String> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| format!("invalid logical date '{s}'"));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid logical date '{s}': expected YYYY-MM-DD or RFC 3339 ({e})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn durations() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn bad_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("15").is_err());
        assert!(parse_duration("3d").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn logical_dates() {
        assert_eq!(
            parse_logical_date("2018-11-01").unwrap(),
            Utc.with_ymd_and_hms(2018, 11, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_logical_date("2018-11-01T13:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2018, 11, 1, 11, 30, 0).unwrap()
        );
        assert!(parse_logical_date("11/01/2018").is_err());
    }
}
