//! Wire time and duration formats used by the diagnostic endpoints.
//!
//! Timestamps use `YYYY-MM-DD HH:MM:SS[.ffffff]`; lock durations use
//! `HH:MM:SS[.fffffffff]`; slow-event durations are integer microseconds.

use crate::CoreError;
use chrono::{Duration, NaiveDateTime, Timelike};

/// Parse layout for wire timestamps. `%.f` makes the fraction optional.
pub const WIRE_TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.f";

const NANOS_DIGITS: usize = 9;

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

pub fn parse_wire_time(s: &str) -> Result<NaiveDateTime, CoreError> {
    NaiveDateTime::parse_from_str(s.trim(), WIRE_TIME_LAYOUT)
        .map_err(|e| CoreError::TimeFormat(format!("'{s}': {e}")))
}

/// Format a timestamp with microsecond precision, dropping trailing zeros
/// of the fraction (and the fraction itself when it is zero).
pub fn format_wire_time(t: &NaiveDateTime) -> String {
    let base = t.format("%Y-%m-%d %H:%M:%S").to_string();
    let micros = t.nanosecond() / 1_000;
    if micros == 0 {
        return base;
    }
    let frac = format!("{micros:06}");
    format!("{base}.{}", frac.trim_end_matches('0'))
}

// ---------------------------------------------------------------------------
// Durations
// ---------------------------------------------------------------------------

/// Parse `HH:MM:SS[.fffffffff]`. The fraction is right-padded or truncated
/// to nanoseconds.
pub fn parse_duration(s: &str) -> Result<Duration, CoreError> {
    let trimmed = s.trim();
    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() != 3 {
        return Err(CoreError::Duration(format!(
            "expected HH:MM:SS[.fff...], got '{s}'"
        )));
    }

    let hours = parse_component(parts[0], "hours", s)?;
    let minutes = parse_component(parts[1], "minutes", s)?;

    let (secs_str, frac_str) = match parts[2].split_once('.') {
        Some((secs, frac)) => (secs, Some(frac)),
        None => (parts[2], None),
    };
    let seconds = parse_component(secs_str, "seconds", s)?;

    let nanos = match frac_str {
        Some(frac) => {
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CoreError::Duration(format!(
                    "invalid fractional seconds in '{s}'"
                )));
            }
            let mut digits: String = frac.chars().take(NANOS_DIGITS).collect();
            while digits.len() < NANOS_DIGITS {
                digits.push('0');
            }
            digits
                .parse::<i64>()
                .map_err(|e| CoreError::Duration(format!("invalid fractional seconds: {e}")))?
        }
        None => 0,
    };

    Ok(Duration::seconds(hours * 3600 + minutes * 60 + seconds) + Duration::nanoseconds(nanos))
}

fn parse_component(value: &str, what: &str, whole: &str) -> Result<i64, CoreError> {
    value
        .parse::<u32>()
        .map(i64::from)
        .map_err(|e| CoreError::Duration(format!("invalid {what} in '{whole}': {e}")))
}

/// Format as `HH:MM:SS[.fffffffff]` with trailing fraction zeros removed.
pub fn format_duration(d: &Duration) -> String {
    let total_secs = d.num_seconds().max(0);
    let nanos = (*d - Duration::seconds(total_secs))
        .num_nanoseconds()
        .unwrap_or(0)
        .max(0);

    let base = format!(
        "{:02}:{:02}:{:02}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60
    );
    if nanos == 0 {
        return base;
    }
    let frac = format!("{nanos:09}");
    format!("{base}.{}", frac.trim_end_matches('0'))
}

/// Fractional seconds, as used for display (`%0.4f`).
pub fn duration_secs_f64(d: &Duration) -> f64 {
    match d.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => d.num_seconds() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn parses_lock_duration() {
        let d = parse_duration("01:02:03.456789").unwrap();
        assert_eq!(d.num_seconds(), 3723);
        assert_eq!(d.num_microseconds().unwrap(), 3_723_456_789);
        assert_eq!(parse_duration(&format_duration(&d)).unwrap(), d);
    }

    #[test]
    fn fraction_is_padded_and_truncated() {
        let d = parse_duration("00:00:01.5").unwrap();
        assert_eq!(d.num_milliseconds(), 1500);

        let d = parse_duration("00:00:00.1234567891").unwrap();
        assert_eq!(d.num_nanoseconds().unwrap(), 123_456_789);
    }

    #[test]
    fn rejects_malformed_durations() {
        assert!(parse_duration("01:02").is_err());
        assert!(parse_duration("01:02:03:04").is_err());
        assert!(parse_duration("aa:02:03").is_err());
        assert!(parse_duration("00:00:01.").is_err());
        assert!(parse_duration("00:00:01.x").is_err());
        assert!(parse_duration("-1:00:00").is_err());
    }

    #[test]
    fn formats_whole_durations_without_fraction() {
        assert_eq!(format_duration(&Duration::seconds(30)), "00:00:30");
        assert_eq!(format_duration(&Duration::seconds(3600 * 26 + 61)), "26:01:01");
        assert_eq!(format_duration(&Duration::milliseconds(1500)), "00:00:01.5");
    }

    #[test]
    fn wire_time_round_trip() {
        let t = parse_wire_time("2024-03-01 10:20:30.123456").unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_micro_opt(10, 20, 30, 123_456)
            .unwrap();
        assert_eq!(t, expected);
        assert_eq!(format_wire_time(&t), "2024-03-01 10:20:30.123456");

        let whole = parse_wire_time("2024-03-01 10:20:30").unwrap();
        assert_eq!(format_wire_time(&whole), "2024-03-01 10:20:30");

        let short = parse_wire_time("2024-03-01 10:20:30.5").unwrap();
        assert_eq!(format_wire_time(&short), "2024-03-01 10:20:30.5");
    }

    #[test]
    fn rejects_bad_wire_time() {
        assert!(parse_wire_time("2024-03-01T10:20:30").is_err());
        assert!(parse_wire_time("").is_err());
    }

    #[test]
    fn seconds_as_float() {
        let d = Duration::microseconds(10_500_000);
        assert!((duration_secs_f64(&d) - 10.5).abs() < f64::EPSILON);
    }
}
