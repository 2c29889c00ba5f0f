//! Time helpers shared by the worker and notification payloads.
//!
//! Capture timestamps are carried as unix seconds (`f64`) so window
//! arithmetic stays simple; conversion to `DateTime<Utc>` happens at the
//! notification boundary.

use chrono::{DateTime, TimeZone, Utc};

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> f64 {
    to_unix_seconds(Utc::now())
}

/// Convert a UTC datetime to unix seconds.
pub fn to_unix_seconds(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

/// Convert unix seconds to a UTC datetime.
///
/// Returns `None` for non-finite or out-of-range input.
pub fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let millis = (secs * 1000.0).round() as i64;
    Utc.timestamp_millis_opt(millis).single()
}

/// Format an uptime in seconds as `HH:MM:SS`.
///
/// Hours are not wrapped at 24. Negative or non-finite input formats as zero.
///
/// # Examples
/// ```
/// use clipwatch_models::timestamp::format_uptime;
/// assert_eq!(format_uptime(3725.4), "01:02:05");
/// assert_eq!(format_uptime(0.0), "00:00:00");
/// ```
pub fn format_uptime(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(59.9), "00:00:59");
        assert_eq!(format_uptime(90_000.0), "25:00:00");
        assert_eq!(format_uptime(-3.0), "00:00:00");
        assert_eq!(format_uptime(f64::NAN), "00:00:00");
    }

    #[test]
    fn test_unix_round_trip_keeps_millis() {
        let dt = from_unix_seconds(1_700_000_000.25).unwrap();
        assert_eq!(to_unix_seconds(dt), 1_700_000_000.25);
        assert!(from_unix_seconds(f64::INFINITY).is_none());
    }
}
