/// Live reading staleness detection.
///
/// USGS gauges update every 15 minutes under normal conditions, but the
/// instantaneous-values service keeps returning the last value it has for a
/// gauge whose telemetry has stopped. Classifying such a value against
/// today's baseline would publish an old condition as current, so readings
/// past a freshness limit are omitted for the cycle.
///
/// # Clock injection
/// Functions take a `now: DateTime<Utc>` parameter rather than calling
/// `Utc::now()` internally, so staleness is deterministic in tests.

use chrono::{DateTime, Utc};

use crate::model::LiveReading;

/// Whole minutes between the reading and `now`. Negative for readings
/// stamped in the future.
pub fn reading_age_minutes(reading: &LiveReading, now: DateTime<Utc>) -> i64 {
    (now - reading.timestamp).num_minutes()
}

/// Returns `true` if the reading is older than `max_age_minutes` relative to
/// `now`.
///
/// Staleness is defined as strictly greater than the threshold:
///   age > max_age_minutes  →  stale
///   age == max_age_minutes →  not stale
pub fn is_stale_at(reading: &LiveReading, max_age_minutes: i64, now: DateTime<Utc>) -> bool {
    reading_age_minutes(reading, now) > max_age_minutes
}

/// Returns `true` if the reading is stamped more than `tolerance_minutes`
/// ahead of `now`, which points at a gauge clock fault.
pub fn is_ahead_at(reading: &LiveReading, tolerance_minutes: i64, now: DateTime<Utc>) -> bool {
    -reading_age_minutes(reading, now) > tolerance_minutes
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reading_at(timestamp: DateTime<Utc>) -> LiveReading {
        LiveReading {
            site_code: "05568500".to_string(),
            timestamp,
            discharge_cfs: Some(42_300.0),
            gage_height_ft: Some(14.2),
            water_temp_c: None,
        }
    }

    /// A fixed "now" used across all tests: 2024-05-01 13:00:00 UTC.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    }

    fn minutes_ago(minutes: i64) -> DateTime<Utc> {
        fixed_now() - chrono::Duration::minutes(minutes)
    }

    // --- Not stale ----------------------------------------------------------

    #[test]
    fn test_reading_5_minutes_old_is_not_stale() {
        let reading = reading_at(minutes_ago(5));
        assert!(!is_stale_at(&reading, 15, fixed_now()));
    }

    #[test]
    fn test_reading_exactly_at_threshold_is_not_stale() {
        let reading = reading_at(minutes_ago(15));
        assert!(
            !is_stale_at(&reading, 15, fixed_now()),
            "reading exactly at threshold (15 min) should not be stale; \
             staleness is strictly greater than, not >=",
        );
    }

    #[test]
    fn test_reading_from_the_future_is_not_stale() {
        let reading = reading_at(fixed_now() + chrono::Duration::minutes(10));
        assert_eq!(reading_age_minutes(&reading, fixed_now()), -10);
        assert!(!is_stale_at(&reading, 15, fixed_now()));
    }

    #[test]
    fn test_reading_slightly_ahead_is_tolerated() {
        let reading = reading_at(fixed_now() + chrono::Duration::minutes(15));
        assert!(!is_ahead_at(&reading, 15, fixed_now()));
        assert!(!is_ahead_at(&reading_at(minutes_ago(300)), 15, fixed_now()));
    }

    #[test]
    fn test_reading_hours_ahead_is_flagged() {
        let reading = reading_at(fixed_now() + chrono::Duration::hours(3));
        assert!(is_ahead_at(&reading, 15, fixed_now()));
        assert!(!is_stale_at(&reading, 15, fixed_now()));
    }

    // --- Stale --------------------------------------------------------------

    #[test]
    fn test_reading_one_minute_past_threshold_is_stale() {
        let reading = reading_at(minutes_ago(16));
        assert!(is_stale_at(&reading, 15, fixed_now()));
    }

    #[test]
    fn test_reading_from_2020_is_stale_under_any_threshold() {
        let reading = reading_at(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        assert!(is_stale_at(&reading, 180, fixed_now()));
    }

    // --- Threshold variation ------------------------------------------------

    #[test]
    fn test_same_reading_stale_under_tight_threshold_not_under_loose() {
        let reading = reading_at(minutes_ago(30));
        assert!(is_stale_at(&reading, 20, fixed_now()));
        assert!(!is_stale_at(&reading, 60, fixed_now()));
    }
}
