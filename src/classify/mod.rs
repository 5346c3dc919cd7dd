/// Live reading classification against the day-of-year baseline.
///
/// `validate_reading` screens a raw reading (missing, malformed, stale or
/// future-dated discharge leaves the site out of the cycle), and `classify_reading` turns a
/// validated reading, its baseline and the site's archived window into a
/// `ClassificationSnapshot`. Both are pure; identical inputs give identical
/// snapshots.
///
/// Submodules:
/// - `thresholds`: percentile rank and the status breakpoint table.
/// - `staleness`: reading freshness checks.

pub mod staleness;
pub mod thresholds;

use chrono::{DateTime, Utc};

use crate::analysis::trend::{self, TrendPoint, TrendPolicy};
use crate::model::{ClassificationSnapshot, LiveReading, PercentileBaseline, SiteError};

/// Gage heights at or below this are sensor faults, not stage.
const MIN_PLAUSIBLE_GAGE_HEIGHT_FT: f64 = -100.0;
/// Water temperatures at or below this are sensor faults.
const MIN_PLAUSIBLE_WATER_TEMP_C: f64 = -50.0;

/// A reading that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedReading {
    pub site_code: String,
    pub timestamp: DateTime<Utc>,
    pub discharge_cfs: f64,
    pub gage_height_ft: Option<f64>,
    pub water_temp_c: Option<f64>,
}

/// Screen a raw reading.
///
/// Discharge problems reject the reading. Implausible gage height or water
/// temperature values are dropped to `None` instead, since the site can still
/// be classified on discharge alone.
pub fn validate_reading(
    reading: &LiveReading,
    now: DateTime<Utc>,
    max_age_minutes: i64,
    max_future_minutes: i64,
) -> Result<ValidatedReading, SiteError> {
    let discharge_cfs = reading
        .discharge_cfs
        .ok_or_else(|| SiteError::MissingDischarge(reading.site_code.clone()))?;

    if !discharge_cfs.is_finite() || discharge_cfs < 0.0 {
        return Err(SiteError::MalformedDischarge {
            site: reading.site_code.clone(),
            value: discharge_cfs,
        });
    }

    if staleness::is_stale_at(reading, max_age_minutes, now) {
        return Err(SiteError::StaleReading {
            site: reading.site_code.clone(),
            age_minutes: staleness::reading_age_minutes(reading, now),
        });
    }

    if staleness::is_ahead_at(reading, max_future_minutes, now) {
        return Err(SiteError::FutureReading {
            site: reading.site_code.clone(),
            ahead_minutes: -staleness::reading_age_minutes(reading, now),
        });
    }

    Ok(ValidatedReading {
        site_code: reading.site_code.clone(),
        timestamp: reading.timestamp,
        discharge_cfs,
        gage_height_ft: reading
            .gage_height_ft
            .filter(|v| v.is_finite() && *v > MIN_PLAUSIBLE_GAGE_HEIGHT_FT),
        water_temp_c: reading
            .water_temp_c
            .filter(|v| v.is_finite() && *v > MIN_PLAUSIBLE_WATER_TEMP_C),
    })
}

/// Classify one validated reading.
///
/// `window` holds the site's archived snapshots inside the trend lookback;
/// the current reading is merged into it before the trend is computed.
pub fn classify_reading(
    region: &str,
    reading: &ValidatedReading,
    baseline: &PercentileBaseline,
    window: &[ClassificationSnapshot],
    policy: &TrendPolicy,
) -> ClassificationSnapshot {
    let rank = thresholds::round_rank(thresholds::percentile_rank(
        reading.discharge_cfs,
        &baseline.thresholds,
    ));
    let (flow_status, drought_status) = thresholds::status_for(rank);

    let series = trend::build_series(
        window,
        TrendPoint {
            timestamp: reading.timestamp,
            discharge_cfs: reading.discharge_cfs,
        },
    );
    let trend = trend::compute_trend(&series, policy);

    ClassificationSnapshot {
        site_code: reading.site_code.clone(),
        region: region.to_string(),
        timestamp: reading.timestamp,
        discharge_cfs: reading.discharge_cfs,
        gage_height_ft: reading.gage_height_ft,
        water_temp_c: reading.water_temp_c,
        percentile_rank: rank,
        flow_status,
        drought_status,
        trend: trend.trend,
        trend_rate_per_hour: trend.rate_per_hour,
        hours_since_peak: trend.hours_since_peak,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DroughtStatus, FlowStatus, MonthDay, Thresholds, Trend};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 18, 15, 0, 0).unwrap()
    }

    fn baseline() -> PercentileBaseline {
        PercentileBaseline {
            site_code: "01144000".into(),
            month_day: MonthDay::new(2, 18).unwrap(),
            thresholds: Thresholds::from_values([50.0, 80.0, 150.0, 400.0, 900.0, 1500.0, 2200.0]),
            sample_years: 25,
        }
    }

    fn raw(discharge: Option<f64>) -> LiveReading {
        LiveReading {
            site_code: "01144000".into(),
            timestamp: now() - Duration::minutes(10),
            discharge_cfs: discharge,
            gage_height_ft: Some(5.2),
            water_temp_c: Some(1.5),
        }
    }

    fn validated(discharge: f64) -> ValidatedReading {
        validate_reading(&raw(Some(discharge)), now(), 180, 15).expect("reading should validate")
    }

    fn window_snapshot(hours_ago: i64, flow: f64) -> ClassificationSnapshot {
        let mut s = classify_reading(
            "VT",
            &validated(flow),
            &baseline(),
            &[],
            &TrendPolicy::default(),
        );
        s.timestamp = now() - Duration::minutes(10) - Duration::hours(hours_ago);
        s
    }

    #[test]
    fn test_normal_flow_snapshot() {
        let snapshot = classify_reading(
            "VT",
            &validated(400.0),
            &baseline(),
            &[],
            &TrendPolicy::default(),
        );
        assert_eq!(snapshot.percentile_rank, 50.0);
        assert_eq!(snapshot.flow_status, FlowStatus::Normal);
        assert_eq!(snapshot.drought_status, None);
        assert_eq!(snapshot.trend, Trend::Unknown);
        assert_eq!(snapshot.trend_rate_per_hour, None);
        assert_eq!(snapshot.region, "VT");
        assert_eq!(snapshot.gage_height_ft, Some(5.2));
    }

    #[test]
    fn test_low_flow_snapshot_reports_drought() {
        let snapshot = classify_reading(
            "VT",
            &validated(40.0),
            &baseline(),
            &[],
            &TrendPolicy::default(),
        );
        assert!(snapshot.percentile_rank < 5.0);
        assert_eq!(snapshot.flow_status, FlowStatus::MuchBelowNormal);
        assert_eq!(snapshot.drought_status, Some(DroughtStatus::D2SevereDrought));
    }

    #[test]
    fn test_trend_uses_window_plus_current_reading() {
        let window = vec![
            window_snapshot(24, 100.0),
            window_snapshot(16, 100.0),
            window_snapshot(8, 100.0),
        ];
        let snapshot = classify_reading(
            "VT",
            &validated(115.0),
            &baseline(),
            &window,
            &TrendPolicy::default(),
        );
        assert_eq!(snapshot.trend, Trend::Rising);
        let rate = snapshot.trend_rate_per_hour.unwrap();
        assert!((rate - 0.625).abs() < 1e-9, "rate was {}", rate);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let window = vec![window_snapshot(3, 380.0), window_snapshot(2, 420.0)];
        let reading = validated(410.0);
        let a = classify_reading("VT", &reading, &baseline(), &window, &TrendPolicy::default());
        let b = classify_reading("VT", &reading, &baseline(), &window, &TrendPolicy::default());
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_discharge_is_rejected() {
        let err = validate_reading(&raw(None), now(), 180, 15).unwrap_err();
        assert_eq!(err, SiteError::MissingDischarge("01144000".into()));
    }

    #[test]
    fn test_negative_or_nan_discharge_is_malformed() {
        let err = validate_reading(&raw(Some(-3.0)), now(), 180, 15).unwrap_err();
        assert_eq!(err.kind(), "malformed_discharge");
        let err = validate_reading(&raw(Some(f64::NAN)), now(), 180, 15).unwrap_err();
        assert_eq!(err.kind(), "malformed_discharge");
    }

    #[test]
    fn test_stale_reading_is_rejected() {
        let mut reading = raw(Some(400.0));
        reading.timestamp = now() - Duration::hours(5);
        let err = validate_reading(&reading, now(), 180, 15).unwrap_err();
        assert_eq!(
            err,
            SiteError::StaleReading {
                site: "01144000".into(),
                age_minutes: 300
            }
        );
    }

    #[test]
    fn test_reading_from_a_fast_gauge_clock_is_rejected() {
        let mut reading = raw(Some(400.0));
        reading.timestamp = now() + Duration::hours(2);
        let err = validate_reading(&reading, now(), 180, 15).unwrap_err();
        assert_eq!(
            err,
            SiteError::FutureReading {
                site: "01144000".into(),
                ahead_minutes: 120
            }
        );

        reading.timestamp = now() + Duration::minutes(5);
        assert!(validate_reading(&reading, now(), 180, 15).is_ok());
    }

    #[test]
    fn test_implausible_auxiliary_values_become_null() {
        let mut reading = raw(Some(400.0));
        reading.gage_height_ft = Some(-999999.0);
        reading.water_temp_c = Some(-60.0);
        let valid = validate_reading(&reading, now(), 180, 15).unwrap();
        assert_eq!(valid.gage_height_ft, None);
        assert_eq!(valid.water_temp_c, None);
        assert_eq!(valid.discharge_cfs, 400.0);
    }
}
