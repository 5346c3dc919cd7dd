/// Short-term discharge trend over the rolling snapshot window.
///
/// The series is the archived snapshots inside the lookback window plus the
/// current reading. Trend compares the earliest and latest discharge:
///
///   change % = (latest − earliest) / earliest × 100
///   change > +threshold → rising, change < −threshold → falling, else stable
///
/// and the rate is the change divided by the hours between the two endpoints.

use chrono::{DateTime, Utc};

use crate::model::{ClassificationSnapshot, Trend};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub discharge_cfs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendPolicy {
    /// Fewer points than this yields `Trend::Unknown`.
    pub min_points: usize,
    /// Percent change that separates rising/falling from stable.
    pub threshold_pct: f64,
}

impl Default for TrendPolicy {
    fn default() -> Self {
        TrendPolicy {
            min_points: 4,
            threshold_pct: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendResult {
    pub trend: Trend,
    /// Percent change per hour; `None` whenever the trend is unknown.
    pub rate_per_hour: Option<f64>,
    pub hours_since_peak: Option<f64>,
    pub points: usize,
}

/// Merge archived snapshots with the current reading into a chronological
/// series. A snapshot sharing the current reading's timestamp is replaced by
/// the current reading.
pub fn build_series(window: &[ClassificationSnapshot], current: TrendPoint) -> Vec<TrendPoint> {
    let mut series: Vec<TrendPoint> = window
        .iter()
        .filter(|s| s.timestamp != current.timestamp)
        .map(|s| TrendPoint {
            timestamp: s.timestamp,
            discharge_cfs: s.discharge_cfs,
        })
        .collect();
    series.push(current);
    series.sort_by_key(|p| p.timestamp);
    series
}

/// Trend, rate and time since peak for a chronological series.
pub fn compute_trend(points: &[TrendPoint], policy: &TrendPolicy) -> TrendResult {
    let unknown = TrendResult {
        trend: Trend::Unknown,
        rate_per_hour: None,
        hours_since_peak: hours_since_peak(points),
        points: points.len(),
    };

    if points.len() < policy.min_points.max(2) {
        return unknown;
    }

    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return unknown,
    };

    let elapsed_hours = hours_between(first.timestamp, last.timestamp);
    if elapsed_hours <= 0.0 || first.discharge_cfs <= 0.0 {
        return unknown;
    }

    let change_pct = (last.discharge_cfs - first.discharge_cfs) * 100.0 / first.discharge_cfs;
    let trend = if change_pct > policy.threshold_pct {
        Trend::Rising
    } else if change_pct < -policy.threshold_pct {
        Trend::Falling
    } else {
        Trend::Stable
    };

    TrendResult {
        trend,
        rate_per_hour: Some(change_pct / elapsed_hours),
        ..unknown
    }
}

/// Hours from the highest discharge to the latest point.
///
/// Ties resolve to the most recent occurrence of the maximum. `None` when the
/// series is empty or the maximum is the latest point.
pub fn hours_since_peak(points: &[TrendPoint]) -> Option<f64> {
    let last = points.last()?;
    let peak = points
        .iter()
        .fold(points[0], |peak, p| if p.discharge_cfs >= peak.discharge_cfs { *p } else { peak });

    if peak.timestamp >= last.timestamp {
        None
    } else {
        Some(hours_between(peak.timestamp, last.timestamp))
    }
}

fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / 3600.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
