/// Percentile rank and status labels for a live discharge.
///
/// The rank is read off the seven (threshold, percentile) breakpoints of the
/// day's baseline by piecewise-linear interpolation. Below p05 and above p95
/// the nearest non-flat interval's slope is extended, and the result is
/// clamped to 0–100.
///
/// Labels come from one breakpoint table, half-open intervals `[lo, hi)`:
///
/// | rank    | flow status       | drought status        |
/// |---------|-------------------|-----------------------|
/// | < 5     | Much Below Normal | D2 - Severe Drought   |
/// | 5–10    | Much Below Normal | D1 - Moderate Drought |
/// | 10–25   | Below Normal      | D0 - Abnormally Dry   |
/// | 25–75   | Normal            |                       |
/// | 75–90   | Above Normal      |                       |
/// | ≥ 90    | Much Above Normal |                       |

use crate::model::{DroughtStatus, FlowStatus, PERCENTILE_LEVELS, Thresholds};

/// Exclusive upper bound of each rank band with the labels it maps to.
const STATUS_BANDS: [(f64, FlowStatus, Option<DroughtStatus>); 6] = [
    (5.0, FlowStatus::MuchBelowNormal, Some(DroughtStatus::D2SevereDrought)),
    (10.0, FlowStatus::MuchBelowNormal, Some(DroughtStatus::D1ModerateDrought)),
    (25.0, FlowStatus::BelowNormal, Some(DroughtStatus::D0AbnormallyDry)),
    (75.0, FlowStatus::Normal, None),
    (90.0, FlowStatus::AboveNormal, None),
    (f64::INFINITY, FlowStatus::MuchAboveNormal, None),
];

/// Continuous percentile rank of `discharge_cfs` under `thresholds`, 0–100.
pub fn percentile_rank(discharge_cfs: f64, thresholds: &Thresholds) -> f64 {
    let values = thresholds.values();
    let levels = PERCENTILE_LEVELS;
    let last = values.len() - 1;

    let rank = if discharge_cfs < values[0] {
        match edge_slope(&values, &levels, Edge::Low) {
            Some(slope) => levels[0] - (values[0] - discharge_cfs) * slope,
            None => 0.0,
        }
    } else if discharge_cfs > values[last] {
        match edge_slope(&values, &levels, Edge::High) {
            Some(slope) => levels[last] + (discharge_cfs - values[last]) * slope,
            None => 100.0,
        }
    } else {
        interpolate_within(discharge_cfs, &values, &levels)
    };

    rank.clamp(0.0, 100.0)
}

/// Rank as published: one decimal place. Labels derive from this value.
pub fn round_rank(rank: f64) -> f64 {
    (rank * 10.0).round() / 10.0
}

pub fn flow_status(rank: f64) -> FlowStatus {
    status_for(rank).0
}

pub fn drought_status(rank: f64) -> Option<DroughtStatus> {
    status_for(rank).1
}

pub fn status_for(rank: f64) -> (FlowStatus, Option<DroughtStatus>) {
    STATUS_BANDS
        .iter()
        .find(|(upper, _, _)| rank < *upper)
        .map(|(_, flow, drought)| (*flow, *drought))
        .unwrap_or((FlowStatus::MuchAboveNormal, None))
}

#[derive(Clone, Copy)]
enum Edge {
    Low,
    High,
}

/// Slope (percentile per cfs) of the non-flat interval nearest the given edge.
fn edge_slope(values: &[f64; 7], levels: &[f64; 7], edge: Edge) -> Option<f64> {
    let slope = |i: usize| {
        let dv = values[i + 1] - values[i];
        (dv > 0.0).then(|| (levels[i + 1] - levels[i]) / dv)
    };
    match edge {
        Edge::Low => (0..values.len() - 1).find_map(slope),
        Edge::High => (0..values.len() - 1).rev().find_map(slope),
    }
}

/// `discharge_cfs` lies within `[values[0], values[6]]`.
fn interpolate_within(discharge_cfs: f64, values: &[f64; 7], levels: &[f64; 7]) -> f64 {
    for i in 0..values.len() - 1 {
        let (lo, hi) = (values[i], values[i + 1]);
        if discharge_cfs <= hi {
            if hi > lo {
                return levels[i] + (discharge_cfs - lo) / (hi - lo) * (levels[i + 1] - levels[i]);
            }
            return levels[i];
        }
    }
    levels[levels.len() - 1]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> Thresholds {
        Thresholds::from_values([50.0, 80.0, 150.0, 400.0, 900.0, 1500.0, 2200.0])
    }

    #[test]
    fn test_median_flow_ranks_at_fifty() {
        let rank = round_rank(percentile_rank(400.0, &reference()));
        assert_eq!(rank, 50.0);
        assert_eq!(status_for(rank), (FlowStatus::Normal, None));
    }

    #[test]
    fn test_flow_below_p05_is_extrapolated_not_clamped() {
        let rank = round_rank(percentile_rank(40.0, &reference()));
        // slope of the p05–p10 interval is 5 / 30 per cfs
        assert_eq!(rank, 3.3);
        assert!(rank < 5.0);
        assert_eq!(flow_status(rank), FlowStatus::MuchBelowNormal);
        assert_eq!(drought_status(rank), Some(DroughtStatus::D2SevereDrought));
    }

    #[test]
    fn test_extrapolation_is_clamped_to_valid_range() {
        assert_eq!(percentile_rank(0.0, &reference()), 0.0);
        assert_eq!(percentile_rank(1_000_000.0, &reference()), 100.0);
        // p90–p95 slope is 5 / 700 per cfs
        let rank = percentile_rank(2900.0, &reference());
        assert!((rank - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_thresholds_hit_exactly_return_their_level() {
        let t = reference();
        for (value, level) in t.values().iter().zip(PERCENTILE_LEVELS) {
            assert!((percentile_rank(*value, &t) - level).abs() < 1e-9);
        }
    }

    #[test]
    fn test_rank_is_monotonic_in_discharge() {
        let flat_middle = Thresholds::from_values([0.0, 0.0, 10.0, 10.0, 10.0, 40.0, 40.0]);
        for t in [reference(), flat_middle] {
            let mut previous = f64::NEG_INFINITY;
            let mut flow = 0.0;
            while flow < 3000.0 {
                let rank = percentile_rank(flow, &t);
                assert!(
                    rank >= previous,
                    "rank decreased at {} cfs: {} < {}",
                    flow,
                    rank,
                    previous
                );
                previous = rank;
                flow += 0.5;
            }
        }
    }

    #[test]
    fn test_all_flat_thresholds() {
        let t = Thresholds::from_values([25.0; 7]);
        assert_eq!(percentile_rank(10.0, &t), 0.0);
        assert_eq!(percentile_rank(25.0, &t), 5.0);
        assert_eq!(percentile_rank(30.0, &t), 100.0);
    }

    #[test]
    fn test_status_bands_are_half_open() {
        assert_eq!(
            status_for(4.9),
            (FlowStatus::MuchBelowNormal, Some(DroughtStatus::D2SevereDrought))
        );
        assert_eq!(
            status_for(5.0),
            (FlowStatus::MuchBelowNormal, Some(DroughtStatus::D1ModerateDrought))
        );
        assert_eq!(
            status_for(10.0),
            (FlowStatus::BelowNormal, Some(DroughtStatus::D0AbnormallyDry))
        );
        assert_eq!(status_for(25.0), (FlowStatus::Normal, None));
        assert_eq!(status_for(74.9), (FlowStatus::Normal, None));
        assert_eq!(status_for(75.0), (FlowStatus::AboveNormal, None));
        assert_eq!(status_for(89.9), (FlowStatus::AboveNormal, None));
        assert_eq!(status_for(90.0), (FlowStatus::MuchAboveNormal, None));
        assert_eq!(status_for(100.0), (FlowStatus::MuchAboveNormal, None));
    }
}
