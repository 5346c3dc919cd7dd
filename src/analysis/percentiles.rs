/// Day-of-year percentile thresholds.
///
/// Every calendar day (February 29 included, as its own key) is computed
/// independently from the values recorded on that exact date in each year of
/// the record. Neighbouring days never contribute samples.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::model::{DailyDischarge, MonthDay, PERCENTILE_LEVELS, PercentileBaseline, Thresholds};

/// Percentile of an ascending slice by linear interpolation between order
/// statistics: `h = (n - 1) * pct / 100`, then interpolate between
/// `sorted[floor(h)]` and the next value.
///
/// Returns `None` for an empty slice or a percentile outside 0–100.
pub fn percentile_linear(sorted: &[f64], pct: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=100.0).contains(&pct) {
        return None;
    }

    let h = (sorted.len() - 1) as f64 * pct / 100.0;
    let lo = h.floor() as usize;
    let frac = h - lo as f64;

    match sorted.get(lo + 1) {
        Some(next) if frac > 0.0 => Some(sorted[lo] + frac * (next - sorted[lo])),
        _ => Some(sorted[lo]),
    }
}

/// Daily values usable for statistics: finite and non-negative. This drops
/// the USGS no-data sentinel.
pub fn is_usable(discharge_cfs: f64) -> bool {
    discharge_cfs.is_finite() && discharge_cfs >= 0.0
}

/// Groups usable values by calendar day, one value per date.
///
/// When the history repeats a date the last record wins, so each group holds
/// exactly one value per contributing year.
pub fn group_by_month_day(records: &[DailyDischarge]) -> BTreeMap<MonthDay, Vec<f64>> {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in records {
        if is_usable(record.discharge_cfs) {
            by_date.insert(record.date, record.discharge_cfs);
        }
    }

    let mut groups: BTreeMap<MonthDay, Vec<f64>> = BTreeMap::new();
    for (date, value) in by_date {
        groups.entry(MonthDay::from_date(&date)).or_default().push(value);
    }
    groups
}

/// Seven thresholds for one day's samples. `samples` is sorted in place.
pub fn thresholds_for(samples: &mut [f64]) -> Option<Thresholds> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.total_cmp(b));

    let mut values = [0.0; 7];
    for (slot, pct) in values.iter_mut().zip(PERCENTILE_LEVELS) {
        *slot = percentile_linear(samples, pct)?;
    }
    // rounding at interval boundaries must not break ordering
    for i in 1..values.len() {
        if values[i] < values[i - 1] {
            values[i] = values[i - 1];
        }
    }
    Some(Thresholds::from_values(values))
}

/// All publishable baselines for one site, ordered by calendar day.
///
/// Days with fewer than `min_years` contributing years are left out. An empty
/// result means the site has no usable history and is omitted from the
/// partition.
pub fn compute_site_baselines(
    site_code: &str,
    records: &[DailyDischarge],
    min_years: u32,
) -> Vec<PercentileBaseline> {
    let min_years = min_years.max(1) as usize;

    group_by_month_day(records)
        .into_iter()
        .filter(|(_, samples)| samples.len() >= min_years)
        .filter_map(|(month_day, mut samples)| {
            let sample_years = samples.len() as u32;
            thresholds_for(&mut samples).map(|thresholds| PercentileBaseline {
                site_code: site_code.to_string(),
                month_day,
                thresholds,
                sample_years,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn record(y: i32, m: u32, d: u32, v: f64) -> DailyDischarge {
        DailyDischarge {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            discharge_cfs: v,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_percentile_linear_matches_order_statistic_interpolation() {
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_close(percentile_linear(&sorted, 50.0).unwrap(), 30.0);
        // h = 4 * 0.05 = 0.2 → 10 + 0.2 * 10
        assert_close(percentile_linear(&sorted, 5.0).unwrap(), 12.0);
        // h = 4 * 0.75 = 3.0 → exactly the fourth value
        assert_close(percentile_linear(&sorted, 75.0).unwrap(), 40.0);
        assert_close(percentile_linear(&sorted, 100.0).unwrap(), 50.0);
        assert_close(percentile_linear(&[1.0, 2.0, 3.0, 4.0], 50.0).unwrap(), 2.5);
    }

    #[test]
    fn test_percentile_linear_edge_inputs() {
        assert_eq!(percentile_linear(&[], 50.0), None);
        assert_eq!(percentile_linear(&[7.0], 95.0), Some(7.0));
        assert_eq!(percentile_linear(&[1.0, 2.0], 101.0), None);
    }

    #[test]
    fn test_one_row_per_day_with_enough_years() {
        let records: Vec<_> = (2000..2010)
            .flat_map(|y| vec![record(y, 3, 1, 100.0 + y as f64), record(y, 3, 2, 50.0)])
            .collect();
        let rows = compute_site_baselines("01010000", &records, 5);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].month_day, MonthDay::new(3, 1).unwrap());
        assert_eq!(rows[0].sample_years, 10);
        assert!(rows[0].thresholds.is_non_decreasing());
        assert_close(rows[1].thresholds.p50, 50.0);
    }

    #[test]
    fn test_days_below_minimum_years_are_omitted() {
        let mut records: Vec<_> = (2000..2006).map(|y| record(y, 7, 4, 300.0)).collect();
        records.extend((2000..2003).map(|y| record(y, 7, 5, 300.0)));

        let rows = compute_site_baselines("01010000", &records, 5);
        assert_eq!(rows.len(), 1, "only 07-04 has 5+ years");
        assert_eq!(rows[0].month_day.to_string(), "07-04");
        assert_eq!(rows[0].sample_years, 6);
    }

    #[test]
    fn test_empty_history_produces_no_rows() {
        assert!(compute_site_baselines("01010000", &[], 1).is_empty());
    }

    #[test]
    fn test_february_29_is_computed_from_leap_years_only() {
        let mut records = Vec::new();
        for y in 2000..2024 {
            records.push(record(y, 2, 28, 10.0));
        }
        for y in [2000, 2004, 2008, 2012, 2016, 2020] {
            records.push(record(y, 2, 29, 999.0));
        }

        let rows = compute_site_baselines("01010000", &records, 5);
        let feb28 = rows.iter().find(|r| r.month_day.to_string() == "02-28").unwrap();
        let feb29 = rows.iter().find(|r| r.month_day.to_string() == "02-29").unwrap();

        assert_eq!(feb28.sample_years, 24);
        assert_eq!(feb29.sample_years, 6);
        assert_close(feb28.thresholds.p95, 10.0);
        assert_close(feb29.thresholds.p05, 999.0);
    }

    #[test]
    fn test_exact_day_only_no_neighbouring_days() {
        // Exact-day aggregation: a day with 4 years stays unpublished even
        // though its neighbours carry many more samples.
        let mut records = Vec::new();
        for y in 1990..2020 {
            records.push(record(y, 6, 14, 1.0));
            records.push(record(y, 6, 16, 1.0));
        }
        for y in 2016..2020 {
            records.push(record(y, 6, 15, 500.0));
        }

        let rows = compute_site_baselines("01010000", &records, 5);
        assert!(rows.iter().all(|r| r.month_day.to_string() != "06-15"));
        assert!(rows.iter().all(|r| r.thresholds.p95 == 1.0));
    }

    #[test]
    fn test_invalid_values_and_duplicate_dates() {
        let records = vec![
            record(2001, 1, 1, -999999.0),
            record(2002, 1, 1, f64::NAN),
            record(2003, 1, 1, 40.0),
            record(2003, 1, 1, 60.0), // duplicate date: last wins
            record(2004, 1, 1, 0.0),
        ];
        let rows = compute_site_baselines("01010000", &records, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sample_years, 2);
        assert_close(rows[0].thresholds.p05, 3.0);
        assert_close(rows[0].thresholds.p95, 57.0);
    }

    #[test]
    fn test_thresholds_are_non_decreasing_for_irregular_history() {
        // Deterministic pseudo-random series with spikes and repeats.
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        let mut records = Vec::new();
        for y in 1980..2024 {
            for (m, d) in [(1, 15), (4, 1), (8, 20), (11, 30)] {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                let v = match state % 5 {
                    0 => 0.0,
                    1 => 12.5,
                    _ => (state % 100_000) as f64 / 7.0,
                };
                records.push(record(y, m, d, v));
            }
        }

        let rows = compute_site_baselines("01010000", &records, 5);
        assert_eq!(rows.len(), 4);
        for row in rows {
            assert!(
                row.thresholds.is_non_decreasing(),
                "thresholds out of order on {}: {:?}",
                row.month_day,
                row.thresholds
            );
            assert_eq!(row.sample_years, 44);
        }
    }
}
