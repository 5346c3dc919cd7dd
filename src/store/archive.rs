/// Rolling per-site window of classification snapshots.
///
/// Each site keeps a `VecDeque` ordered by timestamp. `append` drops entries
/// older than `newest - retention` as it goes, but `window` filters by its
/// own bounds regardless, so a query never depends on when eviction last ran.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

use crate::model::ClassificationSnapshot;

#[derive(Debug, Clone)]
pub struct SnapshotArchive {
    retention: Duration,
    sites: HashMap<String, VecDeque<ClassificationSnapshot>>,
}

impl SnapshotArchive {
    pub fn new(retention: Duration) -> Self {
        SnapshotArchive {
            retention,
            sites: HashMap::new(),
        }
    }

    /// Add a snapshot. Returns `false` (and changes nothing) when the site
    /// already holds a snapshot with the same timestamp.
    pub fn append(&mut self, snapshot: ClassificationSnapshot) -> bool {
        let entries = self.sites.entry(snapshot.site_code.clone()).or_default();

        let position = entries.partition_point(|s| s.timestamp < snapshot.timestamp);
        if entries
            .get(position)
            .is_some_and(|s| s.timestamp == snapshot.timestamp)
        {
            return false;
        }
        entries.insert(position, snapshot);

        if let Some(newest) = entries.back().map(|s| s.timestamp) {
            let cutoff = newest - self.retention;
            while entries.front().is_some_and(|s| s.timestamp < cutoff) {
                entries.pop_front();
            }
        }
        true
    }

    /// Snapshots for `site_code` with `as_of - horizon <= timestamp <= as_of`,
    /// oldest first.
    pub fn window(
        &self,
        site_code: &str,
        horizon: Duration,
        as_of: DateTime<Utc>,
    ) -> Vec<ClassificationSnapshot> {
        let start = as_of - horizon;
        self.sites
            .get(site_code)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|s| s.timestamp >= start && s.timestamp <= as_of)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of snapshots currently held for `site_code`.
    pub fn len(&self, site_code: &str) -> usize {
        self.sites.get(site_code).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.sites.values().all(VecDeque::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowStatus, Trend};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 18, 0, 0, 0).unwrap()
    }

    fn snap(site: &str, hours: i64, flow: f64) -> ClassificationSnapshot {
        ClassificationSnapshot {
            site_code: site.to_string(),
            region: "VT".into(),
            timestamp: t0() + Duration::hours(hours),
            discharge_cfs: flow,
            gage_height_ft: None,
            water_temp_c: None,
            percentile_rank: 50.0,
            flow_status: FlowStatus::Normal,
            drought_status: None,
            trend: Trend::Unknown,
            trend_rate_per_hour: None,
            hours_since_peak: None,
        }
    }

    #[test]
    fn test_append_is_idempotent_per_timestamp() {
        let mut archive = SnapshotArchive::new(Duration::hours(24));
        assert!(archive.append(snap("A", 1, 100.0)));
        assert!(!archive.append(snap("A", 1, 999.0)));
        assert_eq!(archive.len("A"), 1);
        let window = archive.window("A", Duration::hours(24), t0() + Duration::hours(2));
        assert_eq!(window[0].discharge_cfs, 100.0);
    }

    #[test]
    fn test_out_of_order_appends_come_back_sorted() {
        let mut archive = SnapshotArchive::new(Duration::hours(24));
        for h in [5, 1, 3, 2, 4] {
            archive.append(snap("A", h, h as f64));
        }
        let flows: Vec<f64> = archive
            .window("A", Duration::hours(24), t0() + Duration::hours(5))
            .iter()
            .map(|s| s.discharge_cfs)
            .collect();
        assert_eq!(flows, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_append_evicts_entries_past_retention() {
        let mut archive = SnapshotArchive::new(Duration::hours(24));
        archive.append(snap("A", 0, 1.0));
        archive.append(snap("A", 10, 2.0));
        archive.append(snap("A", 30, 3.0));
        // cutoff is hour 6
        assert_eq!(archive.len("A"), 2);
    }

    #[test]
    fn test_window_bounds_are_inclusive_and_lazy() {
        let mut archive = SnapshotArchive::new(Duration::hours(1000));
        for h in 0..=30 {
            archive.append(snap("A", h, h as f64));
        }
        let as_of = t0() + Duration::hours(28);
        let window = archive.window("A", Duration::hours(24), as_of);
        assert_eq!(window.first().unwrap().timestamp, t0() + Duration::hours(4));
        assert_eq!(window.last().unwrap().timestamp, as_of);
        assert_eq!(window.len(), 25);
    }

    #[test]
    fn test_sites_are_independent() {
        let mut archive = SnapshotArchive::new(Duration::hours(24));
        archive.append(snap("A", 1, 1.0));
        archive.append(snap("B", 1, 2.0));
        assert_eq!(archive.len("A"), 1);
        assert!(archive.window("C", Duration::hours(24), t0()).is_empty());
        assert!(!archive.is_empty());
    }
}
