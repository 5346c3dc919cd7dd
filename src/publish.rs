/// Aggregate live-status document and its publication.
///
/// Each classifier cycle produces one `AggregateLiveDocument` holding every
/// processed site keyed by site id. The publisher writes it twice under
/// `<data_dir>/live_output/`:
///
///   current_status.json              replaced every cycle
///   history/YYYY-MM-DDTHHMM.json     one per cycle, keyed by generation minute
///
/// Both writes go through `store::write_atomic`. The history copies double as
/// the persisted snapshot archive: the next cycle reads back the ones inside
/// the trend horizon to rebuild its window, and copies older than the
/// configured retention are pruned.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::{self, DataSource};
use crate::model::{ClassificationSnapshot, DroughtStatus, FlowStatus, StoreError, Trend};
use crate::store::write_atomic;

pub const CURRENT_FILE: &str = "current_status.json";
const HISTORY_DIR: &str = "history";
const HISTORY_KEY_FORMAT: &str = "%Y-%m-%dT%H%M";

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Published conditions for one site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConditions {
    pub flow: f64,
    pub gage_height: Option<f64>,
    pub water_temp: Option<f64>,
    pub percentile: f64,
    pub flow_status: FlowStatus,
    pub drought_status: Option<DroughtStatus>,
    pub trend: Trend,
    pub trend_rate: Option<f64>,
    pub hours_since_peak: Option<f64>,
    #[serde(default, alias = "state")]
    pub region: String,
    /// Reading timestamp. Older documents lack it; readers fall back to the
    /// document's `generated_at`.
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateLiveDocument {
    pub generated_at: DateTime<Utc>,
    pub site_count: usize,
    pub sites: BTreeMap<String, SiteConditions>,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

impl SiteConditions {
    pub fn from_snapshot(snapshot: &ClassificationSnapshot) -> Self {
        SiteConditions {
            flow: snapshot.discharge_cfs,
            gage_height: snapshot.gage_height_ft,
            water_temp: snapshot.water_temp_c,
            percentile: snapshot.percentile_rank,
            flow_status: snapshot.flow_status,
            drought_status: snapshot.drought_status,
            trend: snapshot.trend,
            trend_rate: snapshot.trend_rate_per_hour.map(|r| round_to(r, 2)),
            hours_since_peak: snapshot.hours_since_peak.map(|h| round_to(h, 1)),
            region: snapshot.region.clone(),
            observed_at: Some(snapshot.timestamp),
        }
    }

    /// Rebuild the snapshot this entry was published from.
    pub fn to_snapshot(
        &self,
        site_code: &str,
        fallback_time: DateTime<Utc>,
    ) -> ClassificationSnapshot {
        ClassificationSnapshot {
            site_code: site_code.to_string(),
            region: self.region.clone(),
            timestamp: self.observed_at.unwrap_or(fallback_time),
            discharge_cfs: self.flow,
            gage_height_ft: self.gage_height,
            water_temp_c: self.water_temp,
            percentile_rank: self.percentile,
            flow_status: self.flow_status,
            drought_status: self.drought_status,
            trend: self.trend,
            trend_rate_per_hour: self.trend_rate,
            hours_since_peak: self.hours_since_peak,
        }
    }
}

/// Assemble the aggregate document. A later snapshot for the same site
/// replaces an earlier one.
pub fn build_document(
    generated_at: DateTime<Utc>,
    snapshots: &[ClassificationSnapshot],
) -> AggregateLiveDocument {
    let sites: BTreeMap<String, SiteConditions> = snapshots
        .iter()
        .map(|s| (s.site_code.clone(), SiteConditions::from_snapshot(s)))
        .collect();

    AggregateLiveDocument {
        generated_at,
        site_count: sites.len(),
        sites,
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Publisher {
    root: PathBuf,
}

impl Publisher {
    pub fn new(data_dir: &Path) -> Self {
        Publisher {
            root: data_dir.join("live_output"),
        }
    }

    pub fn current_path(&self) -> PathBuf {
        self.root.join(CURRENT_FILE)
    }

    pub fn history_path(&self, generated_at: DateTime<Utc>) -> PathBuf {
        self.root
            .join(HISTORY_DIR)
            .join(format!("{}.json", generated_at.format(HISTORY_KEY_FORMAT)))
    }

    /// Replace the current document, then write the history copy. A failed
    /// current write leaves no history copy behind for the next cycle to
    /// load. Returns the history path.
    pub fn publish(&self, document: &AggregateLiveDocument) -> Result<PathBuf, StoreError> {
        let mut body = serde_json::to_string_pretty(document)
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        body.push('\n');

        write_atomic(&self.current_path(), body.as_bytes())?;
        let history = self.history_path(document.generated_at);
        write_atomic(&history, body.as_bytes())?;

        logging::info(
            DataSource::Archive,
            None,
            &format!(
                "published {} sites to {}",
                document.site_count,
                history.display()
            ),
        );
        Ok(history)
    }

    pub fn load_current(&self) -> Result<Option<AggregateLiveDocument>, StoreError> {
        let path = self.current_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StoreError::Decode {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    /// Every history copy with its generation minute, oldest first. Files
    /// whose names are not history keys are ignored.
    fn history_entries(&self) -> Result<Vec<(DateTime<Utc>, PathBuf)>, StoreError> {
        let dir = self.root.join(HISTORY_DIR);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(key) = name.strip_suffix(".json") else {
                continue;
            };
            let Ok(naive) = NaiveDateTime::parse_from_str(key, HISTORY_KEY_FORMAT) else {
                continue;
            };
            found.push((naive.and_utc(), entry.path()));
        }

        found.sort();
        Ok(found)
    }

    /// History copies generated at or after `since`, oldest first.
    pub fn list_history(&self, since: DateTime<Utc>) -> Result<Vec<PathBuf>, StoreError> {
        // keys are truncated to the minute
        let earliest_key = since - Duration::minutes(1);
        Ok(self
            .history_entries()?
            .into_iter()
            .filter(|(generated, _)| *generated > earliest_key)
            .map(|(_, path)| path)
            .collect())
    }

    /// Delete history copies that `list_history(before)` would no longer
    /// return. Returns how many were removed.
    pub fn prune_history(&self, before: DateTime<Utc>) -> Result<usize, StoreError> {
        let earliest_key = before - Duration::minutes(1);
        let mut removed = 0;
        for (generated, path) in self.history_entries()? {
            if generated > earliest_key {
                break;
            }
            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Snapshots recorded in the history copies since `since`.
    ///
    /// Unreadable files and malformed site entries are skipped with a
    /// warning; only directory-level I/O failures are errors.
    pub fn load_history(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClassificationSnapshot>, StoreError> {
        let mut snapshots = Vec::new();

        for path in self.list_history(since)? {
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| {
                    serde_json::from_str::<serde_json::Value>(&text).map_err(|e| e.to_string())
                });
            let document = match parsed {
                Ok(value) => value,
                Err(e) => {
                    logging::warn(
                        DataSource::Archive,
                        None,
                        &format!("skipping unreadable history file {}: {}", path.display(), e),
                    );
                    continue;
                }
            };
            snapshots.extend(snapshots_from_document(&document, &path));
        }

        Ok(snapshots)
    }
}

fn snapshots_from_document(
    document: &serde_json::Value,
    path: &Path,
) -> Vec<ClassificationSnapshot> {
    let generated_at = document
        .get("generated_at")
        .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok());
    let (Some(generated_at), Some(sites)) =
        (generated_at, document.get("sites").and_then(|s| s.as_object()))
    else {
        logging::warn(
            DataSource::Archive,
            None,
            &format!("skipping malformed history file {}", path.display()),
        );
        return Vec::new();
    };

    let mut snapshots = Vec::with_capacity(sites.len());
    for (site_code, entry) in sites {
        match serde_json::from_value::<SiteConditions>(entry.clone()) {
            Ok(conditions) => snapshots.push(conditions.to_snapshot(site_code, generated_at)),
            Err(e) => logging::warn(
                DataSource::Archive,
                Some(site_code),
                &format!("skipping malformed entry in {}: {}", path.display(), e),
            ),
        }
    }
    snapshots
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 18, h, m, 0).unwrap()
    }

    fn snapshot(site: &str, timestamp: DateTime<Utc>, flow: f64) -> ClassificationSnapshot {
        ClassificationSnapshot {
            site_code: site.to_string(),
            region: "VT".into(),
            timestamp,
            discharge_cfs: flow,
            gage_height_ft: Some(3.1),
            water_temp_c: None,
            percentile_rank: 42.5,
            flow_status: FlowStatus::Normal,
            drought_status: None,
            trend: Trend::Rising,
            trend_rate_per_hour: Some(0.624999),
            hours_since_peak: None,
        }
    }

    #[test]
    fn test_document_shape_and_labels() {
        let doc = build_document(at(15, 0), &[snapshot("01144000", at(14, 45), 400.0)]);
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["generated_at"], "2026-02-18T15:00:00Z");
        assert_eq!(json["site_count"], 1);
        let site = &json["sites"]["01144000"];
        assert_eq!(site["flow"], 400.0);
        assert_eq!(site["percentile"], 42.5);
        assert_eq!(site["flow_status"], "Normal");
        assert_eq!(site["drought_status"], serde_json::Value::Null);
        assert_eq!(site["trend"], "rising");
        assert_eq!(site["trend_rate"], 0.62);
        assert_eq!(site["region"], "VT");
        assert_eq!(site["observed_at"], "2026-02-18T14:45:00Z");
    }

    #[test]
    fn test_drought_label_serializes_with_category() {
        let mut s = snapshot("01144000", at(14, 45), 40.0);
        s.flow_status = FlowStatus::MuchBelowNormal;
        s.drought_status = Some(DroughtStatus::D2SevereDrought);
        let json = serde_json::to_value(build_document(at(15, 0), &[s])).unwrap();
        assert_eq!(json["sites"]["01144000"]["flow_status"], "Much Below Normal");
        assert_eq!(json["sites"]["01144000"]["drought_status"], "D2 - Severe Drought");
    }

    #[test]
    fn test_publish_writes_current_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path());
        let doc = build_document(at(15, 7), &[snapshot("01144000", at(15, 0), 400.0)]);

        let history = publisher.publish(&doc).unwrap();
        assert!(history.ends_with("live_output/history/2026-02-18T1507.json"));
        assert_eq!(publisher.load_current().unwrap(), Some(doc.clone()));
        assert_eq!(
            fs::read(&history).unwrap(),
            fs::read(publisher.current_path()).unwrap()
        );
    }

    #[test]
    fn test_history_roundtrips_into_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path());
        publisher
            .publish(&build_document(at(10, 0), &[snapshot("A", at(9, 45), 100.0)]))
            .unwrap();
        publisher
            .publish(&build_document(at(11, 0), &[snapshot("A", at(10, 45), 110.0)]))
            .unwrap();

        let loaded = publisher.load_history(at(10, 30)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].timestamp, at(10, 45));
        assert_eq!(loaded[0].discharge_cfs, 110.0);

        assert_eq!(publisher.load_history(at(0, 0)).unwrap().len(), 2);
    }

    #[test]
    fn test_legacy_and_malformed_history_entries() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path());
        let history_dir = dir.path().join("live_output").join("history");
        fs::create_dir_all(&history_dir).unwrap();

        // entry without observed_at, keyed "state" instead of "region"
        let legacy = r#"{
            "generated_at": "2026-02-18T12:00:00Z",
            "site_count": 2,
            "sites": {
                "01010000": {"flow": 55.0, "gage_height": null, "water_temp": null,
                             "percentile": 20.0, "flow_status": "Below Normal",
                             "drought_status": "D0 - Abnormally Dry", "trend": "stable",
                             "trend_rate": 0.1, "hours_since_peak": null, "state": "ME"},
                "01020000": {"flow": "not a number"}
            }
        }"#;
        fs::write(history_dir.join("2026-02-18T1200.json"), legacy).unwrap();
        fs::write(history_dir.join("2026-02-18T1300.json"), "{ truncated").unwrap();
        fs::write(history_dir.join("notes.txt"), "ignored").unwrap();

        let loaded = publisher.load_history(at(0, 0)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].site_code, "01010000");
        assert_eq!(loaded[0].region, "ME");
        assert_eq!(loaded[0].timestamp, at(12, 0));
        assert_eq!(loaded[0].drought_status, Some(DroughtStatus::D0AbnormallyDry));
    }

    #[test]
    fn test_failed_current_write_leaves_no_history_copy() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path());
        // a directory in place of the current document makes the rename fail
        fs::create_dir_all(publisher.current_path().join("blocked")).unwrap();

        let doc = build_document(at(15, 0), &[snapshot("01144000", at(14, 45), 400.0)]);
        assert!(publisher.publish(&doc).is_err());
        assert!(publisher.list_history(at(0, 0)).unwrap().is_empty());
        assert!(publisher.load_history(at(0, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_prune_history_keeps_copies_inside_retention() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path());
        for h in [8, 9, 10, 11] {
            publisher
                .publish(&build_document(at(h, 0), &[snapshot("A", at(h, 0), 100.0)]))
                .unwrap();
        }

        assert_eq!(publisher.prune_history(at(10, 0)).unwrap(), 2);
        let left = publisher.list_history(at(0, 0)).unwrap();
        assert_eq!(left.len(), 2);
        assert!(left[0].ends_with("2026-02-18T1000.json"));
        assert_eq!(publisher.load_current().unwrap().unwrap().generated_at, at(11, 0));

        assert_eq!(publisher.prune_history(at(10, 0)).unwrap(), 0);
    }

    #[test]
    fn test_missing_output_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path());
        assert_eq!(publisher.load_current().unwrap(), None);
        assert!(publisher.list_history(at(0, 0)).unwrap().is_empty());
    }
}
