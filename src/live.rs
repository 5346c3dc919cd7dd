/// Live conditions classifier cycle.
///
/// One call to `run_classifier` is one hourly cycle:
///   1. pick the sites in scope that have a baseline for today's calendar day
///   2. rebuild the snapshot archive from published history inside the trend
///      window
///   3. fetch current readings in batches
///   4. validate and classify each reading, appending it to the archive
///   5. publish the aggregate document and prune expired history copies
///
/// Per-site problems leave the site out of the document and are counted in
/// the summary. Only store failures, or every live batch failing, abort the
/// cycle; in that case nothing is published.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::analysis::trend::TrendPolicy;
use crate::classify::{classify_reading, validate_reading};
use crate::config::ClassifierSettings;
use crate::ingest::LiveSource;
use crate::logging::{self, DataSource};
use crate::model::{
    ClassificationSnapshot, GaugeSite, LiveReading, MonthDay, PercentileBaseline, RunError,
    SiteError, Trend,
};
use crate::publish::{AggregateLiveDocument, Publisher, build_document};
use crate::stations::Scope;
use crate::store::archive::SnapshotArchive;
use crate::store::baselines::{BaselineStore, BaselineTable};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveRunSummary {
    /// Sites in scope before any filtering.
    pub sites_total: usize,
    pub processed: usize,
    /// Omissions keyed by `SiteError::kind`.
    pub omitted: BTreeMap<String, usize>,
    pub rising: usize,
    pub falling: usize,
    pub stable: usize,
    pub unknown: usize,
}

impl LiveRunSummary {
    pub fn omitted_total(&self) -> usize {
        self.omitted.values().sum()
    }

    fn omit(&mut self, err: &SiteError) {
        logging::log_site_omission(DataSource::Live, err);
        *self.omitted.entry(err.kind().to_string()).or_insert(0) += 1;
    }

    fn record(&mut self, snapshot: &ClassificationSnapshot) {
        self.processed += 1;
        match snapshot.trend {
            Trend::Rising => self.rising += 1,
            Trend::Falling => self.falling += 1,
            Trend::Stable => self.stable += 1,
            Trend::Unknown => self.unknown += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveRunOutcome {
    pub document: AggregateLiveDocument,
    pub snapshots: Vec<ClassificationSnapshot>,
    pub summary: LiveRunSummary,
}

/// Sites the cycle covers. A full-scope run is limited to states that have
/// a published partition.
fn sites_in_scope<'a>(
    store: &BaselineStore,
    registry: &'a [GaugeSite],
    scope: &Scope,
) -> Result<Vec<&'a GaugeSite>, RunError> {
    match scope {
        Scope::All => {
            let states = store.list_available_states()?;
            if states.is_empty() {
                logging::warn(DataSource::Live, None, "no baseline partitions published yet");
            }
            Ok(registry
                .iter()
                .filter(|s| states.iter().any(|st| *st == s.state))
                .collect())
        }
        _ => Ok(scope.select(registry)),
    }
}

/// Pair each site with its baseline for `month_day`, omitting sites without one.
fn attach_baselines<'a>(
    store: &BaselineStore,
    sites: &[&'a GaugeSite],
    month_day: MonthDay,
    summary: &mut LiveRunSummary,
) -> Result<Vec<(&'a GaugeSite, PercentileBaseline)>, RunError> {
    let mut partitions: HashMap<String, Option<BaselineTable>> = HashMap::new();
    let mut eligible = Vec::with_capacity(sites.len());

    for site in sites {
        if !partitions.contains_key(&site.state) {
            let table = store.load_partition(&site.state)?;
            partitions.insert(site.state.clone(), table);
        }
        let baseline = partitions
            .get(&site.state)
            .and_then(|t| t.as_ref())
            .and_then(|t| t.get(&site.site_code, month_day));

        match baseline {
            Some(b) => eligible.push((*site, b.clone())),
            None => summary.omit(&SiteError::NoBaseline {
                site: site.site_code.clone(),
                month_day,
            }),
        }
    }
    Ok(eligible)
}

#[derive(Debug)]
struct FetchedReadings {
    readings: HashMap<String, LiveReading>,
    /// Sites whose batch failed; already counted as omitted.
    unavailable: HashSet<String>,
}

/// Fetch readings batch by batch. A failed batch leaves its sites without a
/// reading; every batch failing is fatal.
fn fetch_readings<L: LiveSource>(
    live: &L,
    site_codes: &[&str],
    batch_size: usize,
    summary: &mut LiveRunSummary,
) -> Result<FetchedReadings, RunError> {
    let mut readings = HashMap::new();
    let mut unavailable = HashSet::new();
    let mut batches = 0;
    let mut failed = 0;
    let mut last_error = String::new();

    for batch in site_codes.chunks(batch_size.max(1)) {
        batches += 1;
        match live.latest_readings(batch) {
            Ok(fetched) => {
                for reading in fetched {
                    readings.insert(reading.site_code.clone(), reading);
                }
            }
            Err(e) => {
                failed += 1;
                last_error = e.to_string();
                logging::log_source_failure(DataSource::Live, None, "live batch", &e);
                for code in batch {
                    unavailable.insert(code.to_string());
                    summary.omit(&SiteError::LiveSourceUnavailable {
                        site: code.to_string(),
                        cause: last_error.clone(),
                    });
                }
            }
        }
    }

    if batches > 0 && failed == batches {
        return Err(RunError::LiveSourceDown(last_error));
    }
    Ok(FetchedReadings {
        readings,
        unavailable,
    })
}

/// Run one classification cycle at `now` and publish the result.
pub fn run_classifier<L: LiveSource>(
    live: &L,
    store: &BaselineStore,
    publisher: &Publisher,
    registry: &[GaugeSite],
    scope: &Scope,
    now: DateTime<Utc>,
    settings: &ClassifierSettings,
) -> Result<LiveRunOutcome, RunError> {
    for code in scope.unknown_sites(registry) {
        logging::warn(DataSource::Live, Some(&code), "not in site registry, skipped");
    }

    let sites = sites_in_scope(store, registry, scope)?;
    let mut summary = LiveRunSummary {
        sites_total: sites.len(),
        ..LiveRunSummary::default()
    };

    let month_day = MonthDay::from_date(&now);
    let eligible = attach_baselines(store, &sites, month_day, &mut summary)?;

    // windows are anchored at reading time, which may trail `now` by up to
    // the staleness limit
    let horizon = Duration::hours(settings.trend_window_hours);
    let lookback = horizon + Duration::minutes(settings.max_reading_age_minutes.max(0));
    let mut archive = SnapshotArchive::new(lookback);
    let mut restored = 0;
    for snapshot in publisher.load_history(now - lookback)? {
        if archive.append(snapshot) {
            restored += 1;
        }
    }
    logging::debug(
        DataSource::Archive,
        None,
        &format!(
            "restored {} snapshots inside the {}h window",
            restored, settings.trend_window_hours
        ),
    );

    let codes: Vec<&str> = eligible.iter().map(|(s, _)| s.site_code.as_str()).collect();
    let fetched = fetch_readings(live, &codes, settings.live_batch_size, &mut summary)?;

    let policy = TrendPolicy {
        min_points: settings.trend_min_points,
        threshold_pct: settings.trend_threshold_pct,
    };
    let mut snapshots = Vec::with_capacity(eligible.len());

    for (site, baseline) in &eligible {
        let Some(raw) = fetched.readings.get(&site.site_code) else {
            if !fetched.unavailable.contains(&site.site_code) {
                summary.omit(&SiteError::NoLiveReading(site.site_code.clone()));
            }
            continue;
        };

        let reading = match validate_reading(
            raw,
            now,
            settings.max_reading_age_minutes,
            settings.max_future_minutes,
        ) {
            Ok(reading) => reading,
            Err(e) => {
                summary.omit(&e);
                continue;
            }
        };

        let window = archive.window(&site.site_code, horizon, reading.timestamp);
        let snapshot = classify_reading(&site.state, &reading, baseline, &window, &policy);
        archive.append(snapshot.clone());
        summary.record(&snapshot);
        snapshots.push(snapshot);
    }

    let document = build_document(now, &snapshots);
    publisher.publish(&document)?;

    let retention = Duration::hours(settings.history_retention_hours).max(lookback);
    match publisher.prune_history(now - retention) {
        Ok(0) => {}
        Ok(removed) => logging::debug(
            DataSource::Archive,
            None,
            &format!("pruned {} history copies older than {}h", removed, retention.num_hours()),
        ),
        Err(e) => logging::warn(
            DataSource::Archive,
            None,
            &format!("history pruning failed: {}", e),
        ),
    }

    logging::log_run_summary(
        DataSource::Live,
        "classification cycle",
        summary.sites_total,
        summary.processed,
        summary.omitted_total(),
    );
    logging::info(
        DataSource::Live,
        None,
        &format!(
            "trends: {} rising, {} falling, {} stable, {} unknown",
            summary.rising, summary.falling, summary.stable, summary.unknown
        ),
    );

    Ok(LiveRunOutcome {
        document,
        snapshots,
        summary,
    })
}
