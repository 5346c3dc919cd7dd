/// Percentile baseline builder.
///
/// For every state touched by the run scope, fetches each in-scope site's
/// daily history, computes its day-of-year thresholds and replaces the
/// state's partition in one atomic write. A partition is only written once
/// every site of its state has been fetched; a source failure aborts the run
/// and leaves that partition as it was.
///
/// Per-site work inside a state runs on up to `workers` scoped threads
/// pulling from a shared index.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crate::analysis::percentiles::compute_site_baselines;
use crate::config::BuilderSettings;
use crate::ingest::HistorySource;
use crate::logging::{self, DataSource};
use crate::model::{GaugeSite, PercentileBaseline, RunError, SiteError, SourceError};
use crate::stations::{self, Scope};
use crate::store::baselines::{BaselineStore, BaselineTable};

/// What a builder run did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildSummary {
    /// Partitions written, ascending.
    pub states: Vec<String>,
    pub sites_total: usize,
    /// Sites that contributed at least one row.
    pub sites_published: usize,
    pub rows_written: usize,
    pub omitted: Vec<SiteError>,
}

type SiteOutcome = Result<Vec<PercentileBaseline>, SourceError>;

/// Fetch and compute baselines for `sites`, preserving their order.
fn compute_state<H: HistorySource + Sync>(
    history: &H,
    state: &str,
    sites: &[&GaugeSite],
    min_years: u32,
    workers: usize,
) -> Result<Vec<Vec<PercentileBaseline>>, RunError> {
    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let results: Mutex<Vec<Option<SiteOutcome>>> = Mutex::new(vec![None; sites.len()]);

    let worker_count = workers.clamp(1, sites.len().max(1));
    let panicked = thread::scope(|scope| {
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            handles.push(scope.spawn(|| {
                loop {
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(site) = sites.get(i) else {
                        break;
                    };

                    let outcome = history
                        .daily_discharge(&site.site_code)
                        .map(|records| {
                            compute_site_baselines(&site.site_code, &records, min_years)
                        });
                    if outcome.is_err() {
                        abort.store(true, Ordering::Relaxed);
                    }
                    if let Ok(mut slots) = results.lock() {
                        slots[i] = Some(outcome);
                    }
                }
            }));
        }

        let joined: Vec<bool> = handles.into_iter().map(|h| h.join().is_err()).collect();
        joined.contains(&true)
    });

    if panicked {
        return Err(RunError::WorkerPanicked(format!("state {}", state)));
    }

    let slots = results
        .into_inner()
        .map_err(|_| RunError::WorkerPanicked(format!("state {}", state)))?;

    // surface the first failure in site order
    let mut outcomes = Vec::with_capacity(slots.len());
    for slot in slots {
        match slot {
            Some(Err(e)) => return Err(RunError::Source(e)),
            Some(Ok(rows)) => outcomes.push(rows),
            None => {}
        }
    }
    if outcomes.len() != sites.len() {
        return Err(RunError::WorkerPanicked(format!("state {}", state)));
    }
    Ok(outcomes)
}

/// Build and publish baseline partitions for everything in `scope`.
pub fn run_builder<H: HistorySource + Sync>(
    history: &H,
    store: &BaselineStore,
    registry: &[GaugeSite],
    scope: &Scope,
    settings: &BuilderSettings,
) -> Result<BuildSummary, RunError> {
    for code in scope.unknown_sites(registry) {
        logging::warn(DataSource::Baselines, Some(&code), "not in site registry, skipped");
    }
    if let Scope::States(states) = scope {
        for state in states {
            if !registry.iter().any(|s| s.state == *state) {
                logging::warn(
                    DataSource::Baselines,
                    None,
                    &format!("no registered sites in state {}", state),
                );
            }
        }
    }

    let selected = scope.select(registry);
    let mut summary = BuildSummary {
        sites_total: selected.len(),
        ..BuildSummary::default()
    };

    for (state, sites) in stations::group_by_state(&selected) {
        logging::info(
            DataSource::Baselines,
            None,
            &format!("building {} sites for {}", sites.len(), state),
        );

        let outcomes = compute_state(history, &state, &sites, settings.min_years, settings.workers)
            .inspect_err(|e| {
                logging::error(
                    DataSource::Baselines,
                    None,
                    &format!("partition {} left unchanged: {}", state, e),
                )
            })?;

        let mut table = if scope.is_site_list() {
            store.load_partition(&state)?.unwrap_or_default()
        } else {
            BaselineTable::new()
        };

        for (site, rows) in sites.iter().zip(outcomes) {
            table.remove_site(&site.site_code);
            if rows.is_empty() {
                let err = SiteError::NoUsableHistory(site.site_code.clone());
                logging::log_site_omission(DataSource::Baselines, &err);
                summary.omitted.push(err);
                continue;
            }
            summary.sites_published += 1;
            for row in rows {
                table.insert(row);
            }
        }

        store.write_partition(&state, &table)?;
        summary.rows_written += table.len();
        logging::info(
            DataSource::Baselines,
            None,
            &format!("wrote {} rows to {}", table.len(), store.partition_path(&state).display()),
        );
        summary.states.push(state);
    }

    logging::log_run_summary(
        DataSource::Baselines,
        "baseline build",
        summary.sites_total,
        summary.sites_published,
        summary.omitted.len(),
    );
    Ok(summary)
}
