/// USGS NWIS water services client.
///
/// Two endpoints are used:
///   - Daily values (`/nwis/dv/`), statistic 00003 (mean) of parameter 00060,
///     for the baseline builder's per-site history.
///   - Instantaneous values (`/nwis/iv/`), parameters 00060, 00065 and 00010,
///     for the classifier's current readings. With no period argument the
///     service returns only the newest value per parameter.
///
/// Both return WaterML-flavoured JSON:
///
/// ```text
/// value.timeSeries[]
///   sourceInfo.siteCode[0].value      site number
///   variable.variableCode[0].value    parameter code
///   values[].value[]                  { value: "123", dateTime, qualifiers }
/// ```
///
/// Values arrive as strings; the no-data sentinel (-999999) marks gaps.
///
/// API Documentation: https://waterservices.usgs.gov/docs/

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::config::HttpSettings;
use crate::ingest::{HistorySource, LiveSource, RetryPolicy, with_retry};
use crate::logging::{self, DataSource};
use crate::model::{
    DailyDischarge, LiveReading, NO_DATA_SENTINEL, PARAM_DISCHARGE, PARAM_STAGE,
    PARAM_WATER_TEMP, STAT_DAILY_MEAN, SourceError,
};

const USGS_BASE_URL: &str = "https://waterservices.usgs.gov/nwis";

// ============================================================================
// WaterML JSON Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct WaterMlResponse {
    pub value: WaterMlValue,
}

#[derive(Debug, Deserialize)]
pub struct WaterMlValue {
    #[serde(rename = "timeSeries", default)]
    pub time_series: Vec<TimeSeries>,
}

/// One parameter at one site.
#[derive(Debug, Deserialize)]
pub struct TimeSeries {
    #[serde(rename = "sourceInfo")]
    pub source_info: SourceInfo,
    pub variable: Variable,
    #[serde(default)]
    pub values: Vec<ValueBlock>,
}

#[derive(Debug, Deserialize)]
pub struct SourceInfo {
    #[serde(rename = "siteCode", default)]
    pub site_code: Vec<CodeEntry>,
}

#[derive(Debug, Deserialize)]
pub struct Variable {
    #[serde(rename = "variableCode", default)]
    pub variable_code: Vec<CodeEntry>,
    #[serde(rename = "noDataValue", default)]
    pub no_data_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CodeEntry {
    pub value: String,
}

/// Values for one method/sensor of a series.
#[derive(Debug, Deserialize)]
pub struct ValueBlock {
    #[serde(default)]
    pub value: Vec<ValuePoint>,
}

#[derive(Debug, Deserialize)]
pub struct ValuePoint {
    pub value: String,
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(default)]
    pub qualifiers: Vec<String>,
}

impl TimeSeries {
    fn site(&self) -> Option<&str> {
        self.source_info.site_code.first().map(|c| c.value.as_str())
    }

    fn parameter(&self) -> Option<&str> {
        self.variable.variable_code.first().map(|c| c.value.as_str())
    }

    fn points(&self) -> impl Iterator<Item = &ValuePoint> {
        self.values.iter().flat_map(|block| block.value.iter())
    }

    /// Numeric value of a point, `None` for gaps and unparseable text.
    fn measurement(&self, point: &ValuePoint) -> Option<f64> {
        let value: f64 = point.value.trim().parse().ok()?;
        let no_data = self.variable.no_data_value.unwrap_or(NO_DATA_SENTINEL);
        if value == no_data || value == NO_DATA_SENTINEL || !value.is_finite() {
            None
        } else {
            Some(value)
        }
    }
}

// ============================================================================
// URL Builders
// ============================================================================

/// Daily-mean discharge for one site from `start` onward.
pub fn build_dv_url(site_code: &str, start: NaiveDate) -> String {
    format!(
        "{}/dv/?format=json&sites={}&parameterCd={}&statCd={}&startDT={}&siteStatus=all",
        USGS_BASE_URL,
        site_code,
        PARAM_DISCHARGE,
        STAT_DAILY_MEAN,
        start.format("%Y-%m-%d")
    )
}

/// Newest instantaneous values for a batch of sites.
pub fn build_iv_url(site_codes: &[&str]) -> String {
    format!(
        "{}/iv/?format=json&sites={}&parameterCd={},{},{}&siteStatus=all",
        USGS_BASE_URL,
        site_codes.join(","),
        PARAM_DISCHARGE,
        PARAM_STAGE,
        PARAM_WATER_TEMP
    )
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Parse an ISO 8601 timestamp with offset, e.g. `2026-02-18T09:45:00.000-05:00`.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, SourceError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SourceError::ParseError(format!("bad timestamp '{}': {}", text, e)))
}

fn parse_body(body: &str) -> Result<WaterMlResponse, SourceError> {
    serde_json::from_str(body).map_err(|e| SourceError::ParseError(e.to_string()))
}

/// Daily discharge records for `site_code` from a daily-values response.
///
/// Gaps (sentinel, unparseable values or dates) are dropped; an empty result
/// is not an error.
pub fn parse_dv_response(body: &str, site_code: &str) -> Result<Vec<DailyDischarge>, SourceError> {
    let response = parse_body(body)?;
    let mut records = Vec::new();

    for series in &response.value.time_series {
        if series.site() != Some(site_code) || series.parameter() != Some(PARAM_DISCHARGE) {
            continue;
        }
        for point in series.points() {
            let Some(discharge_cfs) = series.measurement(point) else {
                continue;
            };
            let Some(date) = point
                .date_time
                .get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            else {
                logging::warn(
                    DataSource::Usgs,
                    Some(site_code),
                    &format!("bad daily value date '{}', point skipped", point.date_time),
                );
                continue;
            };
            records.push(DailyDischarge {
                date,
                discharge_cfs,
            });
        }
    }

    records.sort_by_key(|r| r.date);
    Ok(records)
}

/// Latest point of one parameter: its time and value (`None` for a gap).
type Latest = Option<(DateTime<Utc>, Option<f64>)>;

#[derive(Default)]
struct SiteLatest {
    discharge: Latest,
    stage: Latest,
    temperature: Latest,
}

fn newer(current: Latest, candidate: (DateTime<Utc>, Option<f64>)) -> Latest {
    match current {
        Some((ts, _)) if ts >= candidate.0 => current,
        _ => Some(candidate),
    }
}

/// One `LiveReading` per site present in an instantaneous-values response.
///
/// The reading's timestamp is that of the newest discharge point, or of the
/// newest other parameter when the site reported no discharge. Points with an
/// unreadable `dateTime` are skipped, so a bad point only costs its own site.
pub fn parse_iv_response(body: &str) -> Result<Vec<LiveReading>, SourceError> {
    let response = parse_body(body)?;
    let mut by_site: BTreeMap<String, SiteLatest> = BTreeMap::new();

    for series in &response.value.time_series {
        let (Some(site), Some(parameter)) = (series.site(), series.parameter()) else {
            continue;
        };
        for point in series.points() {
            let timestamp = match parse_timestamp(&point.date_time) {
                Ok(ts) => ts,
                Err(e) => {
                    logging::warn(DataSource::Usgs, Some(site), &format!("{}, point skipped", e));
                    continue;
                }
            };
            let value = series.measurement(point);
            let entry = by_site.entry(site.to_string()).or_default();
            match parameter {
                PARAM_DISCHARGE => entry.discharge = newer(entry.discharge, (timestamp, value)),
                PARAM_STAGE => entry.stage = newer(entry.stage, (timestamp, value)),
                PARAM_WATER_TEMP => {
                    entry.temperature = newer(entry.temperature, (timestamp, value))
                }
                _ => {}
            }
        }
    }

    let readings = by_site
        .into_iter()
        .filter_map(|(site_code, latest)| {
            let timestamp = latest.discharge.map(|(ts, _)| ts).or_else(|| {
                [latest.stage, latest.temperature]
                    .iter()
                    .flatten()
                    .map(|(ts, _)| *ts)
                    .max()
            })?;
            Some(LiveReading {
                site_code,
                timestamp,
                discharge_cfs: latest.discharge.and_then(|(_, v)| v),
                gage_height_ft: latest.stage.and_then(|(_, v)| v),
                water_temp_c: latest.temperature.and_then(|(_, v)| v),
            })
        })
        .collect();

    Ok(readings)
}

// ============================================================================
// Client
// ============================================================================

/// Blocking USGS client implementing both data source seams.
pub struct UsgsClient {
    http: reqwest::blocking::Client,
    retry: RetryPolicy,
    history_start: NaiveDate,
}

impl UsgsClient {
    pub fn new(settings: &HttpSettings, history_start: NaiveDate) -> Result<Self, SourceError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| SourceError::RequestFailed(e.to_string()))?;

        Ok(UsgsClient {
            http,
            retry: RetryPolicy::from_settings(settings),
            history_start,
        })
    }

    fn get_text(&self, url: &str) -> Result<String, SourceError> {
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| SourceError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SourceError::HttpError(response.status().as_u16()));
        }

        response
            .text()
            .map_err(|e| SourceError::RequestFailed(e.to_string()))
    }
}

impl HistorySource for UsgsClient {
    fn daily_discharge(&self, site_code: &str) -> Result<Vec<DailyDischarge>, SourceError> {
        let url = build_dv_url(site_code, self.history_start);
        let body = with_retry(
            &self.retry,
            DataSource::Usgs,
            Some(site_code),
            "daily values request",
            || self.get_text(&url),
        )?;
        parse_dv_response(&body, site_code)
    }
}

impl LiveSource for UsgsClient {
    fn latest_readings(&self, site_codes: &[&str]) -> Result<Vec<LiveReading>, SourceError> {
        if site_codes.is_empty() {
            return Ok(Vec::new());
        }
        let url = build_iv_url(site_codes);
        let body = with_retry(
            &self.retry,
            DataSource::Usgs,
            None,
            "instantaneous values request",
            || self.get_text(&url),
        )?;
        parse_iv_response(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
