/// Core data types for the streamflow baseline and live conditions service.
///
/// This module defines the shared domain model imported by all other modules:
/// gauge sites, historical daily records, percentile baselines, live
/// readings, classification snapshots and the error taxonomy.
/// It contains no I/O.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Parameter codes
// ---------------------------------------------------------------------------

/// USGS parameter code for discharge (streamflow), in cubic feet per second.
pub const PARAM_DISCHARGE: &str = "00060";

/// USGS parameter code for gage height (stage), in feet.
pub const PARAM_STAGE: &str = "00065";

/// USGS parameter code for water temperature, in degrees Celsius.
pub const PARAM_WATER_TEMP: &str = "00010";

/// USGS statistic code for the daily mean.
pub const STAT_DAILY_MEAN: &str = "00003";

/// Value USGS reports in place of a missing measurement.
pub const NO_DATA_SENTINEL: f64 = -999999.0;

// ---------------------------------------------------------------------------
// Sites and history
// ---------------------------------------------------------------------------

/// A registered USGS gauge. Immutable once loaded from the registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GaugeSite {
    /// 8 to 15 digit USGS site number.
    pub site_code: String,
    #[serde(default)]
    pub name: String,
    /// Two-letter state code; the region partition key.
    pub state: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// One daily mean discharge value from the historical record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyDischarge {
    pub date: NaiveDate,
    pub discharge_cfs: f64,
}

/// Calendar day-of-year key, independent of year.
///
/// February 29 is a key of its own and is never folded into February 28.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthDay {
    month: u32,
    day: u32,
}

impl MonthDay {
    /// Returns `None` for dates that do not exist in a leap year.
    pub fn new(month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(2000, month, day).map(|_| MonthDay { month, day })
    }

    pub fn from_date<D: Datelike>(date: &D) -> Self {
        MonthDay {
            month: date.month(),
            day: date.day(),
        }
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }
}

impl fmt::Display for MonthDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl FromStr for MonthDay {
    type Err = String;

    /// Parses the `MM-DD` form used in baseline partitions.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (month, day) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("month_day '{}' is not in MM-DD form", s))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month in '{}'", s))?;
        let day: u32 = day.parse().map_err(|_| format!("invalid day in '{}'", s))?;
        MonthDay::new(month, day).ok_or_else(|| format!("'{}' is not a calendar day", s))
    }
}

// ---------------------------------------------------------------------------
// Baselines
// ---------------------------------------------------------------------------

/// Percentile levels published for every baseline, in ascending order.
pub const PERCENTILE_LEVELS: [f64; 7] = [5.0, 10.0, 25.0, 50.0, 75.0, 90.0, 95.0];

/// Discharge thresholds (cfs) at each of the `PERCENTILE_LEVELS`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub p05: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

impl Thresholds {
    pub fn from_values(v: [f64; 7]) -> Self {
        Thresholds {
            p05: v[0],
            p10: v[1],
            p25: v[2],
            p50: v[3],
            p75: v[4],
            p90: v[5],
            p95: v[6],
        }
    }

    /// Threshold values in the same order as `PERCENTILE_LEVELS`.
    pub fn values(&self) -> [f64; 7] {
        [
            self.p05, self.p10, self.p25, self.p50, self.p75, self.p90, self.p95,
        ]
    }

    pub fn is_non_decreasing(&self) -> bool {
        self.values().windows(2).all(|w| w[0] <= w[1])
    }
}

/// Historical percentile thresholds for one site on one calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentileBaseline {
    pub site_code: String,
    pub month_day: MonthDay,
    pub thresholds: Thresholds,
    /// Number of distinct years that contributed a value for this day.
    pub sample_years: u32,
}

impl PercentileBaseline {
    /// Rows that fail this check are never published or read back.
    pub fn check(&self) -> Result<(), String> {
        if self.sample_years == 0 {
            return Err("count is zero".to_string());
        }
        if self.thresholds.values().iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err("thresholds must be finite and non-negative".to_string());
        }
        if !self.thresholds.is_non_decreasing() {
            return Err("thresholds decrease across percentile levels".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Live readings and classification
// ---------------------------------------------------------------------------

/// Current instantaneous values for one site.
///
/// Any field may be `None` when the gauge does not report that parameter or
/// reported the no-data sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveReading {
    pub site_code: String,
    pub timestamp: DateTime<Utc>,
    pub discharge_cfs: Option<f64>,
    pub gage_height_ft: Option<f64>,
    pub water_temp_c: Option<f64>,
}

/// Flow condition relative to the day-of-year baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    #[serde(rename = "Much Below Normal")]
    MuchBelowNormal,
    #[serde(rename = "Below Normal")]
    BelowNormal,
    #[serde(rename = "Normal")]
    Normal,
    #[serde(rename = "Above Normal")]
    AboveNormal,
    #[serde(rename = "Much Above Normal")]
    MuchAboveNormal,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FlowStatus::MuchBelowNormal => "Much Below Normal",
            FlowStatus::BelowNormal => "Below Normal",
            FlowStatus::Normal => "Normal",
            FlowStatus::AboveNormal => "Above Normal",
            FlowStatus::MuchAboveNormal => "Much Above Normal",
        };
        write!(f, "{}", label)
    }
}

/// Drought severity derived from low-flow percentile rank (USDM naming).
///
/// `D2` is the most severe category this service assigns; ranks below the
/// 5th percentile cannot be resolved further from the published thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DroughtStatus {
    #[serde(rename = "D0 - Abnormally Dry")]
    D0AbnormallyDry,
    #[serde(rename = "D1 - Moderate Drought")]
    D1ModerateDrought,
    #[serde(rename = "D2 - Severe Drought")]
    D2SevereDrought,
}

impl fmt::Display for DroughtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DroughtStatus::D0AbnormallyDry => "D0 - Abnormally Dry",
            DroughtStatus::D1ModerateDrought => "D1 - Moderate Drought",
            DroughtStatus::D2SevereDrought => "D2 - Severe Drought",
        };
        write!(f, "{}", label)
    }
}

/// Short-term discharge trend over the lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
    Unknown,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Rising => write!(f, "rising"),
            Trend::Falling => write!(f, "falling"),
            Trend::Stable => write!(f, "stable"),
            Trend::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of classifying one live reading. Immutable once archived.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationSnapshot {
    pub site_code: String,
    pub region: String,
    /// Timestamp of the underlying live reading.
    pub timestamp: DateTime<Utc>,
    pub discharge_cfs: f64,
    pub gage_height_ft: Option<f64>,
    pub water_temp_c: Option<f64>,
    /// Rank within the day-of-year baseline, 0–100, one decimal.
    pub percentile_rank: f64,
    pub flow_status: FlowStatus,
    pub drought_status: Option<DroughtStatus>,
    pub trend: Trend,
    pub trend_rate_per_hour: Option<f64>,
    pub hours_since_peak: Option<f64>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures talking to an external data source (USGS services, database).
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Non-2xx HTTP response.
    HttpError(u16),
    /// The request never produced a response (connect failure, timeout).
    RequestFailed(String),
    /// The response body could not be deserialized.
    ParseError(String),
    /// A database query or connection failed.
    Database(String),
}

impl SourceError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::RequestFailed(_) => true,
            SourceError::HttpError(code) => *code == 429 || *code >= 500,
            SourceError::ParseError(_) | SourceError::Database(_) => false,
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::HttpError(code) => write!(f, "HTTP error: {}", code),
            SourceError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            SourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            SourceError::Database(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Failures reading or writing the baseline partitions and live output.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    Io { path: String, message: String },
    Decode { path: String, message: String },
    Encode(String),
}

impl StoreError {
    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        StoreError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io { path, message } => write!(f, "I/O error on {}: {}", path, message),
            StoreError::Decode { path, message } => {
                write!(f, "Could not decode {}: {}", path, message)
            }
            StoreError::Encode(msg) => write!(f, "Could not encode output: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Per-site conditions that leave a site out of a run without failing it.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteError {
    /// The live source returned nothing for the site.
    NoLiveReading(String),
    /// A reading arrived without a discharge value.
    MissingDischarge(String),
    /// Discharge was negative or not a number.
    MalformedDischarge { site: String, value: f64 },
    /// The reading is older than the configured freshness limit.
    StaleReading { site: String, age_minutes: i64 },
    /// The reading is stamped further ahead of the cycle time than allowed.
    FutureReading { site: String, ahead_minutes: i64 },
    /// No published baseline for the site on this calendar day.
    NoBaseline { site: String, month_day: MonthDay },
    /// The live source could not be reached for this site's batch.
    LiveSourceUnavailable { site: String, cause: String },
    /// History contained no day with enough years to publish.
    NoUsableHistory(String),
}

impl SiteError {
    pub fn site(&self) -> &str {
        match self {
            SiteError::NoLiveReading(site)
            | SiteError::MissingDischarge(site)
            | SiteError::NoUsableHistory(site) => site,
            SiteError::MalformedDischarge { site, .. }
            | SiteError::StaleReading { site, .. }
            | SiteError::FutureReading { site, .. }
            | SiteError::NoBaseline { site, .. }
            | SiteError::LiveSourceUnavailable { site, .. } => site,
        }
    }

    /// Short stable label used for omission counts in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            SiteError::NoLiveReading(_) => "no_live_reading",
            SiteError::MissingDischarge(_) => "missing_discharge",
            SiteError::MalformedDischarge { .. } => "malformed_discharge",
            SiteError::StaleReading { .. } => "stale_reading",
            SiteError::FutureReading { .. } => "future_reading",
            SiteError::NoBaseline { .. } => "no_baseline",
            SiteError::LiveSourceUnavailable { .. } => "live_source_unavailable",
            SiteError::NoUsableHistory(_) => "no_usable_history",
        }
    }
}

impl fmt::Display for SiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SiteError::NoLiveReading(site) => write!(f, "No live reading for site: {}", site),
            SiteError::MissingDischarge(site) => {
                write!(f, "Reading for site {} has no discharge value", site)
            }
            SiteError::MalformedDischarge { site, value } => {
                write!(f, "Malformed discharge for site {}: {}", site, value)
            }
            SiteError::StaleReading { site, age_minutes } => {
                write!(f, "Stale data for site {}: {} minutes old", site, age_minutes)
            }
            SiteError::FutureReading { site, ahead_minutes } => {
                write!(f, "Reading for site {} is {} minutes in the future", site, ahead_minutes)
            }
            SiteError::NoBaseline { site, month_day } => {
                write!(f, "No baseline for site {} on {}", site, month_day)
            }
            SiteError::LiveSourceUnavailable { site, cause } => {
                write!(f, "Live source unavailable for site {}: {}", site, cause)
            }
            SiteError::NoUsableHistory(site) => {
                write!(f, "No usable history for site: {}", site)
            }
        }
    }
}

impl std::error::Error for SiteError {}

/// Errors that abort a whole builder or classifier run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunError {
    Source(SourceError),
    Store(StoreError),
    /// Every live batch failed; nothing was published.
    LiveSourceDown(String),
    /// A worker thread panicked while processing a site.
    WorkerPanicked(String),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Source(e) => write!(f, "{}", e),
            RunError::Store(e) => write!(f, "{}", e),
            RunError::LiveSourceDown(msg) => write!(f, "Live source unavailable: {}", msg),
            RunError::WorkerPanicked(site) => write!(f, "Worker panicked on site {}", site),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Source(e) => Some(e),
            RunError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SourceError> for RunError {
    fn from(e: SourceError) -> Self {
        RunError::Source(e)
    }
}

impl From<StoreError> for RunError {
    fn from(e: StoreError) -> Self {
        RunError::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
