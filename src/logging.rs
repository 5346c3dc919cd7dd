/// Structured logging for the baseline and live conditions runs
///
/// Provides context-rich logging with component and site identifiers,
/// timestamps, and severity levels. Supports both console output
/// and file-based logging for scheduled batch runs.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use crate::model::{SiteError, SourceError};

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Usgs,
    Database,
    Baselines,
    Archive,
    Live,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Usgs => write!(f, "USGS"),
            DataSource::Database => write!(f, "DB"),
            DataSource::Baselines => write!(f, "BASELINES"),
            DataSource::Archive => write!(f, "ARCHIVE"),
            DataSource::Live => write!(f, "LIVE"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - gauge offline, seasonal, or short record
    Expected,
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        *LOGGER.lock().unwrap() = Some(logger);
    }

    fn log(&self, level: LogLevel, source: &DataSource, site_id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let site_part = site_id.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!("{} {} {}{}: {}", timestamp, level, source, site_part, message);

        if self.console_timestamps {
            match level {
                LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
                LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
            }
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", source, site_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", source, site_part, message),
                LogLevel::Info => println!("   {}", message),
                LogLevel::Debug => println!("   [DEBUG] {}{}: {}", source, site_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, source: DataSource, site_id: Option<&str>, message: &str) {
    if let Some(logger) = LOGGER.lock().unwrap().as_ref() {
        logger.log(level, &source, site_id, message);
    }
}

/// Log a general informational message
pub fn info(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(LogLevel::Info, source, site_id, message);
}

/// Log a warning message
pub fn warn(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(LogLevel::Warning, source, site_id, message);
}

/// Log an error message
pub fn error(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(LogLevel::Error, source, site_id, message);
}

/// Log a debug message
pub fn debug(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(LogLevel::Debug, source, site_id, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a data source failure by how actionable it is.
pub fn classify_source_failure(err: &SourceError) -> FailureType {
    match err {
        // 404 from NWIS usually means a retired or mistyped site
        SourceError::HttpError(404) => FailureType::Expected,
        SourceError::HttpError(_) => FailureType::Unexpected,
        // Parse errors suggest API changes or bugs
        SourceError::ParseError(_) => FailureType::Unexpected,
        SourceError::Database(_) => FailureType::Unexpected,
        SourceError::RequestFailed(_) => FailureType::Unknown,
    }
}

/// Classify a per-site omission. Short records and offline gauges are routine.
pub fn classify_site_error(err: &SiteError) -> FailureType {
    match err {
        SiteError::NoLiveReading(_)
        | SiteError::NoBaseline { .. }
        | SiteError::NoUsableHistory(_) => FailureType::Expected,
        SiteError::MissingDischarge(_) | SiteError::StaleReading { .. } => FailureType::Unknown,
        SiteError::MalformedDischarge { .. }
        | SiteError::FutureReading { .. }
        | SiteError::LiveSourceUnavailable { .. } => FailureType::Unexpected,
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a data source failure with automatic classification
pub fn log_source_failure(
    source: DataSource,
    site_code: Option<&str>,
    operation: &str,
    err: &SourceError,
) {
    let failure_type = classify_source_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(source, site_code, &message),
        FailureType::Unexpected => error(source, site_code, &message),
        FailureType::Unknown => warn(source, site_code, &message),
    }
}

/// Log a site that was left out of a run
pub fn log_site_omission(source: DataSource, err: &SiteError) {
    let failure_type = classify_site_error(err);
    let message = format!("omitted [{}]: {}", failure_type, err);

    match failure_type {
        FailureType::Expected => debug(source, Some(err.site()), &message),
        FailureType::Unexpected => error(source, Some(err.site()), &message),
        FailureType::Unknown => warn(source, Some(err.site()), &message),
    }
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log processed vs. omitted site counts at the end of a run
pub fn log_run_summary(
    source: DataSource,
    label: &str,
    total: usize,
    processed: usize,
    omitted: usize,
) {
    let message = format!(
        "{} complete: {}/{} sites processed, {} omitted",
        label, processed, total, omitted
    );

    if omitted == 0 {
        info(source, None, &message);
    } else if processed == 0 {
        error(source, None, &message);
    } else {
        warn(source, None, &message);
    }
}
