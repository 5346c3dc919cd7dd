/// Service configuration loaded from `flowstat.toml`.
///
/// Every field has a default so a missing file or a partial file is valid.
/// Environment variables (loaded from `.env` by `dotenv`) override the file:
///   - `FLOWSTAT_DATA_DIR` replaces `storage.data_dir`
///   - `DATABASE_URL` is read directly by `db::connect`

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "./flowstat.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub builder: BuilderSettings,
    pub classifier: ClassifierSettings,
    pub http: HttpSettings,
    pub sources: SourceSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Root holding `reference_stats/` and `live_output/`.
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuilderSettings {
    /// Minimum distinct years required before a day's thresholds are published.
    pub min_years: u32,
    /// First date requested from the daily-values service (YYYY-MM-DD).
    pub history_start: String,
    /// Concurrent sites per state.
    pub workers: usize,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        BuilderSettings {
            min_years: 5,
            history_start: "2000-01-01".to_string(),
            workers: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub trend_window_hours: i64,
    pub trend_min_points: usize,
    /// Percent change over the window that counts as rising/falling.
    pub trend_threshold_pct: f64,
    /// Readings older than this are omitted as stale.
    pub max_reading_age_minutes: i64,
    /// Readings stamped further ahead of the cycle time are omitted.
    pub max_future_minutes: i64,
    /// Sites per instantaneous-values request.
    pub live_batch_size: usize,
    /// Published history copies older than this are deleted. Never less than
    /// the trend window plus the staleness limit.
    pub history_retention_hours: i64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings {
            trend_window_hours: 24,
            trend_min_points: 4,
            trend_threshold_pct: 10.0,
            max_reading_age_minutes: 180,
            max_future_minutes: 15,
            live_batch_size: 100,
            history_retention_hours: 72,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Where the site registry and the historical series come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// TOML registry file / USGS web services.
    Usgs,
    /// Postgres tables reachable through `DATABASE_URL`.
    Database,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub registry_path: PathBuf,
    pub sites: Backend,
    pub history: Backend,
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings {
            registry_path: PathBuf::from("./gauge_sites.toml"),
            sites: Backend::Usgs,
            history: Backend::Usgs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            level: "info".to_string(),
            file: None,
            timestamps: true,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Settings, String> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| format!("invalid configuration: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from `path`, falling back to defaults when the file does
    /// not exist, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Settings, String> {
        dotenv::dotenv().ok();

        let mut settings = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
            Settings::from_toml(&text)?
        } else {
            Settings::default()
        };

        if let Ok(dir) = std::env::var("FLOWSTAT_DATA_DIR") {
            if !dir.trim().is_empty() {
                settings.storage.data_dir = PathBuf::from(dir);
            }
        }

        Ok(settings)
    }

    fn validate(&self) -> Result<(), String> {
        if self.builder.min_years == 0 {
            return Err("builder.min_years must be at least 1".to_string());
        }
        if self.builder.workers == 0 {
            return Err("builder.workers must be at least 1".to_string());
        }
        if chrono::NaiveDate::parse_from_str(&self.builder.history_start, "%Y-%m-%d").is_err() {
            return Err(format!(
                "builder.history_start '{}' is not YYYY-MM-DD",
                self.builder.history_start
            ));
        }
        if self.classifier.trend_window_hours <= 0 {
            return Err("classifier.trend_window_hours must be positive".to_string());
        }
        if self.classifier.trend_min_points < 2 {
            return Err("classifier.trend_min_points must be at least 2".to_string());
        }
        if self.classifier.max_future_minutes < 0 {
            return Err("classifier.max_future_minutes must not be negative".to_string());
        }
        if self.classifier.live_batch_size == 0 {
            return Err("classifier.live_batch_size must be at least 1".to_string());
        }
        if self.classifier.history_retention_hours < self.classifier.trend_window_hours {
            return Err(
                "classifier.history_retention_hours must cover trend_window_hours".to_string(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let settings = Settings::from_toml("").expect("empty config is valid");
        assert_eq!(settings.builder.min_years, 5);
        assert_eq!(settings.classifier.trend_window_hours, 24);
        assert_eq!(settings.classifier.trend_min_points, 4);
        assert_eq!(settings.http.max_retries, 3);
        assert_eq!(settings.sources.history, Backend::Usgs);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let text = r#"
            [builder]
            min_years = 10

            [sources]
            history = "database"
        "#;
        let settings = Settings::from_toml(text).expect("valid config");
        assert_eq!(settings.builder.min_years, 10);
        assert_eq!(settings.builder.workers, 5);
        assert_eq!(settings.sources.history, Backend::Database);
        assert_eq!(settings.sources.sites, Backend::Usgs);
    }

    #[test]
    fn test_zero_min_years_is_rejected() {
        let err = Settings::from_toml("[builder]\nmin_years = 0\n").unwrap_err();
        assert!(err.contains("min_years"), "unexpected error: {}", err);
    }

    #[test]
    fn test_retention_shorter_than_trend_window_is_rejected() {
        let text = "[classifier]\ntrend_window_hours = 48\nhistory_retention_hours = 24\n";
        let err = Settings::from_toml(text).unwrap_err();
        assert!(err.contains("history_retention_hours"), "unexpected error: {}", err);
    }

    #[test]
    fn test_bad_history_start_is_rejected() {
        let err = Settings::from_toml("[builder]\nhistory_start = \"last year\"\n").unwrap_err();
        assert!(err.contains("history_start"));
    }
}
