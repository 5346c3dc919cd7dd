/// Data source seams for the builder and the classifier.
///
/// The builder pulls a site's full daily-mean discharge record through a
/// `HistorySource`, and the classifier pulls the newest instantaneous values
/// for a batch of sites through a `LiveSource`. Production implementations
/// live in `ingest::usgs` (USGS water services) and `db` (Postgres); tests
/// substitute in-memory fakes.

pub mod usgs;

use std::thread;
use std::time::Duration;

use crate::config::HttpSettings;
use crate::logging::{self, DataSource};
use crate::model::{DailyDischarge, LiveReading, SourceError};

/// Full daily-mean discharge history for one site.
pub trait HistorySource {
    fn daily_discharge(&self, site_code: &str) -> Result<Vec<DailyDischarge>, SourceError>;
}

/// Most recent instantaneous values for a batch of sites.
///
/// Sites the source knows nothing about are simply absent from the result.
pub trait LiveSource {
    fn latest_readings(&self, site_codes: &[&str]) -> Result<Vec<LiveReading>, SourceError>;
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Wait before retry `n` is `base_delay * n`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(http: &HttpSettings) -> Self {
        RetryPolicy {
            max_retries: http.max_retries,
            base_delay: http.retry_delay(),
        }
    }

    pub fn none() -> Self {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// policy's retries are spent. Every failure is logged; the last error is
/// returned.
pub fn with_retry<T, F>(
    policy: &RetryPolicy,
    source: DataSource,
    site_code: Option<&str>,
    operation: &str,
    mut attempt: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Result<T, SourceError>,
{
    let mut tries = 0;
    loop {
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) => {
                logging::log_source_failure(source.clone(), site_code, operation, &e);
                if !e.is_retryable() || tries >= policy.max_retries {
                    return Err(e);
                }
                tries += 1;
                logging::debug(
                    source.clone(),
                    site_code,
                    &format!("retrying {} ({}/{})", operation, tries, policy.max_retries),
                );
                thread::sleep(policy.base_delay * tries);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_retry_recovers_from_transient_failures() {
        let calls = Cell::new(0);
        let result = with_retry(&instant(), DataSource::Usgs, None, "fetch", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SourceError::HttpError(503))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_after_max_retries() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&instant(), DataSource::Usgs, None, "fetch", || {
            calls.set(calls.get() + 1);
            Err(SourceError::RequestFailed("connection reset".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 4, "one attempt plus three retries");
    }

    #[test]
    fn test_non_retryable_error_fails_immediately() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&instant(), DataSource::Usgs, None, "fetch", || {
            calls.set(calls.get() + 1);
            Err(SourceError::HttpError(404))
        });
        assert_eq!(result, Err(SourceError::HttpError(404)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_policy_from_settings() {
        let policy = RetryPolicy::from_settings(&HttpSettings::default());
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
        assert_eq!(RetryPolicy::none().max_retries, 0);
    }
}
