/// Postgres-backed site registry and daily discharge history.
///
/// Used when `[sources]` selects `database`: a previously loaded mirror of
/// the USGS daily-values archive serves as the builder's history source,
/// avoiding thousands of web service requests per state.
///
/// Expected tables:
///   usgs_raw.sites           (site_code, site_name, state_code, latitude, longitude)
///   usgs_raw.daily_discharge (site_code, obs_date DATE, discharge_cfs DOUBLE PRECISION)

use chrono::NaiveDate;
use postgres::{Client, NoTls};
use std::sync::Mutex;

use crate::ingest::HistorySource;
use crate::model::{DailyDischarge, GaugeSite, SourceError};

fn db_error(e: postgres::Error) -> SourceError {
    SourceError::Database(e.to_string())
}

/// Open a connection using `DATABASE_URL` (loaded from `.env` if present).
pub fn connect() -> Result<Client, SourceError> {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL")
        .map_err(|_| SourceError::Database("DATABASE_URL is not set".to_string()))?;
    Client::connect(&url, NoTls).map_err(db_error)
}

/// All registered sites, ordered by state then site code.
pub fn load_sites(client: &mut Client) -> Result<Vec<GaugeSite>, SourceError> {
    let rows = client
        .query(
            "SELECT site_code, COALESCE(site_name, ''), UPPER(state_code), latitude, longitude
             FROM usgs_raw.sites
             WHERE state_code IS NOT NULL
             ORDER BY state_code, site_code",
            &[],
        )
        .map_err(db_error)?;

    Ok(rows
        .iter()
        .map(|row| GaugeSite {
            site_code: row.get(0),
            name: row.get(1),
            state: row.get(2),
            latitude: row.get::<_, Option<f64>>(3).unwrap_or(f64::NAN),
            longitude: row.get::<_, Option<f64>>(4).unwrap_or(f64::NAN),
        })
        .collect())
}

/// Daily history served from `usgs_raw.daily_discharge`.
///
/// `postgres::Client` needs `&mut self`, so the connection sits behind a
/// mutex and builder workers take turns querying.
pub struct PostgresHistory {
    client: Mutex<Client>,
    start: NaiveDate,
}

impl PostgresHistory {
    pub fn new(client: Client, start: NaiveDate) -> Self {
        PostgresHistory {
            client: Mutex::new(client),
            start,
        }
    }
}

impl HistorySource for PostgresHistory {
    fn daily_discharge(&self, site_code: &str) -> Result<Vec<DailyDischarge>, SourceError> {
        let mut client = self
            .client
            .lock()
            .map_err(|_| SourceError::Database("connection lock poisoned".to_string()))?;

        let rows = client
            .query(
                "SELECT obs_date, discharge_cfs
                 FROM usgs_raw.daily_discharge
                 WHERE site_code = $1
                   AND obs_date >= $2
                   AND discharge_cfs IS NOT NULL
                 ORDER BY obs_date",
                &[&site_code, &self.start],
            )
            .map_err(db_error)?;

        Ok(rows
            .iter()
            .map(|row| DailyDischarge {
                date: row.get(0),
                discharge_cfs: row.get(1),
            })
            .collect())
    }
}
