use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use flowstat_service::config::DEFAULT_CONFIG_PATH;
use flowstat_service::stations::{self, Scope};

#[derive(Parser, Debug)]
#[command(
    name = "flowstat",
    version,
    about = "Streamflow percentile baselines and live conditions"
)]
pub struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rebuild day-of-year percentile partitions from daily history.
    Baselines(ScopeArgs),
    /// Classify current readings and publish the live status document.
    Classify(ScopeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Every registered site.
    #[arg(long, default_value_t = false, conflicts_with_all = ["states", "sites"])]
    pub all: bool,

    /// Two-letter state code; repeatable.
    #[arg(long = "state")]
    pub states: Vec<String>,

    /// USGS site number; repeatable. Takes precedence over --state.
    #[arg(long = "site")]
    pub sites: Vec<String>,
}

impl ScopeArgs {
    /// Resolve the selection. With `require_explicit`, an empty selection is
    /// an error instead of meaning every site.
    pub fn scope(&self, require_explicit: bool) -> Result<Scope, String> {
        if require_explicit && !self.all && self.states.is_empty() && self.sites.is_empty() {
            return Err("choose sites with --all, --state or --site".to_string());
        }

        let scope = Scope::from_selection(&self.states, &self.sites);
        match &scope {
            Scope::States(states) => {
                if let Some(bad) = states.iter().find(|s| !stations::is_valid_state_code(s)) {
                    return Err(format!("'{}' is not a two-letter state code", bad));
                }
            }
            Scope::Sites(sites) => {
                if let Some(bad) = sites.iter().find(|s| !stations::is_valid_site_code(s)) {
                    return Err(format!("'{}' is not a USGS site number", bad));
                }
            }
            Scope::All => {}
        }
        Ok(scope)
    }
}
