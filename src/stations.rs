/// Gauge site registry and run scopes.
///
/// The registry is the list of USGS gauges both pipelines operate on, loaded
/// from a TOML file of `[[site]]` tables (or from the database, see
/// `db::load_sites`). A `Scope` narrows a run to all sites, a set of states,
/// or an explicit list of site codes.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::model::GaugeSite;

// ---------------------------------------------------------------------------
// Registry loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "site")]
    sites: Vec<GaugeSite>,
}

/// Load and validate the site registry from a TOML file.
pub fn load_sites(path: &Path) -> Result<Vec<GaugeSite>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_sites(&text)
}

/// Parse registry TOML. State codes are upper-cased.
pub fn parse_sites(text: &str) -> Result<Vec<GaugeSite>, String> {
    let file: RegistryFile =
        toml::from_str(text).map_err(|e| format!("invalid site registry: {}", e))?;

    let mut seen = HashSet::new();
    let mut sites = Vec::with_capacity(file.sites.len());
    for mut site in file.sites {
        site.state = site.state.trim().to_ascii_uppercase();
        validate_site(&site)?;
        if !seen.insert(site.site_code.clone()) {
            return Err(format!("duplicate site code '{}' in registry", site.site_code));
        }
        sites.push(site);
    }
    Ok(sites)
}

/// USGS site numbers are 8 to 15 digit numeric strings.
pub fn is_valid_site_code(code: &str) -> bool {
    (8..=15).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit())
}

pub fn is_valid_state_code(code: &str) -> bool {
    code.len() == 2 && code.chars().all(|c| c.is_ascii_uppercase())
}

fn validate_site(site: &GaugeSite) -> Result<(), String> {
    if !is_valid_site_code(&site.site_code) {
        return Err(format!("site code '{}' is not a USGS site number", site.site_code));
    }
    if !is_valid_state_code(&site.state) {
        return Err(format!(
            "site '{}' has invalid state code '{}'",
            site.site_code, site.state
        ));
    }
    if !(-90.0..=90.0).contains(&site.latitude) || !(-180.0..=180.0).contains(&site.longitude) {
        return Err(format!("site '{}' has an out-of-range position", site.site_code));
    }
    Ok(())
}

/// Looks up a site by code. Returns `None` if not found.
pub fn find_site<'a>(sites: &'a [GaugeSite], site_code: &str) -> Option<&'a GaugeSite> {
    sites.iter().find(|s| s.site_code == site_code)
}

/// Groups sites by state, in state order, preserving registry order within a state.
pub fn group_by_state<'a>(sites: &[&'a GaugeSite]) -> BTreeMap<String, Vec<&'a GaugeSite>> {
    let mut groups: BTreeMap<String, Vec<&'a GaugeSite>> = BTreeMap::new();
    for site in sites {
        groups.entry(site.state.clone()).or_default().push(*site);
    }
    groups
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Which sites a run covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    States(Vec<String>),
    Sites(Vec<String>),
}

impl Scope {
    /// Builds a scope from command line selections. Site codes win over states.
    pub fn from_selection(states: &[String], sites: &[String]) -> Scope {
        if !sites.is_empty() {
            Scope::Sites(sites.iter().map(|s| s.trim().to_string()).collect())
        } else if !states.is_empty() {
            Scope::States(states.iter().map(|s| s.trim().to_ascii_uppercase()).collect())
        } else {
            Scope::All
        }
    }

    /// True when only some sites of a partition are in scope.
    pub fn is_site_list(&self) -> bool {
        matches!(self, Scope::Sites(_))
    }

    pub fn contains(&self, site: &GaugeSite) -> bool {
        match self {
            Scope::All => true,
            Scope::States(states) => states.iter().any(|s| *s == site.state),
            Scope::Sites(codes) => codes.iter().any(|c| *c == site.site_code),
        }
    }

    /// Registry entries in scope, in registry order.
    pub fn select<'a>(&self, sites: &'a [GaugeSite]) -> Vec<&'a GaugeSite> {
        sites.iter().filter(|s| self.contains(s)).collect()
    }

    /// Requested site codes that are not in the registry.
    pub fn unknown_sites(&self, sites: &[GaugeSite]) -> Vec<String> {
        match self {
            Scope::Sites(codes) => codes
                .iter()
                .filter(|c| find_site(sites, c).is_none())
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
