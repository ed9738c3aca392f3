use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::filter::{CategoryPools, PoolRule};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "QC_TRENDS_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "qc-trends.toml";
pub const DEFAULT_STORE_FILE: &str = "qc-annotations.json";

// ---------------------------------------------------------------------------
// Config sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub persistence: PersistenceConfig,
    pub filters: FiltersConfig,
    pub instruments: InstrumentsConfig,
    pub links: LinksConfig,
}

/// Where hides and annotations are stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Root of the QC web service, e.g. `http://swift:8080`.
    pub base_url: Option<String>,
    /// Local JSON store, used when no `base_url` is set.
    pub file: Option<PathBuf>,
    /// Service path of the hidden-result list, relative to `base_url`.
    pub hidden_list_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub default_category: Option<String>,
    pub default_instrument_prefixes: Vec<String>,
    pub pools: BTreeMap<String, PoolRule>,
}

impl FiltersConfig {
    pub fn category_pools(&self) -> CategoryPools {
        CategoryPools::new(self.pools.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
    /// Serial number → display name.
    pub aliases: BTreeMap<String, String>,
}

impl InstrumentsConfig {
    pub fn display_name<'a>(&'a self, instrument: &'a str) -> &'a str {
        self.aliases.get(instrument).map_or(instrument, String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub search: String,
    pub qa: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            search: "/start/?load={transaction}".to_string(),
            qa: "/service/qa/{transaction}/index.html".to_string(),
        }
    }
}

impl LinksConfig {
    pub fn search_link(&self, transaction: i64) -> String {
        self.search.replace("{transaction}", &transaction.to_string())
    }

    pub fn qa_link(&self, transaction: i64) -> String {
        self.qa.replace("{transaction}", &transaction.to_string())
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Parse a TOML configuration file.
    pub fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load from `$QC_TRENDS_CONFIG` or `./qc-trends.toml`; a missing file means defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if path.exists() {
            log::info!("Using configuration {}", path.display());
            Self::read(&path)
        } else {
            log::debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_all_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[persistence]
base_url = "http://swift:8080"
hidden_list_path = "/service/hidden.json"

[filters]
default_category = "yeast"
default_instrument_prefixes = ["Orbi"]

[filters.pools.all]
expands_to = ["yeast", "bsa"]

[filters.pools.clean]
suppresses = ["contaminants"]

[instruments.aliases]
"01475B" = "Orbi"
"#
        )
        .unwrap();

        let config = Config::read(file.path()).unwrap();
        assert_eq!(config.persistence.base_url.as_deref(), Some("http://swift:8080"));
        assert_eq!(config.persistence.hidden_list_path.as_deref(), Some("/service/hidden.json"));
        assert_eq!(config.filters.default_category.as_deref(), Some("yeast"));
        assert_eq!(config.filters.pools["all"].expands_to, vec!["yeast", "bsa"]);
        assert_eq!(config.filters.pools["clean"].suppresses, vec!["contaminants"]);
        assert_eq!(config.instruments.display_name("01475B"), "Orbi");
        assert_eq!(config.instruments.display_name("LTQ30471"), "LTQ30471");
        assert_eq!(config.links, LinksConfig::default());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[filters\n").unwrap();
        assert!(Config::read(file.path()).is_err());
    }

    #[test]
    fn link_templates_substitute_transaction() {
        let links = LinksConfig::default();
        assert_eq!(links.search_link(17), "/start/?load=17");
        assert_eq!(links.qa_link(17), "/service/qa/17/index.html");
    }
}
