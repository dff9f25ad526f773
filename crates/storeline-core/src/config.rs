//! Pipeline configuration.
//!
//! Static settings come from `config/pipeline.toml`; credentials and rate
//! overrides come from the environment.
//!
//! ```toml
//! [defaults]
//! limit = 50
//! cache_ttl_secs = 3600
//!
//! [providers.shopify]
//! rps = 2.0
//! [providers.shopify.orders]
//! limit = 50
//! status = "any"
//!
//! [providers.mock.products]
//! limit = 20
//! ```

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::ProviderId;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Zero disables the age check on cached responses.
    #[serde(default)]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Upper bound on one provider's whole fetch, retries included.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            max_pages: default_max_pages(),
            cache_ttl_secs: 0,
            retries: default_retries(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_limit() -> u32 {
    50
}

fn default_max_pages() -> u32 {
    1
}

fn default_retries() -> u32 {
    2
}

fn default_fetch_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct Paths {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    #[serde(default = "default_warehouse_path")]
    pub warehouse_path: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            raw_dir: default_raw_dir(),
            ledger_path: default_ledger_path(),
            warehouse_path: default_warehouse_path(),
        }
    }
}

impl Paths {
    /// Re-roots every relative path under `base`.
    pub fn rooted_at(&self, base: &Path) -> Self {
        let join = |path: &PathBuf| {
            if path.is_absolute() {
                path.clone()
            } else {
                base.join(path)
            }
        };
        Self {
            cache_dir: join(&self.cache_dir),
            raw_dir: join(&self.raw_dir),
            ledger_path: join(&self.ledger_path),
            warehouse_path: join(&self.warehouse_path),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cache/api")
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("metadata/pipeline_runs.jsonl")
}

fn default_warehouse_path() -> PathBuf {
    PathBuf::from("data/storeline.duckdb")
}

/// A provider participates in a run only when its section is present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    pub shopify: Option<ShopifyConfig>,
    pub amazon: Option<AmazonConfig>,
    pub ebay: Option<EbayConfig>,
    pub mock: Option<MockConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageConfig {
    pub limit: Option<u32>,
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrdersConfig {
    pub limit: Option<u32>,
    pub max_pages: Option<u32>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShopifyConfig {
    pub rps: Option<f64>,
    pub products: Option<PageConfig>,
    pub orders: Option<OrdersConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AmazonItemsConfig {
    #[serde(default)]
    pub asins: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AmazonConfig {
    pub rps: Option<f64>,
    #[serde(default)]
    pub items: AmazonItemsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EbaySearchConfig {
    #[serde(default)]
    pub queries: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EbayConfig {
    pub rps: Option<f64>,
    #[serde(default)]
    pub search: EbaySearchConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitConfig {
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockConfig {
    pub rps: Option<f64>,
    #[serde(default)]
    pub products: LimitConfig,
    #[serde(default)]
    pub orders: LimitConfig,
}

impl PipelineConfig {
    /// Reads `path`; a missing file yields the built-in defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn is_configured(&self, provider: ProviderId) -> bool {
        match provider {
            ProviderId::Shopify => self.providers.shopify.is_some(),
            ProviderId::Amazon => self.providers.amazon.is_some(),
            ProviderId::Ebay => self.providers.ebay.is_some(),
            ProviderId::Mock => self.providers.mock.is_some(),
        }
    }

    /// Configured providers, narrowed by `filter` when one is given.
    /// Amazon and eBay have nothing to fetch without item ids or search queries.
    pub fn has_requests(&self, provider: ProviderId) -> bool {
        match provider {
            ProviderId::Amazon => self
                .providers
                .amazon
                .as_ref()
                .is_some_and(|amazon| !amazon.items.asins.is_empty()),
            ProviderId::Ebay => self
                .providers
                .ebay
                .as_ref()
                .is_some_and(|ebay| !ebay.search.queries.is_empty()),
            ProviderId::Shopify | ProviderId::Mock => self.is_configured(provider),
        }
    }

    pub fn enabled_providers(&self, filter: Option<&[ProviderId]>) -> Vec<ProviderId> {
        ProviderId::ALL
            .into_iter()
            .filter(|provider| self.is_configured(*provider))
            .filter(|provider| filter.map_or(true, |allowed| allowed.contains(provider)))
            .collect()
    }

    pub fn configured_rate(&self, provider: ProviderId) -> Option<f64> {
        match provider {
            ProviderId::Shopify => self.providers.shopify.as_ref()?.rps,
            ProviderId::Amazon => self.providers.amazon.as_ref()?.rps,
            ProviderId::Ebay => self.providers.ebay.as_ref()?.rps,
            ProviderId::Mock => self.providers.mock.as_ref()?.rps,
        }
    }

    /// Per-provider request rates; `<PROVIDER>_RPS` from `env` wins over the file.
    pub fn rates(&self, env: impl Fn(&str) -> Option<String>) -> HashMap<ProviderId, f64> {
        ProviderId::ALL
            .into_iter()
            .filter_map(|provider| {
                let from_env = env(provider.rps_env()).and_then(|raw| raw.trim().parse::<f64>().ok());
                from_env
                    .or_else(|| self.configured_rate(provider))
                    .map(|rps| (provider, rps))
            })
            .collect()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.defaults.cache_ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.defaults.fetch_timeout_secs)
    }
}

/// Looks up `name`, falling back to the `STORELINE_`-prefixed variant.
pub fn env_credential(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    env(name)
        .or_else(|| env(&format!("STORELINE_{name}")))
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

/// Process environment lookup.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[defaults]
limit = 25
cache_ttl_secs = 600

[paths]
raw_dir = "archive/raw"

[providers.shopify]
rps = 2.0
[providers.shopify.products]
limit = 10
max_pages = 3
[providers.shopify.orders]
status = "any"

[providers.ebay.search]
queries = ["wireless mouse", "usb hub"]

[providers.mock]
"#;

    #[test]
    fn parses_sections_with_defaults() {
        let config = PipelineConfig::from_toml_str(SAMPLE).expect("valid config");

        assert_eq!(config.defaults.limit, 25);
        assert_eq!(config.defaults.max_pages, 1);
        assert_eq!(config.defaults.retries, 2);
        assert_eq!(config.cache_ttl(), Duration::from_secs(600));
        assert_eq!(config.paths.raw_dir, PathBuf::from("archive/raw"));
        assert_eq!(config.paths.ledger_path, PathBuf::from("metadata/pipeline_runs.jsonl"));

        let shopify = config.providers.shopify.as_ref().expect("shopify");
        assert_eq!(shopify.products.as_ref().and_then(|p| p.max_pages), Some(3));
        assert_eq!(
            config.providers.ebay.as_ref().expect("ebay").search.queries,
            vec!["wireless mouse", "usb hub"]
        );
    }

    #[test]
    fn enabled_providers_follow_sections_and_filter() {
        let config = PipelineConfig::from_toml_str(SAMPLE).expect("valid config");

        assert_eq!(
            config.enabled_providers(None),
            vec![ProviderId::Shopify, ProviderId::Ebay, ProviderId::Mock]
        );
        assert_eq!(
            config.enabled_providers(Some(&[ProviderId::Mock, ProviderId::Amazon])),
            vec![ProviderId::Mock]
        );
    }

    #[test]
    fn empty_id_and_query_lists_have_nothing_to_fetch() {
        let config = PipelineConfig::from_toml_str(
            "[providers.amazon]\n[providers.ebay.search]\nqueries = []\n[providers.shopify]\n",
        )
        .expect("valid config");

        assert!(!config.has_requests(ProviderId::Amazon));
        assert!(!config.has_requests(ProviderId::Ebay));
        assert!(config.has_requests(ProviderId::Shopify));
        assert!(!config.has_requests(ProviderId::Mock));

        let sample = PipelineConfig::from_toml_str(SAMPLE).expect("valid config");
        assert!(sample.has_requests(ProviderId::Ebay));
    }

    #[test]
    fn environment_rate_overrides_file() {
        let config = PipelineConfig::from_toml_str(SAMPLE).expect("valid config");
        let rates = config.rates(|name| (name == "EBAY_RPS").then(|| String::from("0.5")));

        assert_eq!(rates.get(&ProviderId::Shopify), Some(&2.0));
        assert_eq!(rates.get(&ProviderId::Ebay), Some(&0.5));
        assert_eq!(rates.get(&ProviderId::Mock), None);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig::load(&temp.path().join("absent.toml")).expect("defaults");

        assert!(config.enabled_providers(None).is_empty());
        assert_eq!(config.defaults.limit, 50);
    }

    #[test]
    fn malformed_file_is_reported() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pipeline.toml");
        fs::write(&path, "[defaults\nlimit = ").expect("write");

        assert!(matches!(
            PipelineConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn credentials_accept_prefixed_names() {
        let env = |name: &str| (name == "STORELINE_EBAY_OAUTH_TOKEN").then(|| String::from(" tok "));

        assert_eq!(env_credential(&env, "EBAY_OAUTH_TOKEN").as_deref(), Some("tok"));
        assert_eq!(env_credential(&env, "SHOPIFY_ACCESS_TOKEN"), None);
    }
}
