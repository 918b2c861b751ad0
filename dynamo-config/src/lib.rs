//! The configuration surface enumerated in section 6 of the spec: one
//! `serde`-derived struct tree loaded from a TOML file, with a thin
//! environment-variable overlay for the handful of top-level scalars an
//! operator most often wants to flip without editing the file.
//!
//! An unrecognized top-level key is a [`DynamoError::Config`] at startup
//! (section 7: "unknown policy variable ... fatal at startup"), not a
//! silently-ignored field.

use std::path::{Path, PathBuf};

use dynamo_errors::{DynamoError, DynamoResult};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Paths {
    pub base: PathBuf,
    pub data: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryConfig {
    #[serde(default = "default_refresh_min")]
    pub refresh_min: u32,
    #[serde(default)]
    pub included_sites: Vec<String>,
    #[serde(default)]
    pub excluded_sites: Vec<String>,
    #[serde(default)]
    pub included_groups: Vec<String>,
}

fn default_refresh_min() -> u32 {
    360
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebserviceConfig {
    pub x509_key: PathBuf,
    #[serde(default = "default_num_attempts")]
    pub num_attempts: u8,
}

fn default_num_attempts() -> u8 {
    3
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhedexConfig {
    pub url_base: String,
    #[serde(default = "default_subscription_chunk_size")]
    pub subscription_chunk_size: u64,
}

fn default_subscription_chunk_size() -> u64 {
    40 * 1024 * 1024 * 1024 * 1024 // 40 TB
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbsConfig {
    pub url_base: String,
}

/// Connection string for the persistent inventory store (section 4.1);
/// the distilled configuration surface names `paths.{base,data}` but not
/// this, so it's carried alongside them as the one addition this crate
/// needs to actually open a `Store`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsbConfig {
    pub url_base: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockSourceKind {
    ListOfDatasets,
    SiteToDatasets,
    CmswebListOfDatasets,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeblockConfig {
    #[serde(default)]
    pub sources: Vec<(String, LockSourceKind)>,
    pub lock: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessHistoryConfig {
    pub increment_s: u32,
    pub max_back_query: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemandConfig {
    pub access_history: AccessHistoryConfig,
    /// `(delta_t_seconds, weight)` pairs, oldest-first.
    pub weight_time_bins: Vec<(u64, f64)>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetoxConfig {
    pub activity_indicator: String,
    pub deletion_per_iteration: f64,
    pub deletion_volume_per_request: f64,
    #[serde(default)]
    pub exclude_if_on: Vec<String>,
    #[serde(default)]
    pub time_shift: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DealerConfig {
    #[serde(default)]
    pub included_sites: Vec<String>,
    pub demand_refresh_interval_s: u64,
    pub max_dataset_size_tb: f64,
    pub request_to_replica_threshold: f64,
    pub max_copy_per_site_tb: f64,
    pub max_copy_total_tb: f64,
    pub max_replicas: u32,
    pub target_site_occupancy: f64,
    pub overflow_factor: f64,
    #[serde(default)]
    pub balancer_target_reasons: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub daemon_mode: bool,
    #[serde(default = "default_num_threads")]
    pub num_threads: u16,
    pub paths: Paths,
    pub store: StoreConfig,
    pub inventory: InventoryConfig,
    pub webservice: WebserviceConfig,
    pub phedex: PhedexConfig,
    pub dbs: DbsConfig,
    pub ssb: SsbConfig,
    pub weblock: WeblockConfig,
    pub demand: DemandConfig,
    pub detox: DetoxConfig,
    pub dealer: DealerConfig,
}

fn default_num_threads() -> u16 {
    32
}

/// The handful of top-level scalars an environment variable is allowed to
/// override, mirroring the teacher's layered config (a base file, then a
/// thin `envy`-style environment overlay). Anything more structural (sites,
/// rule stacks) belongs in the file.
#[derive(Debug, Clone, Default, Deserialize)]
struct EnvOverrides {
    read_only: Option<bool>,
    daemon_mode: Option<bool>,
    num_threads: Option<u16>,
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> DynamoResult<Config> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| DynamoError::config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| DynamoError::config(format!("malformed config {}: {e}", path.display())))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> DynamoResult<()> {
        let overrides: EnvOverrides = envy::prefixed("DYNAMO_")
            .from_env()
            .map_err(|e| DynamoError::config(format!("invalid DYNAMO_* environment override: {e}")))?;
        if let Some(v) = overrides.read_only {
            self.read_only = v;
        }
        if let Some(v) = overrides.daemon_mode {
            self.daemon_mode = v;
        }
        if let Some(v) = overrides.num_threads {
            self.num_threads = v;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [paths]
        base = "/var/dynamo"
        data = "/var/dynamo/data"

        [store]
        url = "mysql://dynamo@localhost/dynamo"

        [inventory]
        included_sites = ["*"]

        [webservice]
        x509_key = "/etc/dynamo/client.pem"

        [phedex]
        url_base = "https://example.test/phedex"

        [dbs]
        url_base = "https://example.test/dbs"

        [ssb]
        url_base = "https://example.test/ssb"

        [weblock]
        lock = "https://example.test/lock"

        [demand]
        weight_time_bins = [[86400, 1.0], [604800, 0.5]]

        [demand.access_history]
        increment_s = 86400
        max_back_query = 180

        [detox]
        activity_indicator = "fts"
        deletion_per_iteration = 0.05
        deletion_volume_per_request = 10.0

        [dealer]
        demand_refresh_interval_s = 3600
        max_dataset_size_tb = 10.0
        request_to_replica_threshold = 1.0
        max_copy_per_site_tb = 50.0
        max_copy_total_tb = 500.0
        max_replicas = 3
        target_site_occupancy = 0.9
        overflow_factor = 1.1
    "#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: Config = toml::from_str(MINIMAL).expect("valid config");
        assert_eq!(config.num_threads, 32);
        assert_eq!(config.webservice.num_attempts, 3);
        assert_eq!(config.phedex.subscription_chunk_size, 40 * 1024 * 1024 * 1024 * 1024);
        assert!(!config.read_only);
    }

    #[test]
    fn rejects_unknown_top_level_field() {
        let bad = format!("{MINIMAL}\nbogus_field = true\n");
        let result: Result<Config, _> = toml::from_str(&bad);
        assert!(result.is_err());
    }
}
