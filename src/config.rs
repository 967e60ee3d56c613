use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::auth::AuthScheme;
use crate::credentials::{load_api_keys, ApiKeys};
use crate::error::ConfigError;

/// Environment variable consulted when `--config` is not given
pub const CONFIG_ENV_VAR: &str = "FIELDCLIMATE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn default_base_url() -> String {
    "https://api.fieldclimate.com/v2".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_requests_per_hour() -> u32 {
    7200
}

fn default_initial_backoff_secs() -> f64 {
    5.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_transport_retries() -> u32 {
    3
}

fn default_transport_backoff_secs() -> f64 {
    0.5
}

fn default_backfill_days() -> i64 {
    7
}

/// Largest accepted `backoff_factor`
pub const MAX_BACKOFF_FACTOR: f64 = 10.0;
/// Largest accepted backoff delay setting, in seconds
pub const MAX_BACKOFF_SECS: f64 = 86_400.0;
/// Largest accepted `backfill_days` (about a century)
pub const MAX_BACKFILL_DAYS: i64 = 36_500;

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Collector configuration file structure
///
/// ```toml
/// [api]
/// public_key_path = "secrets/public_key.txt"
/// private_key_path = "secrets/private_key.txt"
///
/// [database]
/// path = "data/fieldclimate.sqlite"
///
/// [[stations]]
/// id = "00208E6F"
/// name = "North field"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Stations to collect from (default: none)
    #[serde(default)]
    pub stations: Vec<StationConfig>,
}

/// `[api]` section
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// File containing the HMAC public key
    pub public_key_path: PathBuf,
    /// File containing the HMAC private key
    pub private_key_path: PathBuf,
    /// API root (default: https://api.fieldclimate.com/v2)
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Signing scheme: hmac-date or signed-headers (default: hmac-date)
    #[serde(default)]
    pub auth_scheme: AuthScheme,
    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Application-level retries for malformed responses and timeouts (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Request ceiling; requests are spaced 3600 / N seconds apart (default: 7200)
    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u32,
    /// First application-level backoff delay in seconds (default: 5.0)
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: f64,
    /// Backoff multiplier per attempt (default: 2.0)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Re-sends on 429/5xx below the client call (default: 3)
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,
    /// Base delay for transport re-sends, doubled each time (default: 0.5)
    #[serde(default = "default_transport_backoff_secs")]
    pub transport_backoff_secs: f64,
}

/// `[database]` section
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file; parent directories are created on open
    pub path: PathBuf,
    /// Run VACUUM after every collection run (default: false)
    #[serde(default)]
    pub optimize_after_collection: bool,
}

/// `[collection]` section
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Days of history fetched for new sensors and for stations with no watermark (default: 7)
    #[serde(default = "default_backfill_days")]
    pub backfill_days: i64,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            backfill_days: default_backfill_days(),
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// env_logger filter used when RUST_LOG is unset (default: info)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Also append logs to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// One `[[stations]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct StationConfig {
    pub id: String,
    /// Display name override; the API name is used when absent
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AppConfig {
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(origin.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_toml_str(&content, path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.requests_per_hour == 0 {
            return Err(ConfigError::Invalid(
                "api.requests_per_hour must be greater than 0".to_string(),
            ));
        }
        let factor = self.api.backoff_factor;
        if factor.is_nan() || factor <= 0.0 || factor > MAX_BACKOFF_FACTOR {
            return Err(ConfigError::Invalid(format!(
                "api.backoff_factor must be in (0, {}]",
                MAX_BACKOFF_FACTOR
            )));
        }
        let delays = [
            ("api.initial_backoff_secs", self.api.initial_backoff_secs),
            ("api.transport_backoff_secs", self.api.transport_backoff_secs),
        ];
        for (name, secs) in delays {
            if !(0.0..=MAX_BACKOFF_SECS).contains(&secs) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 0 and {}",
                    name, MAX_BACKOFF_SECS
                )));
            }
        }
        if !(0..=MAX_BACKFILL_DAYS).contains(&self.collection.backfill_days) {
            return Err(ConfigError::Invalid(format!(
                "collection.backfill_days must be between 0 and {}",
                MAX_BACKFILL_DAYS
            )));
        }

        let mut seen = HashSet::new();
        for station in &self.stations {
            if station.id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "station id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(station.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "station '{}' is listed more than once",
                    station.id
                )));
            }
        }
        Ok(())
    }

    /// Read key material referenced by `[api]`. Relative key paths resolve against the working directory.
    pub fn api_keys(&self) -> Result<ApiKeys, ConfigError> {
        load_api_keys(&self.api.public_key_path, &self.api.private_key_path)
    }
}

/// `--config` flag, then FIELDCLIMATE_CONFIG, then ./config.toml
pub fn resolve_config_path(cli_path: Option<PathBuf>) -> PathBuf {
    cli_path
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
