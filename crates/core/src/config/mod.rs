//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (WEBMEMO_*)
//! 2. TOML config file (if WEBMEMO_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Deserializer, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (WEBMEMO_*)
/// 2. TOML config file (if WEBMEMO_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database backing the L2 tier.
    ///
    /// Set via WEBMEMO_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Whether the durable L2 tier is used at all.
    ///
    /// Set via WEBMEMO_L2_ENABLED environment variable.
    #[serde(default = "default_true")]
    pub l2_enabled: bool,

    /// Byte budget shared by every entry in the L1 tier.
    ///
    /// Set via WEBMEMO_L1_CAPACITY_BYTES environment variable.
    #[serde(default = "default_l1_capacity_bytes")]
    pub l1_capacity_bytes: usize,

    /// Upper bound for a single L2 call before the tier is treated as unavailable.
    ///
    /// Set via WEBMEMO_L2_TIMEOUT_MS environment variable.
    #[serde(default = "default_l2_timeout_ms")]
    pub l2_timeout_ms: u64,

    /// Interval between expiry sweeps.
    ///
    /// Set via WEBMEMO_SWEEP_INTERVAL_SECS environment variable.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Maximum number of L2 rows deleted per statement during a sweep.
    ///
    /// Set via WEBMEMO_SWEEP_BATCH_SIZE environment variable.
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,

    /// Selector records idle for longer than this are aged out.
    ///
    /// Set via WEBMEMO_SELECTOR_HORIZON_DAYS environment variable.
    #[serde(default = "default_selector_horizon_days")]
    pub selector_horizon_days: u64,

    /// Minimum plain success rate for `preferred_selector`.
    ///
    /// Set via WEBMEMO_MIN_SUCCESS_RATE environment variable.
    #[serde(default = "default_min_success_rate")]
    pub min_success_rate: f64,

    /// Query parameters dropped from URLs before keying.
    ///
    /// Set via WEBMEMO_EXCLUDED_QUERY_PARAMS environment variable (comma-separated).
    #[serde(default = "default_excluded_query_params", deserialize_with = "comma_list")]
    pub excluded_query_params: Vec<String>,

    /// Hosts whose query parameters are all significant.
    ///
    /// Set via WEBMEMO_PARAM_SENSITIVE_DOMAINS environment variable (comma-separated).
    #[serde(default = "default_param_sensitive_domains", deserialize_with = "comma_list")]
    pub param_sensitive_domains: Vec<String>,

    /// TTL policy table.
    ///
    /// Nested keys use a double underscore, e.g. WEBMEMO_TTL__TEXT_SECS.
    #[serde(default)]
    pub ttl: TtlConfig,
}

/// Durations and thresholds used by the TTL classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Structural selector resolutions (nav, header, forms).
    #[serde(default = "default_structural_secs")]
    pub structural_secs: u64,

    /// Plain text selector results.
    #[serde(default = "default_text_secs")]
    pub text_secs: u64,

    /// Navigation results and extracted page content.
    #[serde(default = "default_page_secs")]
    pub page_secs: u64,

    /// Payloads at or above this size are promoted to long durability.
    #[serde(default = "default_large_payload_bytes")]
    pub large_payload_bytes: usize,

    /// Minimum TTL granted to large payloads.
    #[serde(default = "default_large_payload_min_secs")]
    pub large_payload_min_secs: u64,

    /// Any TTL at or above this is long-lived and written to L2.
    #[serde(default = "default_long_threshold_secs")]
    pub long_threshold_secs: u64,
}

/// A string list given either as an array (TOML) or as one comma-separated
/// string (environment).
#[derive(Deserialize)]
#[serde(untagged)]
enum StringList {
    Csv(String),
    List(Vec<String>),
}

fn comma_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match StringList::deserialize(deserializer)? {
        StringList::Csv(raw) => raw.split(',').map(str::to_string).collect(),
        StringList::List(items) => items,
    };
    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./webmemo-cache.sqlite")
}

fn default_true() -> bool {
    true
}

fn default_l1_capacity_bytes() -> usize {
    200 * 1024 * 1024
}

fn default_l2_timeout_ms() -> u64 {
    2_000
}

fn default_sweep_interval_secs() -> u64 {
    1_800
}

fn default_sweep_batch_size() -> usize {
    500
}

fn default_selector_horizon_days() -> u64 {
    90
}

fn default_min_success_rate() -> f64 {
    0.8
}

fn default_excluded_query_params() -> Vec<String> {
    [
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_term",
        "utm_content",
        "fbclid",
        "gclid",
        "dclid",
        "msclkid",
        "ref",
        "referrer",
        "source",
        "_ga",
        "_gid",
        "_gac",
        "timestamp",
        "ts",
        "t",
        "session",
        "sessionid",
        "sid",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

fn default_param_sensitive_domains() -> Vec<String> {
    ["youtube.com", "youtu.be", "amazon.com", "github.com"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

fn default_structural_secs() -> u64 {
    86_400
}

fn default_text_secs() -> u64 {
    1_800
}

fn default_page_secs() -> u64 {
    3_600
}

fn default_large_payload_bytes() -> usize {
    10 * 1024
}

fn default_large_payload_min_secs() -> u64 {
    3_600
}

fn default_long_threshold_secs() -> u64 {
    3_600
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            structural_secs: default_structural_secs(),
            text_secs: default_text_secs(),
            page_secs: default_page_secs(),
            large_payload_bytes: default_large_payload_bytes(),
            large_payload_min_secs: default_large_payload_min_secs(),
            long_threshold_secs: default_long_threshold_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            l2_enabled: true,
            l1_capacity_bytes: default_l1_capacity_bytes(),
            l2_timeout_ms: default_l2_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
            selector_horizon_days: default_selector_horizon_days(),
            min_success_rate: default_min_success_rate(),
            excluded_query_params: default_excluded_query_params(),
            param_sensitive_domains: default_param_sensitive_domains(),
            ttl: TtlConfig::default(),
        }
    }
}

impl AppConfig {
    /// L2 call timeout as Duration for use with tokio.
    pub fn l2_timeout(&self) -> Duration {
        Duration::from_millis(self.l2_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn selector_horizon(&self) -> Duration {
        Duration::from_secs(self.selector_horizon_days.saturating_mul(24 * 60 * 60))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `WEBMEMO_`
    /// 2. TOML file from `WEBMEMO_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("WEBMEMO_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("WEBMEMO_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
