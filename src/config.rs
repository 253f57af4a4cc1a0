//! Application configuration, loaded from environment variables and an
//! optional TOML file.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Global protection level (graduated response), ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    Monitor,
    JsChallenge,
    RateLimit,
    Block,
    Blackhole,
}

impl Default for ProtectionLevel {
    fn default() -> Self {
        Self::Monitor
    }
}

fn default_target_url() -> String {
    "http://localhost:3000".to_owned()
}

fn default_rules_dir() -> String {
    "rules/".to_owned()
}

fn default_model_dir() -> String {
    "models/".to_owned()
}

fn default_jwt_secret() -> String {
    "change-me-in-production".to_owned()
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

/// Application-wide settings, mirroring the original's `Settings` model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_target_url")]
    pub target_url: String,
    #[serde(default = "default_proxy_timeout_secs")]
    pub proxy_timeout_secs: u64,

    #[serde(default = "default_rate_limit_per_ip")]
    pub rate_limit_per_ip: u64,
    #[serde(default = "default_rate_limit_per_subnet")]
    pub rate_limit_per_subnet: u64,
    #[serde(default = "default_rate_limit_global")]
    pub rate_limit_global: u64,

    #[serde(default = "default_baseline_window_secs")]
    pub baseline_window_secs: u64,
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,

    #[serde(default)]
    pub protection_level: ProtectionLevel,
    #[serde(default)]
    pub under_attack_mode: bool,

    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,

    #[serde(default = "default_rules_dir")]
    pub rules_dir: String,
    #[serde(default = "default_model_dir")]
    pub model_dir: String,

    pub geoip_db_path: Option<String>,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_proxy_timeout_secs() -> u64 {
    30
}
fn default_rate_limit_per_ip() -> u64 {
    100
}
fn default_rate_limit_per_subnet() -> u64 {
    1000
}
fn default_rate_limit_global() -> u64 {
    10_000
}
fn default_baseline_window_secs() -> u64 {
    86_400
}
fn default_anomaly_threshold() -> f64 {
    0.75
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            target_url: default_target_url(),
            proxy_timeout_secs: default_proxy_timeout_secs(),
            rate_limit_per_ip: default_rate_limit_per_ip(),
            rate_limit_per_subnet: default_rate_limit_per_subnet(),
            rate_limit_global: default_rate_limit_global(),
            baseline_window_secs: default_baseline_window_secs(),
            anomaly_threshold: default_anomaly_threshold(),
            protection_level: ProtectionLevel::default(),
            under_attack_mode: false,
            jwt_secret: default_jwt_secret(),
            rules_dir: default_rules_dir(),
            model_dir: default_model_dir(),
            geoip_db_path: None,
            redis_url: None,
            database_url: None,
        }
    }
}

impl Config {
    /// Load configuration: compiled-in defaults, layered with an optional
    /// TOML file, layered with `SENTINEL_`-prefixed environment variables.
    pub fn load(toml_path: Option<&str>) -> Result<Self, crate::errors::ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = toml_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("SENTINEL_"));

        figment
            .extract()
            .map_err(|e| crate::errors::ConfigError::Load(e.to_string()))
    }
}
