use super::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub thresholds: ThresholdConfig,

    pub rule: RuleConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub metrics: Option<MetricsConfig>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The single monitored target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// URL probed every cycle; must be https
    pub url: String,

    /// Hard timeout for one probe (1s..=30s)
    #[serde(default = "default_probe_timeout")]
    pub timeout: Duration,

    /// How often the failover cycle runs
    #[serde(default = "default_check_interval")]
    pub interval: Duration,
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdConfig {
    /// Consecutive failed probes before the redirect is enabled
    #[serde(default = "default_failure_threshold")]
    pub failure: u32,

    /// Consecutive healthy probes before the redirect is disabled again
    #[serde(default = "default_recovery_threshold")]
    pub recovery: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            failure: default_failure_threshold(),
            recovery: default_recovery_threshold(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_threshold() -> u32 {
    2
}

/// The guarded redirect rule and the credentials used to toggle it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    pub account_id: String,

    pub zone_id: String,

    pub rule_id: String,

    /// Usually supplied through SENTINEL_RULE_API_TOKEN
    #[serde(default, skip_serializing)]
    pub api_token: String,
}

fn default_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminConfig {
    #[serde(default = "default_admin_address")]
    pub address: String,

    /// Bearer token required on every endpoint except /health.
    /// Usually supplied through SENTINEL_AUTH_TOKEN
    #[serde(default, skip_serializing)]
    pub auth_token: String,

    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            address: default_admin_address(),
            auth_token: String::new(),
            rate_limit: None,
        }
    }
}

fn default_admin_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Per-client-IP token bucket in front of the admin API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Requests allowed per period on average
    #[serde(default = "default_rate_average")]
    pub average: u64,

    /// Maximum requests accepted in a burst
    #[serde(default = "default_rate_burst")]
    pub burst: u64,

    #[serde(default = "default_rate_period")]
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            average: default_rate_average(),
            burst: default_rate_burst(),
            period: default_rate_period(),
        }
    }
}

fn default_rate_average() -> u64 {
    60
}

fn default_rate_burst() -> u64 {
    30
}

fn default_rate_period() -> Duration {
    Duration::from_secs(60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackendKind {
    /// In-process only; state is lost on restart
    #[default]
    Memory,
    /// JSON document on local disk
    File,
    /// Valkey/Redis key
    Valkey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackendKind,

    /// State file for the `file` backend
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub valkey: Option<ValkeyConfig>,

    /// Fixed identifier of the single monitor state instance
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::default(),
            path: None,
            valkey: None,
            instance_id: default_instance_id(),
        }
    }
}

fn default_instance_id() -> String {
    "global".to_string()
}

/// Valkey/Redis connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValkeyConfig {
    /// "redis://host:port"; TLS endpoints are not supported
    pub endpoint: String,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Redis 6+ ACL user
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub db: i64,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "sentinel".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}
