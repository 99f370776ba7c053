pub mod duration;
mod types;

pub use duration::Duration;
pub use types::*;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::Path;

pub const ENV_RULE_API_TOKEN: &str = "SENTINEL_RULE_API_TOKEN";
pub const ENV_AUTH_TOKEN: &str = "SENTINEL_AUTH_TOKEN";
pub const ENV_LOG_LEVEL: &str = "SENTINEL_LOG_LEVEL";

const MIN_PROBE_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Read, apply environment overrides and validate. Any failure is fatal
    /// for the process: the failover cycle never runs on a bad config.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yml::from_str(content).with_context(|| "Failed to parse config file")
    }

    /// Secrets normally live in the environment rather than the file
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(ENV_RULE_API_TOKEN).filter(|v| !v.is_empty()) {
            self.rule.api_token = token;
        }
        if let Some(token) = lookup(ENV_AUTH_TOKEN).filter(|v| !v.is_empty()) {
            self.admin.auth_token = token;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.log_level = level.to_lowercase();
        }
    }

    pub fn admin_address(&self) -> Result<SocketAddr> {
        self.admin
            .address
            .parse()
            .with_context(|| format!("Invalid admin address: {}", self.admin.address))
    }

    pub fn validate(&self) -> Result<()> {
        // Monitored target
        let url = url::Url::parse(&self.monitor.url)
            .with_context(|| format!("Invalid monitor URL: {}", self.monitor.url))?;
        if url.scheme() != "https" {
            anyhow::bail!("Monitor URL must use https, got '{}'", url.scheme());
        }
        if self.monitor.timeout < MIN_PROBE_TIMEOUT || self.monitor.timeout > MAX_PROBE_TIMEOUT {
            anyhow::bail!(
                "Monitor timeout must be between {} and {}, got {}",
                MIN_PROBE_TIMEOUT,
                MAX_PROBE_TIMEOUT,
                self.monitor.timeout
            );
        }
        if self.monitor.interval < Duration::from_secs(1) {
            anyhow::bail!("Monitor interval must be at least 1s");
        }

        if self.thresholds.failure == 0 {
            anyhow::bail!("Failure threshold must be a positive integer");
        }
        if self.thresholds.recovery == 0 {
            anyhow::bail!("Recovery threshold must be a positive integer");
        }

        // Rules API
        url::Url::parse(&self.rule.api_base)
            .with_context(|| format!("Invalid rules API base: {}", self.rule.api_base))?;
        for (name, value) in [
            ("rule.accountId", &self.rule.account_id),
            ("rule.zoneId", &self.rule.zone_id),
            ("rule.ruleId", &self.rule.rule_id),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }
        if self.rule.api_token.is_empty() {
            anyhow::bail!(
                "Rules API token missing: set rule.apiToken or {}",
                ENV_RULE_API_TOKEN
            );
        }

        // Admin API
        self.admin_address()?;
        if self.admin.auth_token.is_empty() {
            anyhow::bail!(
                "Admin auth token missing: set admin.authToken or {}",
                ENV_AUTH_TOKEN
            );
        }
        if let Some(rl) = &self.admin.rate_limit {
            if rl.average == 0 || rl.burst == 0 {
                anyhow::bail!("Rate limit average and burst must be positive");
            }
            if rl.period.is_zero() {
                anyhow::bail!("Rate limit period must be positive");
            }
        }

        // Persistence
        if self.store.instance_id.trim().is_empty() {
            anyhow::bail!("store.instanceId must not be empty");
        }
        match self.store.backend {
            StoreBackendKind::Memory => {}
            StoreBackendKind::File => {
                if self.store.path.is_none() {
                    anyhow::bail!("store.path is required for the file backend");
                }
            }
            StoreBackendKind::Valkey => {
                let valkey = self
                    .store
                    .valkey
                    .as_ref()
                    .context("store.valkey is required for the valkey backend")?;
                let endpoint = url::Url::parse(&valkey.endpoint).with_context(|| {
                    format!("Invalid store.valkey.endpoint: {}", valkey.endpoint)
                })?;
                // Built without redis TLS support
                if endpoint.scheme() != "redis" {
                    anyhow::bail!(
                        "store.valkey.endpoint must use redis://, got '{}'",
                        endpoint.scheme()
                    );
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .address
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid metrics address: {}", metrics.address))?;
        }

        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            anyhow::bail!(
                "Unknown log level '{}', expected one of {:?}",
                self.log_level,
                LOG_LEVELS
            );
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    let mut config = Config::from_yaml(
        r#"
monitor:
  url: https://origin.example.com/health
  timeout: 10s
  interval: 60s
thresholds:
  failure: 3
  recovery: 2
rule:
  accountId: acct-1
  zoneId: zone-1
  ruleId: rule-1
"#,
    )
    .unwrap();
    config.rule.api_token = "cf-token".to_string();
    config.admin.auth_token = "admin-token".to_string();
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = test_config();
        assert_eq!(config.monitor.timeout, Duration::from_secs(10));
        assert_eq!(config.admin.address, "0.0.0.0:8080");
        assert_eq!(config.store.backend, StoreBackendKind::Memory);
        assert_eq!(config.store.instance_id, "global");
        assert_eq!(config.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_plain_http_target() {
        let mut config = test_config();
        config.monitor.url = "http://origin.example.com/health".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("https"));
    }

    #[test]
    fn test_probe_timeout_bounds() {
        let mut config = test_config();
        config.monitor.timeout = Duration::from_secs(30);
        assert!(config.validate().is_ok());

        config.monitor.timeout = Duration::from_secs(31);
        assert!(config.validate().is_err());

        config.monitor.timeout = Duration::from_millis(500);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_thresholds_rejected() {
        let mut config = test_config();
        config.thresholds.failure = 0;
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.thresholds.recovery = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_secrets_fail_closed() {
        let mut config = test_config();
        config.rule.api_token.clear();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.admin.auth_token.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = test_config();
        config.apply_env_overrides(|key| match key {
            ENV_RULE_API_TOKEN => Some("from-env".to_string()),
            ENV_LOG_LEVEL => Some("DEBUG".to_string()),
            _ => None,
        });
        assert_eq!(config.rule.api_token, "from-env");
        assert_eq!(config.admin.auth_token, "admin-token");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_file_backend_requires_path() {
        let mut config = test_config();
        config.store.backend = StoreBackendKind::File;
        assert!(config.validate().is_err());

        config.store.path = Some("/tmp/sentinel.json".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_valkey_endpoint_scheme() {
        let mut config = test_config();
        config.store.backend = StoreBackendKind::Valkey;
        assert!(config.validate().is_err());

        config.store.valkey = Some(ValkeyConfig {
            endpoint: "rediss://cache.internal:6380".to_string(),
            password: None,
            username: None,
            db: 0,
            key_prefix: "sentinel".to_string(),
        });
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("redis://"), "{}", err);

        if let Some(valkey) = config.store.valkey.as_mut() {
            valkey.endpoint = "not a url".to_string();
        }
        assert!(config.validate().is_err());

        if let Some(valkey) = config.store.valkey.as_mut() {
            valkey.endpoint = "redis://cache.internal:6379".to_string();
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let config = test_config();
        let yaml = serde_yml::to_string(&config).unwrap();
        assert!(!yaml.contains("cf-token"));
        assert!(!yaml.contains("admin-token"));
    }
}
