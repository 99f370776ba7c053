//! Client side of the redirect rule: reading its status and toggling it.

mod client;
mod controller;
mod retry;

pub use client::CloudflareRulesetApi;
pub use controller::RuleController;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RuleApiError {
    #[error("Credentials rejected with status {0}")]
    Unauthorized(u16),

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("API reported failure: {0}")]
    Api(String),

    #[error("Rule {0} not found in ruleset")]
    RuleNotFound(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl RuleApiError {
    /// Retrying an auth failure is pointless
    #[inline]
    pub fn is_auth(&self) -> bool {
        matches!(self, RuleApiError::Unauthorized(_))
    }
}

/// A ruleset as returned by the API. Rules stay untyped so fields this
/// crate does not know about are written back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ruleset {
    pub id: String,
    #[serde(default)]
    pub rules: Vec<Value>,
}

impl Ruleset {
    pub fn position(&self, rule_id: &str) -> Option<usize> {
        self.rules
            .iter()
            .position(|r| r.get("id").and_then(Value::as_str) == Some(rule_id))
    }
}

/// Live view of the guarded rule
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    pub id: String,
    pub ruleset_id: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

impl RuleInfo {
    fn from_rule(ruleset_id: &str, rule: &Value) -> Option<Self> {
        let field = |name: &str| rule.get(name).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            id: field("id")?,
            ruleset_id: ruleset_id.to_string(),
            // The API omits `enabled` on rules that are on
            enabled: rule.get("enabled").and_then(Value::as_bool).unwrap_or(true),
            description: field("description"),
            action: field("action"),
            last_updated: field("last_updated"),
        })
    }
}

/// Result of a toggle after retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Success,
    /// Retries exhausted; counted as an API error
    Failure,
    /// 401/403; the caller must latch suspension
    AuthenticationFailed,
}

/// Raw access to the rules API, one request per call
#[async_trait]
pub trait RulesetApi: Send + Sync {
    async fn fetch_ruleset(&self) -> Result<Ruleset, RuleApiError>;

    async fn update_rules(&self, ruleset_id: &str, rules: &[Value]) -> Result<(), RuleApiError>;
}

/// What the failover engine needs from the rule side
#[async_trait]
pub trait RuleToggle: Send + Sync {
    async fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> ToggleOutcome;

    /// Best effort; `None` when the API cannot be read
    async fn rule_status(&self, rule_id: &str) -> Option<RuleInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_info_defaults_enabled() {
        let rule = json!({"id": "r1", "action": "redirect", "description": "failover"});
        let info = RuleInfo::from_rule("rs1", &rule).unwrap();
        assert!(info.enabled);
        assert_eq!(info.action.as_deref(), Some("redirect"));

        let rule = json!({"id": "r1", "enabled": false});
        assert!(!RuleInfo::from_rule("rs1", &rule).unwrap().enabled);

        assert!(RuleInfo::from_rule("rs1", &json!({"enabled": true})).is_none());
    }

    #[test]
    fn test_ruleset_position() {
        let ruleset = Ruleset {
            id: "rs1".to_string(),
            rules: vec![json!({"id": "a"}), json!({"id": "b"})],
        };
        assert_eq!(ruleset.position("b"), Some(1));
        assert_eq!(ruleset.position("c"), None);
    }
}
