use super::{RuleApiError, Ruleset, RulesetApi};
use crate::config::RuleConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const REDIRECT_PHASE: &str = "http_request_dynamic_redirect";

/// Standard response envelope of the Cloudflare v4 API
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    message: String,
}

/// Rulesets API client for the zone's dynamic redirect phase
pub struct CloudflareRulesetApi {
    http_client: reqwest::Client,
    api_base: String,
    zone_id: String,
    api_token: String,
}

impl CloudflareRulesetApi {
    pub fn new(config: &RuleConfig) -> Result<Self, RuleApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RuleApiError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            zone_id: config.zone_id.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn entrypoint_url(&self) -> String {
        format!(
            "{}/zones/{}/rulesets/phases/{}/entrypoint",
            self.api_base, self.zone_id, REDIRECT_PHASE
        )
    }

    fn ruleset_url(&self, ruleset_id: &str) -> String {
        format!("{}/zones/{}/rulesets/{}", self.api_base, self.zone_id, ruleset_id)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RuleApiError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RuleApiError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(RuleApiError::Status(status.as_u16()));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| RuleApiError::Decode(e.to_string()))?;

        if !envelope.success {
            let messages: Vec<String> = envelope
                .errors
                .iter()
                .map(|m| match m.code {
                    Some(code) => format!("{} ({})", m.message, code),
                    None => m.message.clone(),
                })
                .collect();
            return Err(RuleApiError::Api(messages.join("; ")));
        }

        envelope
            .result
            .ok_or_else(|| RuleApiError::Decode("response has no result".to_string()))
    }
}

#[async_trait]
impl RulesetApi for CloudflareRulesetApi {
    async fn fetch_ruleset(&self) -> Result<Ruleset, RuleApiError> {
        let url = self.entrypoint_url();
        debug!(%url, "Fetching redirect ruleset");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| RuleApiError::Transport(e.to_string()))?;

        Self::decode(response).await
    }

    async fn update_rules(&self, ruleset_id: &str, rules: &[Value]) -> Result<(), RuleApiError> {
        let url = self.ruleset_url(ruleset_id);
        debug!(%url, rules = rules.len(), "Updating redirect ruleset");

        let response = self
            .http_client
            .put(&url)
            .bearer_auth(&self.api_token)
            .json(&json!({ "rules": rules }))
            .send()
            .await
            .map_err(|e| RuleApiError::Transport(e.to_string()))?;

        Self::decode::<Value>(response).await.map(|_| ())
    }
}
