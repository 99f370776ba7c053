use super::{RetryPolicy, RuleApiError, RuleInfo, RuleToggle, RulesetApi, ToggleOutcome};
use crate::metrics::Metrics;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Toggles one rule with read-modify-write of its ruleset.
///
/// An external edit of another rule landing between the GET and the PUT
/// is overwritten. Nothing here guards against that.
pub struct RuleController<A> {
    api: A,
    retry: RetryPolicy,
}

impl<A: RulesetApi> RuleController<A> {
    pub fn new(api: A, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    async fn try_set(&self, rule_id: &str, enabled: bool) -> Result<(), RuleApiError> {
        let mut ruleset = self.api.fetch_ruleset().await?;
        let index = ruleset
            .position(rule_id)
            .ok_or_else(|| RuleApiError::RuleNotFound(rule_id.to_string()))?;

        match ruleset.rules[index].as_object_mut() {
            Some(rule) => {
                rule.insert("enabled".to_string(), Value::Bool(enabled));
            }
            None => return Err(RuleApiError::Decode(format!("rule {} is not an object", rule_id))),
        }

        self.api.update_rules(&ruleset.id, &ruleset.rules).await
    }
}

#[async_trait]
impl<A: RulesetApi> RuleToggle for RuleController<A> {
    async fn set_rule_enabled(&self, rule_id: &str, enabled: bool) -> ToggleOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_set(rule_id, enabled).await {
                Ok(()) => {
                    Metrics::record_rule_api_attempt("success");
                    info!(rule_id, enabled, attempt, "Redirect rule updated");
                    return ToggleOutcome::Success;
                }
                Err(e) if e.is_auth() => {
                    Metrics::record_rule_api_attempt("unauthorized");
                    error!(rule_id, error = %e, "Rules API rejected credentials");
                    return ToggleOutcome::AuthenticationFailed;
                }
                Err(e) => {
                    Metrics::record_rule_api_attempt("error");
                    match self.retry.delay_after(attempt) {
                        Some(delay) => {
                            warn!(
                                rule_id,
                                attempt,
                                error = %e,
                                "Rule update failed, retrying in {:?}",
                                delay
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(rule_id, attempts = attempt, error = %e, "Rule update failed");
                            return ToggleOutcome::Failure;
                        }
                    }
                }
            }
        }
    }

    async fn rule_status(&self, rule_id: &str) -> Option<RuleInfo> {
        let ruleset = match self.api.fetch_ruleset().await {
            Ok(ruleset) => ruleset,
            Err(e) => {
                debug!(rule_id, error = %e, "Rule status unavailable");
                return None;
            }
        };
        let index = ruleset.position(rule_id)?;
        RuleInfo::from_rule(&ruleset.id, &ruleset.rules[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Ruleset;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Scripted API: each fetch pops the next result; updates are recorded
    #[derive(Default)]
    struct ScriptedApi {
        fetches: Mutex<VecDeque<Result<Ruleset, RuleApiError>>>,
        updates: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl ScriptedApi {
        fn with(results: Vec<Result<Ruleset, RuleApiError>>) -> Self {
            Self {
                fetches: Mutex::new(results.into()),
                updates: Mutex::new(Vec::new()),
            }
        }

        fn fetch_count_left(&self) -> usize {
            self.fetches.lock().len()
        }
    }

    #[async_trait]
    impl RulesetApi for ScriptedApi {
        async fn fetch_ruleset(&self) -> Result<Ruleset, RuleApiError> {
            self.fetches
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(RuleApiError::Transport("script exhausted".to_string())))
        }

        async fn update_rules(
            &self,
            ruleset_id: &str,
            rules: &[Value],
        ) -> Result<(), RuleApiError> {
            self.updates
                .lock()
                .push((ruleset_id.to_string(), rules.to_vec()));
            Ok(())
        }
    }

    fn ruleset() -> Ruleset {
        Ruleset {
            id: "rs1".to_string(),
            rules: vec![
                json!({"id": "other", "enabled": true, "expression": "http.host eq \"a\""}),
                json!({
                    "id": "rule-1",
                    "enabled": false,
                    "action": "redirect",
                    "action_parameters": {"from_value": {"target_url": {"value": "https://backup"}}}
                }),
            ],
        }
    }

    fn transient() -> Result<Ruleset, RuleApiError> {
        Err(RuleApiError::Status(500))
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_failures_then_success_waits_1s_and_2s() {
        let controller = RuleController::new(
            ScriptedApi::with(vec![transient(), transient(), Ok(ruleset())]),
            RetryPolicy::default(),
        );

        let start = Instant::now();
        let outcome = controller.set_rule_enabled("rule-1", true).await;

        assert_eq!(outcome, ToggleOutcome::Success);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(controller.api.updates.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_is_failure_without_final_wait() {
        let controller = RuleController::new(
            ScriptedApi::with(vec![transient(), transient(), transient(), Ok(ruleset())]),
            RetryPolicy::default(),
        );

        let start = Instant::now();
        let outcome = controller.set_rule_enabled("rule-1", true).await;

        assert_eq!(outcome, ToggleOutcome::Failure);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        // The fourth scripted response was never requested
        assert_eq!(controller.api.fetch_count_left(), 1);
        assert!(controller.api.updates.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_aborts_retries() {
        let controller = RuleController::new(
            ScriptedApi::with(vec![
                transient(),
                Err(RuleApiError::Unauthorized(403)),
                Ok(ruleset()),
            ]),
            RetryPolicy::default(),
        );

        let start = Instant::now();
        let outcome = controller.set_rule_enabled("rule-1", true).await;

        assert_eq!(outcome, ToggleOutcome::AuthenticationFailed);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(controller.api.fetch_count_left(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_target_enabled_changes() {
        let controller = RuleController::new(
            ScriptedApi::with(vec![Ok(ruleset())]),
            RetryPolicy::default(),
        );

        assert_eq!(
            controller.set_rule_enabled("rule-1", true).await,
            ToggleOutcome::Success
        );

        let updates = controller.api.updates.lock();
        let (ruleset_id, rules) = &updates[0];
        assert_eq!(ruleset_id, "rs1");

        let mut expected = ruleset().rules;
        expected[1]["enabled"] = json!(true);
        assert_eq!(rules, &expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_rule_is_retried_then_failure() {
        let controller = RuleController::new(
            ScriptedApi::with(vec![Ok(ruleset()), Ok(ruleset()), Ok(ruleset())]),
            RetryPolicy::default(),
        );

        assert_eq!(
            controller.set_rule_enabled("missing", true).await,
            ToggleOutcome::Failure
        );
        assert_eq!(controller.api.fetch_count_left(), 0);
        assert!(controller.api.updates.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rule_status() {
        let controller = RuleController::new(
            ScriptedApi::with(vec![Ok(ruleset()), transient()]),
            RetryPolicy::default(),
        );

        let info = controller.rule_status("rule-1").await.unwrap();
        assert_eq!(info.ruleset_id, "rs1");
        assert!(!info.enabled);
        assert_eq!(info.action.as_deref(), Some("redirect"));

        assert!(controller.rule_status("rule-1").await.is_none());
    }
}
