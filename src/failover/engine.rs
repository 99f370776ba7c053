use super::CycleOutcome;
use crate::config::Config;
use crate::health::{Probe, ProbeOutcome};
use crate::maintenance::{self, Suppression};
use crate::metrics::Metrics;
use crate::rules::{RuleInfo, RuleToggle, ToggleOutcome};
use crate::state::{RuleEvent, StateStore, StoreError, StoreResult, Streak};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const MANUAL_FAILOVER_REASON: &str = "Manual failover simulation";
const MANUAL_RECOVERY_REASON: &str = "Manual recovery simulation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub rule_id: String,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            failure_threshold: config.thresholds.failure,
            recovery_threshold: config.thresholds.recovery,
            rule_id: config.rule.rule_id.clone(),
        }
    }
}

/// Runs probe → count → decide → act against the shared state
pub struct FailoverEngine {
    settings: EngineSettings,
    store: StateStore,
    prober: Arc<dyn Probe>,
    rules: Arc<dyn RuleToggle>,
    /// Held from the rule state re-check until the transition is recorded
    toggle_lock: Mutex<()>,
}

impl FailoverEngine {
    pub fn new(
        settings: EngineSettings,
        store: StateStore,
        prober: Arc<dyn Probe>,
        rules: Arc<dyn RuleToggle>,
    ) -> Self {
        Self {
            settings,
            store,
            prober,
            rules,
            toggle_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// One scheduled cycle. Store errors abort the cycle; the next tick
    /// starts over from persisted state.
    pub async fn run_cycle(&self) -> StoreResult<CycleOutcome> {
        self.store.stamp_cron_time().await?;
        let state = self.store.sweep_expired_windows().await?;

        if state.api_calls_suspended {
            warn!("Rules API calls suspended after an authentication failure, skipping cycle");
            return Ok(CycleOutcome::Suspended);
        }

        let suppression = maintenance::suppression(&state, Utc::now());

        match self.prober.probe().await {
            ProbeOutcome::Healthy => {
                let state = self.store.record_success().await?;
                debug!(successes = state.consecutive_successes, "Health check passed");

                if state.consecutive_successes >= self.settings.recovery_threshold
                    && state.rule_active
                {
                    let reason = format!(
                        "Health check succeeded {} consecutive times",
                        state.consecutive_successes
                    );
                    return self.act(RuleEvent::Disabled, suppression, reason).await;
                }
                Ok(CycleOutcome::NoAction {
                    failures: state.consecutive_failures,
                    successes: state.consecutive_successes,
                })
            }
            ProbeOutcome::Unhealthy(diagnostic) => {
                let state = self.store.record_failure().await?;
                warn!(
                    failures = state.consecutive_failures,
                    threshold = self.settings.failure_threshold,
                    %diagnostic,
                    "Health check failed"
                );

                if state.consecutive_failures >= self.settings.failure_threshold
                    && !state.rule_active
                {
                    let reason = format!(
                        "Health check failed {} consecutive times",
                        state.consecutive_failures
                    );
                    return self.act(RuleEvent::Enabled, suppression, reason).await;
                }
                Ok(CycleOutcome::NoAction {
                    failures: state.consecutive_failures,
                    successes: state.consecutive_successes,
                })
            }
        }
    }

    /// Run a cycle and log its outcome; errors end here
    pub async fn run_scheduled_cycle(&self) -> Option<CycleOutcome> {
        match self.run_cycle().await {
            Ok(outcome) => {
                Metrics::record_cycle(outcome.label());
                match outcome {
                    CycleOutcome::NoAction { failures, successes } => {
                        debug!(failures, successes, "Cycle finished without action")
                    }
                    other => info!(outcome = ?other, "Cycle finished"),
                }
                Some(outcome)
            }
            Err(e) => {
                Metrics::record_cycle("error");
                error!(error = %e, "Cycle aborted");
                None
            }
        }
    }

    /// Drive the rule to `target` as if the threshold had just been
    /// crossed. Maintenance does not block this; the suspension latch does.
    /// Consecutive counters are reset afterwards whatever the outcome.
    pub async fn simulate(&self, target: RuleEvent) -> StoreResult<CycleOutcome> {
        let state = self.store.get().await?;
        if state.api_calls_suspended {
            return Ok(CycleOutcome::Suspended);
        }

        let (streak, threshold, reason) = match target {
            RuleEvent::Enabled => (
                Streak::Failures,
                self.settings.failure_threshold,
                MANUAL_FAILOVER_REASON,
            ),
            RuleEvent::Disabled => (
                Streak::Successes,
                self.settings.recovery_threshold,
                MANUAL_RECOVERY_REASON,
            ),
        };
        info!(target = target.as_str(), "Running manual simulation");

        let _guard = self.toggle_lock.lock().await;
        self.store.force_counters_to_threshold(streak, threshold).await?;
        let outcome = self.apply_toggle(target, reason.to_string()).await;
        let reset = self.store.reset_consecutive_counters().await;

        let outcome = outcome?;
        reset?;
        Ok(outcome)
    }

    pub async fn rule_status(&self) -> Option<RuleInfo> {
        self.rules.rule_status(&self.settings.rule_id).await
    }

    async fn act(
        &self,
        target: RuleEvent,
        suppression: Option<Suppression>,
        reason: String,
    ) -> StoreResult<CycleOutcome> {
        if let Some(suppression) = suppression {
            warn!(
                target = target.as_str(),
                ?suppression,
                %reason,
                "Threshold crossed during maintenance, rule left unchanged"
            );
            return Ok(CycleOutcome::Suppressed { target });
        }

        // An overlapping cycle may have completed the same transition while
        // this one was probing
        let _guard = self.toggle_lock.lock().await;
        let state = self.store.get().await?;
        if state.rule_active == target.is_enabled() {
            debug!(target = target.as_str(), "Rule already in target state, skipping toggle");
            return Ok(CycleOutcome::NoAction {
                failures: state.consecutive_failures,
                successes: state.consecutive_successes,
            });
        }
        self.apply_toggle(target, reason).await
    }

    async fn apply_toggle(
        &self,
        target: RuleEvent,
        reason: String,
    ) -> Result<CycleOutcome, StoreError> {
        let enabled = target.is_enabled();

        match self.rules.set_rule_enabled(&self.settings.rule_id, enabled).await {
            ToggleOutcome::Success => {
                let state = self.store.record_rule_transition(target, reason.clone()).await?;
                self.store.reset_consecutive_counters().await?;
                Metrics::set_rule_active(state.rule_active);
                info!(
                    rule_id = %self.settings.rule_id,
                    event = target.as_str(),
                    %reason,
                    "Redirect rule transitioned"
                );
                Ok(CycleOutcome::Transitioned(target))
            }
            ToggleOutcome::Failure => {
                let state = self.store.increment_api_errors().await?;
                error!(
                    rule_id = %self.settings.rule_id,
                    event = target.as_str(),
                    api_errors = state.total_api_errors,
                    "Could not update redirect rule"
                );
                Ok(CycleOutcome::ApiFailure(target))
            }
            ToggleOutcome::AuthenticationFailed => {
                self.store.suspend_api_calls().await?;
                error!(
                    rule_id = %self.settings.rule_id,
                    "Rules API credentials rejected, suspending further rule updates until restart"
                );
                Ok(CycleOutcome::AuthFailure(target))
            }
        }
    }
}
