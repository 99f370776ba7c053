use async_trait::async_trait;
use parking_lot::Mutex;
use redirect_sentinel::failover::{CycleOutcome, EngineSettings, FailoverEngine};
use redirect_sentinel::health::{Probe, ProbeOutcome};
use redirect_sentinel::rules::{RuleInfo, RuleToggle, ToggleOutcome};
use redirect_sentinel::state::{FileBackend, MemoryBackend, RuleEvent, StateBackend, StateStore};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Default)]
struct ScriptedProber {
    outcomes: Mutex<VecDeque<bool>>,
}

#[async_trait]
impl Probe for ScriptedProber {
    async fn probe(&self) -> ProbeOutcome {
        match self.outcomes.lock().pop_front() {
            Some(false) => ProbeOutcome::Unhealthy("status 502 Bad Gateway".to_string()),
            _ => ProbeOutcome::Healthy,
        }
    }
}

#[derive(Default)]
struct RecordingRules {
    calls: Mutex<Vec<bool>>,
}

#[async_trait]
impl RuleToggle for RecordingRules {
    async fn set_rule_enabled(&self, _rule_id: &str, enabled: bool) -> ToggleOutcome {
        self.calls.lock().push(enabled);
        ToggleOutcome::Success
    }

    async fn rule_status(&self, _rule_id: &str) -> Option<RuleInfo> {
        None
    }
}

fn engine(
    backend: Arc<dyn StateBackend>,
    probes: &[bool],
) -> (FailoverEngine, Arc<RecordingRules>) {
    let prober = Arc::new(ScriptedProber {
        outcomes: Mutex::new(probes.iter().copied().collect()),
    });
    let rules = Arc::new(RecordingRules::default());
    let engine = FailoverEngine::new(
        EngineSettings {
            failure_threshold: 3,
            recovery_threshold: 2,
            rule_id: "rule-1".to_string(),
        },
        StateStore::spawn(backend, "global"),
        prober,
        rules.clone(),
    );
    (engine, rules)
}

#[tokio::test]
async fn fails_over_and_recovers() {
    let (engine, rules) = engine(
        Arc::new(MemoryBackend::new()),
        &[false, false, false, true, true],
    );

    let mut outcomes = Vec::new();
    for _ in 0..3 {
        outcomes.push(engine.run_cycle().await.unwrap());
    }
    assert_eq!(outcomes[2], CycleOutcome::Transitioned(RuleEvent::Enabled));
    assert_eq!(*rules.calls.lock(), vec![true]);

    let state = engine.store().get().await.unwrap();
    assert!(state.rule_active);
    assert_eq!(state.rule_change_history.len(), 1);
    assert_eq!(state.rule_change_history[0].event, RuleEvent::Enabled);
    assert_eq!(state.rule_change_history[0].failure_count, 3);
    assert_eq!(state.rule_change_history[0].recovery_count, 0);
    assert_eq!((state.consecutive_failures, state.consecutive_successes), (0, 0));

    assert!(matches!(
        engine.run_cycle().await.unwrap(),
        CycleOutcome::NoAction { failures: 0, successes: 1 }
    ));
    assert_eq!(
        engine.run_cycle().await.unwrap(),
        CycleOutcome::Transitioned(RuleEvent::Disabled)
    );
    assert_eq!(*rules.calls.lock(), vec![true, false]);

    let state = engine.store().get().await.unwrap();
    assert!(!state.rule_active);
    assert_eq!(state.rule_change_history.len(), 2);
    assert_eq!(state.rule_change_history[0].event, RuleEvent::Disabled);
    assert_eq!((state.consecutive_failures, state.consecutive_successes), (0, 0));
    assert_eq!(state.total_checks, 5);
    assert_eq!(state.total_rule_changes, 2);
}

#[tokio::test]
async fn state_survives_restart_with_file_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let (engine, _) = engine(Arc::new(FileBackend::new(&path)), &[false, false, false]);
        for _ in 0..3 {
            engine.run_cycle().await.unwrap();
        }
        engine.store().suspend_api_calls().await.unwrap();
    }

    // A new process picks up the rule state but not the suspension latch
    let (engine, rules) = engine(Arc::new(FileBackend::new(&path)), &[true]);
    let state = engine.store().get().await.unwrap();
    assert!(state.rule_active);
    assert_eq!(state.rule_change_history.len(), 1);
    assert!(!state.api_calls_suspended);

    assert!(matches!(
        engine.run_cycle().await.unwrap(),
        CycleOutcome::NoAction { failures: 0, successes: 1 }
    ));
    assert!(rules.calls.lock().is_empty());
}
