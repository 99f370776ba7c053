use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of rule transitions kept in history
pub const HISTORY_LIMIT: usize = 50;

/// A scheduled "do not act" window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindow {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MaintenanceWindow {
    pub fn new(start_time: DateTime<Utc>, end_time: DateTime<Utc>, reason: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_time,
            end_time,
            reason,
        }
    }

    /// Inclusive on both ends. An inverted window is never active.
    #[inline]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.start_time <= now && now <= self.end_time
    }

    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.end_time < now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleEvent {
    Enabled,
    Disabled,
}

impl RuleEvent {
    #[inline]
    pub fn is_enabled(self) -> bool {
        matches!(self, RuleEvent::Enabled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleEvent::Enabled => "enabled",
            RuleEvent::Disabled => "disabled",
        }
    }
}

/// One recorded rule transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub event: RuleEvent,
    pub reason: String,
    /// Consecutive failures at the moment of the transition
    pub failure_count: u32,
    /// Consecutive successes at the moment of the transition
    pub recovery_count: u32,
}

/// Which consecutive counter an administrative override targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Streak {
    Failures,
    Successes,
}

/// The single shared monitoring state.
///
/// Every mutation goes through `StateStore`; the methods here are the pure
/// transformations the store applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorState {
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub rule_active: bool,

    pub maintenance_mode_active: bool,
    #[serde(default)]
    pub maintenance_mode_reason: Option<String>,
    #[serde(default)]
    pub scheduled_windows: Vec<MaintenanceWindow>,

    /// Newest first, at most `HISTORY_LIMIT` entries
    #[serde(default)]
    pub rule_change_history: Vec<HistoryEntry>,

    pub total_checks: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rule_changes: u64,
    pub total_api_errors: u64,

    #[serde(default)]
    pub last_check_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_cron_time: Option<DateTime<Utc>>,
    pub process_start_time: DateTime<Utc>,

    /// Latched after the rules API rejects our credentials
    #[serde(default)]
    pub api_calls_suspended: bool,
}

impl MonitorState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            consecutive_failures: 0,
            consecutive_successes: 0,
            rule_active: false,
            maintenance_mode_active: false,
            maintenance_mode_reason: None,
            scheduled_windows: Vec::new(),
            rule_change_history: Vec::new(),
            total_checks: 0,
            total_successes: 0,
            total_failures: 0,
            total_rule_changes: 0,
            total_api_errors: 0,
            last_check_time: None,
            last_cron_time: None,
            process_start_time: now,
            api_calls_suspended: false,
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
        self.total_checks += 1;
        self.total_failures += 1;
        self.last_check_time = Some(now);
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
        self.total_checks += 1;
        self.total_successes += 1;
        self.last_check_time = Some(now);
    }

    pub fn reset_consecutive(&mut self) {
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
    }

    pub fn reset_cumulative(&mut self) {
        self.total_checks = 0;
        self.total_successes = 0;
        self.total_failures = 0;
        self.total_rule_changes = 0;
        self.total_api_errors = 0;
    }

    pub fn reset_all(&mut self) {
        self.reset_consecutive();
        self.reset_cumulative();
    }

    /// Set the rule state and prepend a history entry, evicting the oldest
    /// entries beyond `HISTORY_LIMIT`. Returns false and leaves the state
    /// untouched when the rule is already in the event's state.
    pub fn record_rule_transition(
        &mut self,
        event: RuleEvent,
        reason: String,
        now: DateTime<Utc>,
    ) -> bool {
        if self.rule_active == event.is_enabled() {
            return false;
        }
        self.rule_active = event.is_enabled();
        self.rule_change_history.insert(
            0,
            HistoryEntry {
                timestamp: now,
                event,
                reason,
                failure_count: self.consecutive_failures,
                recovery_count: self.consecutive_successes,
            },
        );
        self.rule_change_history.truncate(HISTORY_LIMIT);
        self.total_rule_changes += 1;
        true
    }

    pub fn set_maintenance_mode(&mut self, enabled: bool, reason: Option<String>) {
        self.maintenance_mode_active = enabled;
        self.maintenance_mode_reason = if enabled { reason } else { None };
    }

    /// Windows have set semantics on id
    pub fn add_window(&mut self, window: MaintenanceWindow) {
        self.scheduled_windows.retain(|w| w.id != window.id);
        self.scheduled_windows.push(window);
    }

    pub fn remove_window(&mut self, id: &str) -> bool {
        let before = self.scheduled_windows.len();
        self.scheduled_windows.retain(|w| w.id != id);
        self.scheduled_windows.len() != before
    }

    /// Drop windows whose end lies in the past, returning how many were removed
    pub fn sweep_expired_windows(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.scheduled_windows.len();
        self.scheduled_windows.retain(|w| !w.is_expired_at(now));
        before - self.scheduled_windows.len()
    }

    pub fn increment_api_errors(&mut self) {
        self.total_api_errors += 1;
    }

    pub fn stamp_cron(&mut self, now: DateTime<Utc>) {
        self.last_cron_time = Some(now);
    }

    pub fn suspend_api_calls(&mut self) {
        self.api_calls_suspended = true;
    }

    /// Administrative override used by the failover/recovery simulations
    pub fn force_streak(&mut self, streak: Streak, value: u32) {
        match streak {
            Streak::Failures => {
                self.consecutive_failures = value;
                self.consecutive_successes = 0;
            }
            Streak::Successes => {
                self.consecutive_successes = value;
                self.consecutive_failures = 0;
            }
        }
    }

    /// At most one consecutive counter is ever positive
    #[inline]
    pub fn counters_exclusive(&self) -> bool {
        self.consecutive_failures == 0 || self.consecutive_successes == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_counters_stay_exclusive() {
        let mut state = MonitorState::new(now());

        state.record_failure(now());
        state.record_failure(now());
        assert_eq!(state.consecutive_failures, 2);
        assert!(state.counters_exclusive());

        state.record_success(now());
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.consecutive_successes, 1);
        assert!(state.counters_exclusive());

        assert_eq!(state.total_checks, 3);
        assert_eq!(state.total_failures, 2);
        assert_eq!(state.total_successes, 1);
        assert!(state.last_check_time.is_some());
    }

    #[test]
    fn test_history_capped_newest_first() {
        let mut state = MonitorState::new(now());
        let start = now();

        for i in 0..(HISTORY_LIMIT + 10) {
            let event = if i % 2 == 0 {
                RuleEvent::Enabled
            } else {
                RuleEvent::Disabled
            };
            assert!(state.record_rule_transition(
                event,
                format!("transition {}", i),
                start + Duration::seconds(i as i64),
            ));
            assert!(state.rule_change_history.len() <= HISTORY_LIMIT);
        }

        assert_eq!(state.rule_change_history.len(), HISTORY_LIMIT);
        assert_eq!(state.total_rule_changes, (HISTORY_LIMIT + 10) as u64);
        assert_eq!(state.rule_change_history[0].reason, "transition 59");
        assert!(state
            .rule_change_history
            .windows(2)
            .all(|pair| pair[0].timestamp >= pair[1].timestamp));
    }

    #[test]
    fn test_transition_captures_counters() {
        let mut state = MonitorState::new(now());
        for _ in 0..3 {
            state.record_failure(now());
        }
        state.record_rule_transition(RuleEvent::Enabled, "down".to_string(), now());

        assert!(state.rule_active);
        let entry = &state.rule_change_history[0];
        assert_eq!(entry.event, RuleEvent::Enabled);
        assert_eq!(entry.failure_count, 3);
        assert_eq!(entry.recovery_count, 0);
    }

    #[test]
    fn test_repeated_transition_is_ignored() {
        let mut state = MonitorState::new(now());
        assert!(state.record_rule_transition(RuleEvent::Enabled, "down".to_string(), now()));
        state.record_failure(now());
        assert!(!state.record_rule_transition(RuleEvent::Enabled, "again".to_string(), now()));

        assert!(state.rule_active);
        assert_eq!(state.total_rule_changes, 1);
        assert_eq!(state.rule_change_history.len(), 1);
        assert_eq!(state.rule_change_history[0].reason, "down");

        // Disabling an inactive rule is a no-op as well
        let mut idle = MonitorState::new(now());
        assert!(!idle.record_rule_transition(RuleEvent::Disabled, "up".to_string(), now()));
        assert!(idle.rule_change_history.is_empty());
        assert_eq!(idle.total_rule_changes, 0);
    }

    #[test]
    fn test_sweep_only_removes_ended_windows() {
        let mut state = MonitorState::new(now());
        let t = now();
        state.add_window(MaintenanceWindow::new(
            t - Duration::hours(2),
            t - Duration::hours(1),
            None,
        ));
        state.add_window(MaintenanceWindow::new(
            t - Duration::minutes(5),
            t + Duration::minutes(5),
            Some("deploy".to_string()),
        ));

        assert_eq!(state.sweep_expired_windows(t), 1);
        assert_eq!(state.scheduled_windows.len(), 1);
        assert_eq!(state.scheduled_windows[0].reason.as_deref(), Some("deploy"));
    }

    #[test]
    fn test_add_window_is_set_on_id() {
        let mut state = MonitorState::new(now());
        let t = now();
        let mut window = MaintenanceWindow::new(t, t + Duration::hours(1), None);
        state.add_window(window.clone());
        window.reason = Some("updated".to_string());
        state.add_window(window.clone());

        assert_eq!(state.scheduled_windows.len(), 1);
        assert!(state.remove_window(&window.id));
        assert!(!state.remove_window(&window.id));
    }

    #[test]
    fn test_maintenance_reason_cleared_when_disabled() {
        let mut state = MonitorState::new(now());
        state.set_maintenance_mode(true, Some("migration".to_string()));
        assert!(state.maintenance_mode_active);

        state.set_maintenance_mode(false, Some("ignored".to_string()));
        assert!(!state.maintenance_mode_active);
        assert!(state.maintenance_mode_reason.is_none());
    }

    #[test]
    fn test_reset_variants() {
        let mut state = MonitorState::new(now());
        state.record_failure(now());
        state.increment_api_errors();

        state.reset_cumulative();
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.total_checks, 0);
        assert_eq!(state.total_api_errors, 0);

        state.reset_all();
        assert_eq!(state.consecutive_failures, 0);
    }

    #[test]
    fn test_force_streak_zeroes_opposite() {
        let mut state = MonitorState::new(now());
        state.record_success(now());
        state.force_streak(Streak::Failures, 3);
        assert_eq!(state.consecutive_failures, 3);
        assert_eq!(state.consecutive_successes, 0);
        // Overrides do not count as checks
        assert_eq!(state.total_checks, 1);
    }

    #[test]
    fn test_inverted_window_never_active() {
        let t = now();
        let window = MaintenanceWindow::new(t + Duration::hours(1), t - Duration::hours(1), None);
        assert!(!window.is_active_at(t));
    }

    #[test]
    fn test_json_shape() {
        let state = MonitorState::new(now());
        let json = serde_json::to_value(&state).unwrap();
        assert!(json.get("consecutiveFailures").is_some());
        assert!(json.get("ruleChangeHistory").is_some());
        assert!(json.get("apiCallsSuspended").is_some());
    }
}
