use crate::state::MonitorState;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::time::Duration;

/// Initialize metrics with descriptions
pub fn init_metrics() {
    describe_counter!(
        "sentinel_cycles_total",
        "Failover cycles run, labelled by outcome"
    );
    describe_counter!(
        "sentinel_probes_total",
        "Health probes sent to the monitored URL"
    );
    describe_histogram!(
        "sentinel_probe_duration_seconds",
        "Health probe duration in seconds"
    );
    describe_counter!(
        "sentinel_rule_api_attempts_total",
        "Attempts against the rules API, labelled by result"
    );
    describe_gauge!(
        "sentinel_rule_active",
        "Redirect rule state as last set by this process (1=engaged)"
    );
}

/// Start Prometheus listener for process metrics on given address
pub fn start_metrics_server(addr: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: std::net::SocketAddr = addr.parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    init_metrics();

    Ok(())
}

pub struct Metrics;

impl Metrics {
    #[inline]
    pub fn record_probe(healthy: bool, duration: Duration) {
        let result = if healthy { "healthy" } else { "unhealthy" };
        counter!("sentinel_probes_total", "result" => result).increment(1);
        histogram!("sentinel_probe_duration_seconds").record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_cycle(outcome: &'static str) {
        counter!("sentinel_cycles_total", "outcome" => outcome).increment(1);
    }

    #[inline]
    pub fn record_rule_api_attempt(result: &'static str) {
        counter!("sentinel_rule_api_attempts_total", "result" => result).increment(1);
    }

    #[inline]
    pub fn set_rule_active(active: bool) {
        gauge!("sentinel_rule_active").set(if active { 1.0 } else { 0.0 });
    }
}

const STATE_COUNTERS: [(&str, &str); 5] = [
    ("sentinel_health_checks_total", "Total health checks performed"),
    ("sentinel_health_check_successes_total", "Health checks that returned 200"),
    ("sentinel_health_check_failures_total", "Health checks that failed or timed out"),
    ("sentinel_rule_changes_total", "Redirect rule transitions"),
    ("sentinel_rule_api_errors_total", "Rule toggles that failed after retries"),
];

const STATE_GAUGES: [(&str, &str); 4] = [
    ("sentinel_consecutive_failures", "Current consecutive failed checks"),
    ("sentinel_consecutive_successes", "Current consecutive successful checks"),
    ("sentinel_redirect_rule_active", "Redirect rule engaged (1) or not (0)"),
    ("sentinel_maintenance_mode_active", "Maintenance mode switched on (1) or not (0)"),
];

/// Prometheus text exposition of the persisted counters.
///
/// These come from `MonitorState` rather than the process-wide recorder so
/// they survive restarts. Each call renders through a fresh local recorder.
pub fn render_state(state: &MonitorState) -> String {
    let counters = [
        state.total_checks,
        state.total_successes,
        state.total_failures,
        state.total_rule_changes,
        state.total_api_errors,
    ];
    let gauges = [
        state.consecutive_failures as f64,
        state.consecutive_successes as f64,
        bool_gauge(state.rule_active),
        bool_gauge(state.maintenance_mode_active),
    ];

    let recorder = PrometheusBuilder::new().build_recorder();
    metrics::with_local_recorder(&recorder, || {
        for ((name, help), value) in STATE_COUNTERS.into_iter().zip(counters) {
            describe_counter!(name, help);
            counter!(name).absolute(value);
        }
        for ((name, help), value) in STATE_GAUGES.into_iter().zip(gauges) {
            describe_gauge!(name, help);
            gauge!(name).set(value);
        }
    });
    recorder.handle().render()
}

#[inline]
fn bool_gauge(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_render_state_counters() {
        let mut state = MonitorState::new(Utc::now());
        state.record_failure(Utc::now());
        state.record_failure(Utc::now());
        state.record_success(Utc::now());

        let text = render_state(&state);
        assert!(text.contains("# TYPE sentinel_health_checks_total counter"));
        assert!(text.contains("sentinel_health_checks_total 3\n"));
        assert!(text.contains("sentinel_health_check_failures_total 2\n"));
        assert!(text.contains("sentinel_health_check_successes_total 1\n"));
        assert!(text.contains("sentinel_rule_changes_total 0\n"));
        assert!(text.contains("sentinel_redirect_rule_active 0\n"));
        assert!(text.contains(
            "# HELP sentinel_rule_api_errors_total Rule toggles that failed after retries"
        ));
        assert!(text.contains("# TYPE sentinel_consecutive_failures gauge"));
        assert!(text.contains("sentinel_consecutive_failures 0\n"));
        assert!(text.contains("sentinel_consecutive_successes 1\n"));
    }

    #[test]
    fn test_render_state_is_independent_per_call() {
        let mut state = MonitorState::new(Utc::now());
        state.record_failure(Utc::now());
        state.rule_active = true;
        state.total_rule_changes = 4;
        assert!(render_state(&state).contains("sentinel_rule_changes_total 4\n"));

        // A later render reflects only the state it is given
        let fresh = MonitorState::new(Utc::now());
        let text = render_state(&fresh);
        assert!(text.contains("sentinel_rule_changes_total 0\n"));
        assert!(text.contains("sentinel_redirect_rule_active 0\n"));
        assert!(text.contains("sentinel_health_checks_total 0\n"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        Metrics::record_probe(true, Duration::from_millis(12));
        Metrics::record_cycle("no_action");
        Metrics::record_rule_api_attempt("success");
        Metrics::set_rule_active(true);
    }
}
