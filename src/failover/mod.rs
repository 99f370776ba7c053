//! Threshold-based failover decisions for the monitored origin.

mod engine;

pub use engine::{EngineSettings, FailoverEngine};

use crate::state::RuleEvent;

/// What one cycle (or one manual simulation) ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Rules API calls are latched off; nothing was probed or changed
    Suspended,
    /// Counters updated, no threshold crossed
    NoAction { failures: u32, successes: u32 },
    /// A threshold was crossed but maintenance withheld the toggle
    Suppressed { target: RuleEvent },
    Transitioned(RuleEvent),
    /// Toggle failed after retries
    ApiFailure(RuleEvent),
    /// Credentials rejected; suspension is now latched
    AuthFailure(RuleEvent),
}

impl CycleOutcome {
    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            CycleOutcome::Suspended => "suspended",
            CycleOutcome::NoAction { .. } => "no_action",
            CycleOutcome::Suppressed { .. } => "suppressed",
            CycleOutcome::Transitioned(_) => "transitioned",
            CycleOutcome::ApiFailure(_) => "api_failure",
            CycleOutcome::AuthFailure(_) => "auth_failure",
        }
    }
}
