//! Maintenance suppression: when active, failover decisions are still
//! computed and counters still move, but the rule is never toggled.

use crate::state::{MaintenanceWindow, MonitorState};
use chrono::{DateTime, Utc};

/// Why actions are currently withheld
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suppression {
    MaintenanceMode { reason: Option<String> },
    Window { id: String, reason: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("startTime must not be after endTime")]
    Inverted,

    #[error("window has already ended")]
    AlreadyEnded,
}

/// True iff maintenance mode is on or any scheduled window covers `now`
pub fn is_suppressed(state: &MonitorState, now: DateTime<Utc>) -> bool {
    state.maintenance_mode_active || active_window(state, now).is_some()
}

pub fn suppression(state: &MonitorState, now: DateTime<Utc>) -> Option<Suppression> {
    if state.maintenance_mode_active {
        return Some(Suppression::MaintenanceMode {
            reason: state.maintenance_mode_reason.clone(),
        });
    }
    active_window(state, now).map(|w| Suppression::Window {
        id: w.id.clone(),
        reason: w.reason.clone(),
    })
}

pub fn active_window(state: &MonitorState, now: DateTime<Utc>) -> Option<&MaintenanceWindow> {
    state.scheduled_windows.iter().find(|w| w.is_active_at(now))
}

/// Windows are checked when they are created. Inverted windows are
/// rejected, and so are windows that would be swept on the next cycle.
pub fn validate_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), WindowError> {
    if start > end {
        return Err(WindowError::Inverted);
    }
    if end < now {
        return Err(WindowError::AlreadyEnded);
    }
    Ok(())
}
