//! Single-writer access to the shared monitor state.
//!
//! One actor task owns the `MonitorState` and applies commands strictly in
//! arrival order. Every named operation is load → transform → persist →
//! reply with the post-mutation snapshot, and nothing else can observe or
//! interleave with the intermediate steps.

use super::{
    MaintenanceWindow, MonitorState, RuleEvent, StateBackend, StoreError, StoreResult, Streak,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 64;

type Mutation = Box<dyn FnOnce(&mut MonitorState, DateTime<Utc>) -> StoreResult<()> + Send>;

enum Command {
    Get {
        reply: oneshot::Sender<StoreResult<MonitorState>>,
    },
    Mutate {
        op: &'static str,
        mutation: Mutation,
        reply: oneshot::Sender<StoreResult<MonitorState>>,
    },
    Ping {
        reply: oneshot::Sender<StoreResult<()>>,
    },
}

/// Cloneable handle to the state actor
#[derive(Clone)]
pub struct StateStore {
    tx: mpsc::Sender<Command>,
    backend_type: &'static str,
}

impl StateStore {
    /// Spawn the actor owning the instance identified by `instance_id`.
    /// Must be called from within a Tokio runtime.
    pub fn spawn(backend: Arc<dyn StateBackend>, instance_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let backend_type = backend.backend_type();
        let actor = StateActor {
            backend,
            instance_id: instance_id.into(),
            state: None,
            rx,
        };
        tokio::spawn(actor.run());

        Self { tx, backend_type }
    }

    pub fn backend_type(&self) -> &'static str {
        self.backend_type
    }

    /// Current state, initializing and persisting defaults on first access
    pub async fn get(&self) -> StoreResult<MonitorState> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get { reply }).await?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    /// Round trip through the actor and the backend
    pub async fn ping(&self) -> StoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Ping { reply }).await?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    pub async fn record_failure(&self) -> StoreResult<MonitorState> {
        self.mutate("record_failure", |s, now| {
            s.record_failure(now);
            Ok(())
        })
        .await
    }

    pub async fn record_success(&self) -> StoreResult<MonitorState> {
        self.mutate("record_success", |s, now| {
            s.record_success(now);
            Ok(())
        })
        .await
    }

    pub async fn reset_consecutive_counters(&self) -> StoreResult<MonitorState> {
        self.mutate("reset_consecutive_counters", |s, _| {
            s.reset_consecutive();
            Ok(())
        })
        .await
    }

    /// Zero the cumulative metrics only
    pub async fn reset_cumulative_metrics(&self) -> StoreResult<MonitorState> {
        self.mutate("reset_cumulative_metrics", |s, _| {
            s.reset_cumulative();
            Ok(())
        })
        .await
    }

    /// Zero consecutive counters and cumulative metrics
    pub async fn reset_all_metrics(&self) -> StoreResult<MonitorState> {
        self.mutate("reset_all_metrics", |s, _| {
            s.reset_all();
            Ok(())
        })
        .await
    }

    pub async fn record_rule_transition(
        &self,
        event: RuleEvent,
        reason: impl Into<String>,
    ) -> StoreResult<MonitorState> {
        let reason = reason.into();
        self.mutate("record_rule_transition", move |s, now| {
            if !s.record_rule_transition(event, reason, now) {
                debug!(
                    event = event.as_str(),
                    "Rule already in target state, transition not recorded"
                );
            }
            Ok(())
        })
        .await
    }

    pub async fn set_maintenance_mode(
        &self,
        enabled: bool,
        reason: Option<String>,
    ) -> StoreResult<MonitorState> {
        self.mutate("set_maintenance_mode", move |s, _| {
            s.set_maintenance_mode(enabled, reason);
            Ok(())
        })
        .await
    }

    pub async fn add_maintenance_window(
        &self,
        window: MaintenanceWindow,
    ) -> StoreResult<MonitorState> {
        self.mutate("add_maintenance_window", move |s, _| {
            s.add_window(window);
            Ok(())
        })
        .await
    }

    pub async fn remove_maintenance_window(&self, id: &str) -> StoreResult<MonitorState> {
        let id = id.to_string();
        self.mutate("remove_maintenance_window", move |s, _| {
            if s.remove_window(&id) {
                Ok(())
            } else {
                Err(StoreError::WindowNotFound(id))
            }
        })
        .await
    }

    pub async fn sweep_expired_windows(&self) -> StoreResult<MonitorState> {
        self.mutate("sweep_expired_windows", |s, now| {
            let removed = s.sweep_expired_windows(now);
            if removed > 0 {
                info!(removed, "Swept expired maintenance windows");
            }
            Ok(())
        })
        .await
    }

    pub async fn increment_api_errors(&self) -> StoreResult<MonitorState> {
        self.mutate("increment_api_errors", |s, _| {
            s.increment_api_errors();
            Ok(())
        })
        .await
    }

    pub async fn stamp_cron_time(&self) -> StoreResult<MonitorState> {
        self.mutate("stamp_cron_time", |s, now| {
            s.stamp_cron(now);
            Ok(())
        })
        .await
    }

    /// Latch the fail-closed flag. Only a process restart clears it.
    pub async fn suspend_api_calls(&self) -> StoreResult<MonitorState> {
        self.mutate("suspend_api_calls", |s, _| {
            s.suspend_api_calls();
            Ok(())
        })
        .await
    }

    /// Administrative override for manual failover testing
    pub async fn force_counters_to_threshold(
        &self,
        streak: Streak,
        threshold: u32,
    ) -> StoreResult<MonitorState> {
        self.mutate("force_counters_to_threshold", move |s, _| {
            s.force_streak(streak, threshold);
            Ok(())
        })
        .await
    }

    async fn mutate<F>(&self, op: &'static str, f: F) -> StoreResult<MonitorState>
    where
        F: FnOnce(&mut MonitorState, DateTime<Utc>) -> StoreResult<()> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Mutate {
            op,
            mutation: Box::new(f),
            reply,
        })
        .await?;
        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    async fn send(&self, command: Command) -> StoreResult<()> {
        self.tx.send(command).await.map_err(|_| StoreError::Unavailable)
    }
}

struct StateActor {
    backend: Arc<dyn StateBackend>,
    instance_id: String,
    /// Authoritative copy once loaded; the actor is the only writer
    state: Option<MonitorState>,
    rx: mpsc::Receiver<Command>,
}

impl StateActor {
    async fn run(mut self) {
        debug!(
            instance = %self.instance_id,
            backend = self.backend.backend_type(),
            "state actor started"
        );

        while let Some(command) = self.rx.recv().await {
            match command {
                Command::Get { reply } => {
                    let _ = reply.send(self.current().await);
                }
                Command::Mutate { op, mutation, reply } => {
                    let result = self.apply(mutation).await;
                    if let Err(e) = &result {
                        match e {
                            StoreError::WindowNotFound(_) => {
                                debug!(op, error = %e, "state operation rejected")
                            }
                            _ => error!(op, error = %e, "state operation failed"),
                        }
                    }
                    let _ = reply.send(result);
                }
                Command::Ping { reply } => {
                    let result = match self.backend.health_check().await {
                        Ok(()) => self.current().await.map(|_| ()),
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                }
            }
        }

        debug!(instance = %self.instance_id, "state actor stopped");
    }

    async fn current(&mut self) -> StoreResult<MonitorState> {
        if let Some(state) = &self.state {
            return Ok(state.clone());
        }

        let state = match self.backend.load(&self.instance_id).await? {
            Some(mut persisted) => {
                // The suspension latch lives for one process lifetime
                if persisted.api_calls_suspended {
                    warn!("Clearing API suspension latched by a previous process");
                    persisted.api_calls_suspended = false;
                    self.backend.save(&self.instance_id, &persisted).await?;
                }
                persisted
            }
            None => {
                let fresh = MonitorState::new(Utc::now());
                self.backend.save(&self.instance_id, &fresh).await?;
                info!(instance = %self.instance_id, "Initialized monitor state");
                fresh
            }
        };

        self.state = Some(state.clone());
        Ok(state)
    }

    /// Mutations are all-or-nothing: the cached state only changes after
    /// the backend accepted the new document.
    async fn apply(&mut self, mutation: Mutation) -> StoreResult<MonitorState> {
        let mut next = self.current().await?;
        mutation(&mut next, Utc::now())?;
        debug_assert!(next.counters_exclusive());

        self.backend.save(&self.instance_id, &next).await?;
        self.state = Some(next.clone());
        Ok(next)
    }
}
