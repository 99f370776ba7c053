//! Fixed-interval trigger for failover cycles.

use crate::failover::FailoverEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Fires one cycle per interval. A slow cycle never delays or cancels the
/// next one; each runs as its own tracked task.
pub struct Scheduler {
    engine: Arc<FailoverEngine>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<FailoverEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Tick until `shutdown` flips, then wait for in-flight cycles
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles: JoinSet<()> = JoinSet::new();

        info!(interval = ?self.interval, "Scheduler started");

        loop {
            // Reap finished cycles
            while cycles.try_join_next().is_some() {}

            tokio::select! {
                _ = ticker.tick() => {
                    let engine = self.engine.clone();
                    cycles.spawn(async move {
                        engine.run_scheduled_cycle().await;
                    });
                }
                _ = shutdown.changed() => {
                    debug!("Scheduler shutting down");
                    break;
                }
            }
        }

        let in_flight = cycles.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight cycles to finish");
            while cycles.join_next().await.is_some() {}
        }

        debug!("Scheduler stopped");
    }
}
