//! Process wiring: state store, failover engine, scheduler and admin API.

use crate::admin::{AdminApi, AdminServer};
use crate::config::Config;
use crate::failover::{EngineSettings, FailoverEngine};
use crate::health::HttpProber;
use crate::metrics::Metrics;
use crate::rules::{CloudflareRulesetApi, RetryPolicy, RuleController};
use crate::scheduler::Scheduler;
use crate::state::{create_backend, StateStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Server {
    config: Arc<Config>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn run(&self) -> Result<()> {
        let config = &self.config;

        let backend = create_backend(&config.store)
            .await
            .context("Failed to open state store")?;
        let store = StateStore::spawn(backend, config.store.instance_id.clone());

        match store.get().await {
            Ok(state) => {
                Metrics::set_rule_active(state.rule_active);
                info!(
                    backend = store.backend_type(),
                    rule_active = state.rule_active,
                    maintenance = state.maintenance_mode_active,
                    "State loaded"
                );
            }
            // The first cycle retries; /health reports the outage meanwhile
            Err(e) => warn!(error = %e, "State store not reachable at startup"),
        }

        let prober = HttpProber::new(&config.monitor).context("Failed to build health prober")?;
        let rules_api =
            CloudflareRulesetApi::new(&config.rule).context("Failed to build rules API client")?;
        let controller = RuleController::new(rules_api, RetryPolicy::default());

        let engine = Arc::new(FailoverEngine::new(
            EngineSettings::from_config(config),
            store,
            Arc::new(prober),
            Arc::new(controller),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let admin_address = config.admin_address()?;
        let listener = TcpListener::bind(admin_address)
            .await
            .with_context(|| format!("Failed to bind admin API on {}", admin_address))?;
        let admin = AdminServer::new(AdminApi::new(Arc::clone(config), Arc::clone(&engine)));
        let admin_shutdown = shutdown_rx.clone();
        let admin_handle = tokio::spawn(async move {
            if let Err(e) = admin.serve(listener, admin_shutdown).await {
                error!("Admin API error: {}", e);
            }
        });

        let scheduler = Scheduler::new(engine, config.monitor.interval.as_std());
        let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

        info!(
            url = %config.monitor.url,
            interval = %config.monitor.interval,
            failure_threshold = config.thresholds.failure,
            recovery_threshold = config.thresholds.recovery,
            "Monitor started, waiting for shutdown signal"
        );

        shutdown_signal().await;

        info!("Shutdown signal received, draining in-flight cycles");
        let _ = shutdown_tx.send(true);

        if let Err(e) = scheduler_handle.await {
            error!("Scheduler task failed: {}", e);
        }
        if let Err(e) = admin_handle.await {
            error!("Admin task failed: {}", e);
        }

        info!("Server stopped");

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
