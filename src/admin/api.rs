use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{combinators::BoxBody, BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{CONTENT_TYPE, RETRY_AFTER, WWW_AUTHENTICATE};
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::{BearerAuth, RateLimiter};
use crate::config::Config;
use crate::failover::{CycleOutcome, FailoverEngine};
use crate::maintenance::{self, WindowError};
use crate::metrics::render_state;
use crate::state::{HistoryEntry, MaintenanceWindow, RuleEvent, StoreError};

/// Request bodies larger than this are rejected
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shortest age at which the last cron marks the service unhealthy
const MIN_STALE_CRON_SECS: i64 = 120;

const WINDOW_PREFIX: &str = "/maintenance-window/";

const KNOWN_PATHS: [&str; 12] = [
    "/health",
    "/status",
    "/metrics",
    "/redirect-rule",
    "/redirect-rule-history",
    "/simulate-failover",
    "/simulate-recovery",
    "/reset-counters",
    "/reset-all-metrics",
    "/maintenance-mode",
    "/maintenance-window",
    "/maintenance-windows",
];

type AdminResponse = Response<BoxBody<Bytes, hyper::Error>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MaintenanceModeRequest {
    enabled: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct MaintenanceWindowRequest {
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    #[serde(default)]
    reason: Option<String>,
}

/// Admin API for inspecting and steering the failover monitor
pub struct AdminApi {
    config: Arc<Config>,
    engine: Arc<FailoverEngine>,
    auth: BearerAuth,
    rate_limiter: Option<Arc<RateLimiter>>,
    started: Instant,
}

impl AdminApi {
    pub fn new(config: Arc<Config>, engine: Arc<FailoverEngine>) -> Self {
        let auth = BearerAuth::new(config.admin.auth_token.clone());
        let rate_limiter = config
            .admin
            .rate_limit
            .as_ref()
            .map(|rl| Arc::new(RateLimiter::new(rl)));

        Self {
            config,
            engine,
            auth,
            rate_limiter,
            started: Instant::now(),
        }
    }

    pub fn rate_limiter(&self) -> Option<Arc<RateLimiter>> {
        self.rate_limiter.clone()
    }

    /// Two missed ticks, but never under two minutes
    fn stale_cron_secs(&self) -> i64 {
        let interval = self.config.monitor.interval.as_std().as_secs();
        i64::try_from(interval.saturating_mul(2))
            .unwrap_or(i64::MAX)
            .max(MIN_STALE_CRON_SECS)
    }

    /// Handle admin API request
    pub async fn handle<B>(&self, req: Request<B>, remote: IpAddr) -> AdminResponse
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        // Liveness stays reachable for probes without credentials
        if path == "/health" {
            return match method {
                Method::GET => self.health().await,
                _ => Self::method_not_allowed(),
            };
        }

        if let Some(limiter) = &self.rate_limiter {
            if let Err(wait) = limiter.check(remote) {
                return Self::too_many_requests(wait.as_secs_f64().ceil().max(1.0) as u64);
            }
        }

        if !self.auth.is_authenticated(&req) {
            warn!(%remote, %method, %path, "Rejected unauthenticated admin request");
            return Self::unauthorized();
        }

        match (method.as_str(), path.as_str()) {
            ("GET", "/status") => self.status().await,
            ("GET", "/metrics") => self.metrics().await,
            ("GET", "/redirect-rule") => self.redirect_rule().await,
            ("GET", "/redirect-rule-history") => self.rule_history().await,
            ("POST", "/simulate-failover") => self.simulate(RuleEvent::Enabled).await,
            ("POST", "/simulate-recovery") => self.simulate(RuleEvent::Disabled).await,
            ("POST", "/reset-counters") => self.reset_counters().await,
            ("POST", "/reset-all-metrics") => self.reset_all_metrics().await,
            ("POST", "/maintenance-mode") => match Self::parse_body(req).await {
                Ok(body) => self.set_maintenance_mode(body).await,
                Err(resp) => resp,
            },
            ("POST", "/maintenance-window") => match Self::parse_body(req).await {
                Ok(body) => self.add_window(body).await,
                Err(resp) => resp,
            },
            ("GET", "/maintenance-windows") => self.list_windows().await,
            ("DELETE", p) if p.starts_with(WINDOW_PREFIX) => {
                let id = &p[WINDOW_PREFIX.len()..];
                self.delete_window(id).await
            }
            (_, p) if KNOWN_PATHS.contains(&p) || p.starts_with(WINDOW_PREFIX) => {
                Self::method_not_allowed()
            }
            _ => Self::not_found(),
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    async fn health(&self) -> AdminResponse {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct HealthResponse {
            status: &'static str,
            durable_objects_available: bool,
            last_cron_execution: Option<DateTime<Utc>>,
            uptime_seconds: u64,
        }

        let uptime_seconds = self.started.elapsed().as_secs();
        let store = self.engine.store();
        let state = match store.ping().await {
            Ok(()) => store.get().await,
            Err(e) => Err(e),
        };

        let stale_after = self.stale_cron_secs();
        let (code, body) = match state {
            Ok(state) => {
                let (code, status) = match state.last_cron_time {
                    None => (StatusCode::OK, "degraded"),
                    Some(t) if (Utc::now() - t).num_seconds() > stale_after => {
                        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
                    }
                    Some(_) => (StatusCode::OK, "healthy"),
                };
                (
                    code,
                    HealthResponse {
                        status,
                        durable_objects_available: true,
                        last_cron_execution: state.last_cron_time,
                        uptime_seconds,
                    },
                )
            }
            Err(e) => {
                warn!(error = %e, "Health check could not reach the state store");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    HealthResponse {
                        status: "unhealthy",
                        durable_objects_available: false,
                        last_cron_execution: None,
                        uptime_seconds,
                    },
                )
            }
        };

        Self::json_with_status(code, &body)
    }

    async fn status(&self) -> AdminResponse {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct StatusResponse<'a> {
            monitor_url: &'a str,
            rule_id: &'a str,
            rule_active: bool,
            consecutive_failures: u32,
            consecutive_successes: u32,
            failure_threshold: u32,
            recovery_threshold: u32,
            maintenance_mode_active: bool,
            maintenance_mode_reason: Option<String>,
            active_maintenance_window: Option<MaintenanceWindow>,
            suppressed: bool,
            api_calls_suspended: bool,
            total_checks: u64,
            total_successes: u64,
            total_failures: u64,
            total_rule_changes: u64,
            total_api_errors: u64,
            last_check_time: Option<DateTime<Utc>>,
            last_cron_time: Option<DateTime<Utc>>,
            process_start_time: DateTime<Utc>,
            store_backend: &'static str,
        }

        let state = match self.engine.store().get().await {
            Ok(state) => state,
            Err(e) => return Self::store_error(e),
        };
        let now = Utc::now();
        let settings = self.engine.settings();

        let status = StatusResponse {
            monitor_url: &self.config.monitor.url,
            rule_id: &settings.rule_id,
            rule_active: state.rule_active,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            failure_threshold: settings.failure_threshold,
            recovery_threshold: settings.recovery_threshold,
            maintenance_mode_active: state.maintenance_mode_active,
            maintenance_mode_reason: state.maintenance_mode_reason.clone(),
            active_maintenance_window: maintenance::active_window(&state, now).cloned(),
            suppressed: maintenance::is_suppressed(&state, now),
            api_calls_suspended: state.api_calls_suspended,
            total_checks: state.total_checks,
            total_successes: state.total_successes,
            total_failures: state.total_failures,
            total_rule_changes: state.total_rule_changes,
            total_api_errors: state.total_api_errors,
            last_check_time: state.last_check_time,
            last_cron_time: state.last_cron_time,
            process_start_time: state.process_start_time,
            store_backend: self.engine.store().backend_type(),
        };

        Self::json_response(&status)
    }

    async fn metrics(&self) -> AdminResponse {
        match self.engine.store().get().await {
            Ok(state) => Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Self::full_body(render_state(&state)))
                .unwrap(),
            Err(e) => Self::store_error(e),
        }
    }

    async fn redirect_rule(&self) -> AdminResponse {
        match self.engine.rule_status().await {
            Some(info) => Self::json_response(&info),
            None => {
                Self::error_response(StatusCode::BAD_GATEWAY, "Redirect rule status unavailable")
            }
        }
    }

    async fn rule_history(&self) -> AdminResponse {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct HistoryResponse {
            history: Vec<HistoryEntry>,
            total_rule_changes: u64,
        }

        match self.engine.store().get().await {
            Ok(state) => Self::json_response(&HistoryResponse {
                history: state.rule_change_history,
                total_rule_changes: state.total_rule_changes,
            }),
            Err(e) => Self::store_error(e),
        }
    }

    async fn list_windows(&self) -> AdminResponse {
        #[derive(Serialize)]
        struct WindowView {
            #[serde(flatten)]
            window: MaintenanceWindow,
            active: bool,
        }

        #[derive(Serialize)]
        struct WindowsResponse {
            windows: Vec<WindowView>,
        }

        let state = match self.engine.store().get().await {
            Ok(state) => state,
            Err(e) => return Self::store_error(e),
        };
        let now = Utc::now();
        let windows = state
            .scheduled_windows
            .into_iter()
            .map(|window| WindowView {
                active: window.is_active_at(now),
                window,
            })
            .collect();

        Self::json_response(&WindowsResponse { windows })
    }

    // =========================================================================
    // Actions
    // =========================================================================

    async fn simulate(&self, target: RuleEvent) -> AdminResponse {
        #[derive(Serialize)]
        struct SimulationResponse {
            success: bool,
            event: RuleEvent,
            message: &'static str,
        }

        let outcome = match self.engine.simulate(target).await {
            Ok(outcome) => outcome,
            Err(e) => return Self::store_error(e),
        };
        info!(target = target.as_str(), outcome = outcome.label(), "Manual simulation finished");

        match outcome {
            CycleOutcome::Transitioned(event) => Self::json_response(&SimulationResponse {
                success: true,
                event,
                message: match event {
                    RuleEvent::Enabled => "Redirect rule enabled",
                    RuleEvent::Disabled => "Redirect rule disabled",
                },
            }),
            CycleOutcome::Suspended => Self::error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Rule updates suspended after an authentication failure",
            ),
            CycleOutcome::ApiFailure(_) => {
                Self::error_response(StatusCode::BAD_GATEWAY, "Failed to update redirect rule")
            }
            CycleOutcome::AuthFailure(_) => Self::error_response(
                StatusCode::BAD_GATEWAY,
                "Rules API rejected credentials; rule updates are now suspended",
            ),
            CycleOutcome::NoAction { .. } | CycleOutcome::Suppressed { .. } => {
                Self::error_response(StatusCode::INTERNAL_SERVER_ERROR, "Simulation did not run")
            }
        }
    }

    async fn reset_counters(&self) -> AdminResponse {
        match self.engine.store().reset_cumulative_metrics().await {
            Ok(_) => {
                info!("Cumulative metrics reset");
                Self::success("Cumulative metrics reset")
            }
            Err(e) => Self::store_error(e),
        }
    }

    async fn reset_all_metrics(&self) -> AdminResponse {
        match self.engine.store().reset_all_metrics().await {
            Ok(_) => {
                info!("All counters and metrics reset");
                Self::success("All counters and metrics reset")
            }
            Err(e) => Self::store_error(e),
        }
    }

    async fn set_maintenance_mode(&self, body: MaintenanceModeRequest) -> AdminResponse {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct MaintenanceModeResponse {
            maintenance_mode_active: bool,
            maintenance_mode_reason: Option<String>,
        }

        match self
            .engine
            .store()
            .set_maintenance_mode(body.enabled, body.reason)
            .await
        {
            Ok(state) => {
                info!(
                    enabled = state.maintenance_mode_active,
                    reason = ?state.maintenance_mode_reason,
                    "Maintenance mode updated"
                );
                Self::json_response(&MaintenanceModeResponse {
                    maintenance_mode_active: state.maintenance_mode_active,
                    maintenance_mode_reason: state.maintenance_mode_reason,
                })
            }
            Err(e) => Self::store_error(e),
        }
    }

    async fn add_window(&self, body: MaintenanceWindowRequest) -> AdminResponse {
        if let Err(e) = maintenance::validate_window(body.start_time, body.end_time, Utc::now()) {
            let message = match e {
                WindowError::Inverted => "startTime must not be after endTime",
                WindowError::AlreadyEnded => "endTime is in the past",
            };
            return Self::error_response(StatusCode::BAD_REQUEST, message);
        }

        let window = MaintenanceWindow::new(body.start_time, body.end_time, body.reason);
        match self
            .engine
            .store()
            .add_maintenance_window(window.clone())
            .await
        {
            Ok(_) => {
                info!(
                    id = %window.id,
                    start = %window.start_time,
                    end = %window.end_time,
                    "Maintenance window scheduled"
                );
                Self::json_with_status(StatusCode::CREATED, &window)
            }
            Err(e) => Self::store_error(e),
        }
    }

    async fn delete_window(&self, id: &str) -> AdminResponse {
        if id.is_empty() || id.contains('/') {
            return Self::not_found();
        }

        match self.engine.store().remove_maintenance_window(id).await {
            Ok(_) => {
                info!(id, "Maintenance window removed");
                Self::success("Maintenance window removed")
            }
            Err(e) => Self::store_error(e),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn parse_body<T, B>(req: Request<B>) -> Result<T, AdminResponse>
    where
        T: DeserializeOwned,
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let bytes = match Limited::new(req.into_body(), MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => {
                return Err(Self::error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "Request body too large or unreadable",
                ));
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            Self::error_response(StatusCode::BAD_REQUEST, &format!("Invalid request body: {}", e))
        })
    }

    fn store_error(e: StoreError) -> AdminResponse {
        match e {
            StoreError::WindowNotFound(id) => Self::error_response(
                StatusCode::NOT_FOUND,
                &format!("Maintenance window not found: {}", id),
            ),
            other => Self::error_response(StatusCode::SERVICE_UNAVAILABLE, &other.to_string()),
        }
    }

    fn success(message: &str) -> AdminResponse {
        #[derive(Serialize)]
        struct Success<'a> {
            success: bool,
            message: &'a str,
        }
        Self::json_response(&Success {
            success: true,
            message,
        })
    }

    fn not_found() -> AdminResponse {
        Self::error_response(StatusCode::NOT_FOUND, "Not Found")
    }

    fn method_not_allowed() -> AdminResponse {
        Self::error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
    }

    fn unauthorized() -> AdminResponse {
        let mut resp = Self::error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        resp.headers_mut()
            .insert(WWW_AUTHENTICATE, hyper::header::HeaderValue::from_static("Bearer"));
        resp
    }

    fn too_many_requests(retry_after_secs: u64) -> AdminResponse {
        let mut resp = Self::error_response(StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
        resp.headers_mut().insert(RETRY_AFTER, retry_after_secs.into());
        resp
    }

    fn error_response(status: StatusCode, message: &str) -> AdminResponse {
        #[derive(Serialize)]
        struct ErrorResponse<'a> {
            error: &'a str,
        }
        Self::json_with_status(status, &ErrorResponse { error: message })
    }

    fn json_response<T: Serialize>(data: &T) -> AdminResponse {
        Self::json_with_status(StatusCode::OK, data)
    }

    fn json_with_status<T: Serialize>(status: StatusCode, data: &T) -> AdminResponse {
        match serde_json::to_string(data) {
            Ok(json) => Response::builder()
                .status(status)
                .header(CONTENT_TYPE, "application/json")
                .body(Self::full_body(json))
                .unwrap(),
            Err(_) => Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, "application/json")
                .body(Self::full_body(r#"{"error":"Serialization failed"}"#))
                .unwrap(),
        }
    }

    #[inline]
    fn full_body<T: Into<Bytes>>(content: T) -> BoxBody<Bytes, hyper::Error> {
        Full::new(content.into())
            .map_err(|never| match never {})
            .boxed()
    }
}
