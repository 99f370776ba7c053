use super::{Probe, ProbeOutcome};
use crate::config::MonitorConfig;
use crate::metrics::Metrics;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

const USER_AGENT: &str = concat!("redirect-sentinel/", env!("CARGO_PKG_VERSION"));

/// Active HTTP prober. One GET per cycle, no retries: hysteresis lives in
/// the consecutive counters, not here.
pub struct HttpProber {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(config: &MonitorConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            // A redirect is not a 200
            .redirect(reqwest::redirect::Policy::none())
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .build()?;

        Ok(Self {
            client,
            url: config.url.clone(),
            timeout: config.timeout.as_std(),
        })
    }

    /// Probe `url`, bounded by `limit`. Only an exact 200 is healthy.
    async fn probe_url(&self, url: &str, limit: Duration) -> ProbeOutcome {
        let start = Instant::now();
        let outcome = match timeout(limit, self.client.get(url).send()).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => ProbeOutcome::Healthy,
            Ok(Ok(response)) => ProbeOutcome::Unhealthy(format!("status {}", response.status())),
            Ok(Err(e)) => ProbeOutcome::Unhealthy(format!("request failed: {}", e)),
            Err(_) => ProbeOutcome::Unhealthy(format!("timed out after {:?}", limit)),
        };
        let elapsed = start.elapsed();

        debug!(url, ?outcome, elapsed_ms = elapsed.as_millis() as u64, "probe finished");
        Metrics::record_probe(outcome.is_healthy(), elapsed);

        outcome
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self) -> ProbeOutcome {
        self.probe_url(&self.url, self.timeout).await
    }
}
