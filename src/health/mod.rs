mod prober;

pub use prober::HttpProber;

use async_trait::async_trait;

/// Classification of one probe. Failure is a value, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    /// Carries a short diagnostic for logs
    Unhealthy(String),
}

impl ProbeOutcome {
    #[inline]
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Probes the single monitored target
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> ProbeOutcome;
}
