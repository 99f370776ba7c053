mod local;
mod store;
mod types;
mod valkey;

pub use local::{FileBackend, MemoryBackend};
pub use store::StateStore;
pub use types::*;
pub use valkey::ValkeyBackend;

use crate::config::{StoreBackendKind, StoreConfig};
use async_trait::async_trait;
use std::sync::Arc;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("State store unavailable")]
    Unavailable,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Maintenance window not found: {0}")]
    WindowNotFound(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Durable storage for the monitor state document.
///
/// Backends only load and save whole documents; atomicity of the named
/// operations is provided by `StateStore`, which is the only writer.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Load the document stored under `key`, if any
    async fn load(&self, key: &str) -> StoreResult<Option<MonitorState>>;

    /// Replace the document stored under `key`
    async fn save(&self, key: &str, state: &MonitorState) -> StoreResult<()>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> StoreResult<()>;

    /// Get backend type name
    fn backend_type(&self) -> &'static str;
}

/// Create a backend from configuration
pub async fn create_backend(config: &StoreConfig) -> StoreResult<Arc<dyn StateBackend>> {
    match config.backend {
        StoreBackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        StoreBackendKind::File => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| {
                    StoreError::Persistence("no state file path configured".to_string())
                })?;
            Ok(Arc::new(FileBackend::new(path)))
        }
        StoreBackendKind::Valkey => {
            let valkey = config
                .valkey
                .as_ref()
                .ok_or_else(|| StoreError::Connection("no valkey configuration".to_string()))?;
            Ok(Arc::new(ValkeyBackend::new(valkey).await?))
        }
    }
}
