use super::{MonitorState, StateBackend, StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::debug;

/// In-memory backend. State lives as long as the process.
///
/// Documents are kept serialized so a round trip behaves like the durable
/// backends.
#[derive(Default)]
pub struct MemoryBackend {
    documents: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn load(&self, key: &str) -> StoreResult<Option<MonitorState>> {
        match self.documents.read().get(key) {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, state: &MonitorState) -> StoreResult<()> {
        let json = serde_json::to_string(state)?;
        self.documents.write().insert(key.to_string(), json);
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

/// JSON file backend for single-host deployments.
///
/// The file holds every instance keyed by id. Writes go to a sibling
/// temporary file which is then renamed over the original.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_all(&self) -> StoreResult<BTreeMap<String, MonitorState>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::Persistence(format!(
                "failed to read {:?}: {}",
                self.path, e
            ))),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StateBackend for FileBackend {
    async fn load(&self, key: &str) -> StoreResult<Option<MonitorState>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn save(&self, key: &str, state: &MonitorState) -> StoreResult<()> {
        let mut documents = self.read_all().await?;
        documents.insert(key.to_string(), state.clone());
        let json = serde_json::to_vec_pretty(&documents)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| {
                    StoreError::Persistence(format!("failed to create {:?}: {}", parent, e))
                })?;
        }

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| StoreError::Persistence(format!("failed to write {:?}: {}", tmp, e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| {
                StoreError::Persistence(format!("failed to replace {:?}: {}", self.path, e))
            })?;

        debug!(path = ?self.path, instance = key, "state persisted");
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.read_all().await.map(|_| ())
    }

    fn backend_type(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_memory_backend_missing_key() {
        let backend = MemoryBackend::new();
        assert!(backend.load("global").await.unwrap().is_none());
        assert_eq!(backend.backend_type(), "memory");
    }

    #[tokio::test]
    async fn test_file_backend_keeps_instances_apart() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested").join("state.json"));

        let mut first = MonitorState::new(Utc::now());
        first.record_failure(Utc::now());
        let second = MonitorState::new(Utc::now());

        backend.save("first", &first).await.unwrap();
        backend.save("second", &second).await.unwrap();

        let loaded = backend.load("first").await.unwrap().unwrap();
        assert_eq!(loaded.consecutive_failures, 1);
        assert_eq!(backend.load("second").await.unwrap().unwrap().total_checks, 0);
        assert!(backend.load("third").await.unwrap().is_none());
        assert!(!backend.temp_path().exists());
    }

    #[tokio::test]
    async fn test_file_backend_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();

        let backend = FileBackend::new(path);
        assert!(matches!(
            backend.load("global").await,
            Err(StoreError::Serialization(_))
        ));
        assert!(backend.health_check().await.is_err());
    }
}
