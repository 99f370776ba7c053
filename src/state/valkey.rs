use super::{MonitorState, StateBackend, StoreError, StoreResult};
use crate::config::ValkeyConfig;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;

/// Durable backend using Valkey/Redis. The document is stored as JSON
/// under `{prefix}:monitor:{instance}`.
pub struct ValkeyBackend {
    conn: ConnectionManager,
    key_prefix: String,
}

impl ValkeyBackend {
    pub async fn new(config: &ValkeyConfig) -> StoreResult<Self> {
        let client = Client::open(Self::connection_url(config).as_str())
            .map_err(|e| StoreError::Connection(format!("Failed to create client: {}", e)))?;

        // Connection manager reconnects on its own
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(
            "Connected to Valkey at {} with prefix '{}'",
            config.endpoint, config.key_prefix
        );

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Fold credentials and database into the endpoint URL
    fn connection_url(config: &ValkeyConfig) -> String {
        let mut url = config.endpoint.clone();

        if !url.contains('@') {
            let auth = match (&config.username, &config.password) {
                (Some(user), Some(pass)) => Some(format!("{}:{}", user, pass)),
                (None, Some(pass)) => Some(format!(":{}", pass)),
                _ => None,
            };
            if let (Some(auth), Some(pos)) = (auth, url.find("://")) {
                let (scheme, rest) = url.split_at(pos + 3);
                url = format!("{}{}@{}", scheme, auth, rest);
            }
        }

        let has_path = url
            .find("://")
            .map(|pos| url[pos + 3..].contains('/'))
            .unwrap_or(false);
        if config.db != 0 && !has_path {
            url = format!("{}/{}", url, config.db);
        }

        url
    }

    #[inline]
    fn key(&self, instance: &str) -> String {
        format!("{}:monitor:{}", self.key_prefix, instance)
    }
}

#[async_trait]
impl StateBackend for ValkeyBackend {
    async fn load(&self, key: &str) -> StoreResult<Option<MonitorState>> {
        let raw: Option<String> = self
            .conn
            .clone()
            .get(self.key(key))
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, state: &MonitorState) -> StoreResult<()> {
        let json = serde_json::to_string(state)?;
        let _: () = self
            .conn
            .clone()
            .set(self.key(key), json)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn.clone())
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "valkey"
    }
}
