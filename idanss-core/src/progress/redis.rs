use std::fmt;

use async_trait::async_trait;
use idanss_model::{ProgressRecord, ScanKeys};
use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::{debug, info};

use super::ProgressStore;
use crate::error::{OrchestratorError, Result};

/// Progress records stored as JSON strings under `<prefix>:progress:<scanId>`.
///
/// Records never expire; retention belongs to whoever reads them.
#[derive(Clone)]
pub struct RedisProgressStore {
    conn: ConnectionManager,
    keys: ScanKeys,
}

impl fmt::Debug for RedisProgressStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisProgressStore")
            .field("connection", &"ConnectionManager")
            .field("prefix", &self.keys.prefix())
            .finish()
    }
}

impl RedisProgressStore {
    pub async fn connect(redis_url: &str, keys: ScanKeys) -> Result<Self> {
        info!(target: "scan::progress", "Connecting progress store to Redis");

        let client = redis::Client::open(redis_url).map_err(|e| {
            OrchestratorError::Store(format!("Failed to create Redis client: {e}"))
        })?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            OrchestratorError::Store(format!("Failed to connect to Redis: {e}"))
        })?;

        info!(target: "scan::progress", "Progress store connected");
        Ok(Self::from_connection(conn, keys))
    }

    /// Reuses an existing connection, typically the bus publisher's.
    pub fn from_connection(conn: ConnectionManager, keys: ScanKeys) -> Self {
        Self { conn, keys }
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn get(&self, scan_id: &str) -> Result<Option<ProgressRecord>> {
        let key = self.keys.progress(scan_id);
        let mut conn = self.conn.clone();

        let data: Option<String> = conn
            .get(&key)
            .await
            .map_err(|e| OrchestratorError::Store(format!("Redis GET {key} failed: {e}")))?;

        match data {
            Some(json) => {
                debug!(target: "scan::progress", %key, "progress record found");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, scan_id: &str, record: &ProgressRecord) -> Result<()> {
        let key = self.keys.progress(scan_id);
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        conn.set::<_, _, ()>(&key, json)
            .await
            .map_err(|e| OrchestratorError::Store(format!("Redis SET {key} failed: {e}")))?;

        debug!(target: "scan::progress", %key, "progress record written");
        Ok(())
    }
}
