//! Dragonfly (Redis-compatible) shared tier
// cspell:ignore Dragonfly

use std::time::Duration;

use async_trait::async_trait;
use redis::Client;
use redis::aio::ConnectionManager;
use tracing::{debug, error};

use super::{CacheError, ExternalTier};

/// Page size for SCAN when clearing by prefix
const SCAN_COUNT: usize = 500;

/// Shared tier backed by a Dragonfly/Redis server
pub struct DragonflyTier {
    connection_manager: ConnectionManager,
}

impl DragonflyTier {
    /// Connect and verify the server answers PING
    ///
    /// # Errors
    /// Returns an error if the client cannot be created or the server does not respond
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            CacheError::Unavailable(format!("invalid address {url}: {e}"))
        })?;

        let connection_manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to create connection manager: {}", e);
            CacheError::Unavailable(format!("cannot connect to {url}: {e}"))
        })?;

        let mut conn = connection_manager.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;

        debug!("Connected to the Dragonfly database at {}", url);

        Ok(Self { connection_manager })
    }
}

#[async_trait]
impl ExternalTier for DragonflyTier {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection_manager.clone();
        let value = redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        let mut conn = self.connection_manager.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<i64>(&mut conn)
                    .await?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(())
    }
}
