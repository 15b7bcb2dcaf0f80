//! Redis hash backend.
//!
//! All records live in a single hash named after the cache namespace, one
//! field per clinic. The hash survives process restarts, which keeps alert
//! cooldowns intact across deploys.

use std::collections::HashSet;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::OnceCell;

use crate::error::Result;
use crate::storage::CacheBackend;

/// Reconnect attempts made by a single command before it gives up.
const CONNECT_RETRIES: usize = 2;

/// Redis-backed cache namespace.
pub struct RedisBackend {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    namespace: String,
}

impl RedisBackend {
    /// Prepare a backend for `url` (e.g. `redis://localhost:6379/`).
    ///
    /// Only the URL is checked here. The connection is opened by the first
    /// command, and a failed attempt is retried by the next one, so an
    /// unreachable server fails single polls rather than startup.
    pub fn new(url: &str, namespace: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: OnceCell::new(),
            namespace: namespace.to_string(),
        })
    }

    /// Shared connection, opened on first use.
    ///
    /// The connection manager reconnects on its own once established.
    async fn connection(&self) -> Result<ConnectionManager> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new().set_number_of_retries(CONNECT_RETRIES);
                let conn = ConnectionManager::new_with_config(self.client.clone(), config).await?;
                log::info!("Connected to Redis (hash '{}')", self.namespace);
                Ok::<_, redis::RedisError>(conn)
            })
            .await?;
        Ok(conn.clone())
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.hget(&self.namespace, name).await?;
        Ok(value)
    }

    async fn set(&self, name: &str, record: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.hset(&self.namespace, name, record).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.hdel(&self.namespace, name).await?;
        Ok(())
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn.hkeys(&self.namespace).await?;
        Ok(keys.into_iter().collect())
    }
}
