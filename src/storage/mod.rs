//! Cache persistence for per-clinic alert state.
//!
//! Every backend exposes the same hash-like view of one namespace: a map
//! from clinic name to an encoded [`CacheEntry`] record.
//!
//! - [`RedisBackend`]: a Redis hash (`HGET`/`HSET`/`HDEL`/`HKEYS`)
//! - [`LocalBackend`]: a JSON file, for running without Redis
//! - [`MemoryBackend`]: process memory, for dry runs and tests

pub mod local;
pub mod memory;
pub mod redis;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;
use crate::models::{CacheBackendKind, CacheConfig, CacheEntry};

// Re-export for convenience
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Raw record storage for one namespace.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch the raw record for `name`, if any. Bytes are returned as
    /// stored so that a corrupt value reaches the decoder.
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Store an encoded record, replacing any previous one.
    async fn set(&self, name: &str, record: &str) -> Result<()>;

    /// Remove the record for `name`. Missing records are not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Names of every stored record.
    async fn keys(&self) -> Result<HashSet<String>>;
}

/// Open the backend selected in the configuration.
///
/// No connection is made here; an unreachable store surfaces on first use.
pub fn open_backend(config: &CacheConfig) -> Result<Box<dyn CacheBackend>> {
    match config.backend {
        CacheBackendKind::Redis => {
            let backend = RedisBackend::new(&config.redis_url(), &config.namespace)?;
            Ok(Box::new(backend))
        }
        CacheBackendKind::File => Ok(Box::new(LocalBackend::new(
            &config.file_path,
            &config.namespace,
        ))),
    }
}

/// Typed access to cache entries.
pub struct CacheStore {
    backend: Box<dyn CacheBackend>,
    alert_interval: Duration,
}

impl CacheStore {
    /// `alert_interval` decides how far back fresh entries are dated.
    pub fn new(backend: Box<dyn CacheBackend>, alert_interval: Duration) -> Self {
        Self {
            backend,
            alert_interval,
        }
    }

    /// Load the entry for `name`.
    ///
    /// A missing or undecodable record yields [`CacheEntry::fresh`]. Only
    /// backend failures are returned as errors.
    pub async fn get(&self, name: &str, now: DateTime<Utc>) -> Result<CacheEntry> {
        let Some(raw) = self.backend.get(name).await? else {
            return Ok(CacheEntry::fresh(now, self.alert_interval));
        };

        match CacheEntry::decode(&raw, now, self.alert_interval) {
            Ok(entry) => Ok(entry),
            Err(e) => {
                log::warn!("Discarding unreadable cache record for '{}': {}", name, e);
                Ok(CacheEntry::fresh(now, self.alert_interval))
            }
        }
    }

    pub async fn put(&self, name: &str, entry: &CacheEntry) -> Result<()> {
        let record = entry.encode(name)?;
        self.backend.set(name, &record).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.backend.delete(name).await
    }

    pub async fn list_keys(&self) -> Result<HashSet<String>> {
        self.backend.keys().await
    }

    /// All entries sorted by name.
    pub async fn entries(&self, now: DateTime<Utc>) -> Result<Vec<(String, CacheEntry)>> {
        let mut names: Vec<String> = self.list_keys().await?.into_iter().collect();
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let entry = self.get(&name, now).await?;
            entries.push((name, entry));
        }
        Ok(entries)
    }
}
