//! In-process backend.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::storage::CacheBackend;

/// Cache that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut HashMap<String, String>) -> T) -> T {
        match self.records.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.with_records(|r| r.get(name).map(|record| record.clone().into_bytes())))
    }

    async fn set(&self, name: &str, record: &str) -> Result<()> {
        self.with_records(|r| r.insert(name.to_string(), record.to_string()));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.with_records(|r| r.remove(name));
        Ok(())
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        Ok(self.with_records(|r| r.keys().cloned().collect()))
    }
}
