//! Local filesystem backend.
//!
//! Keeps every namespace in one JSON file, for development or for hosts
//! without Redis.
//!
//! ## File Layout
//!
//! ```text
//! {
//!   "CCVW-clinic-tracker": {
//!     "Clinic A": "{\"name\":\"Clinic A\",\"available_appointments\":30,...}"
//!   }
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::storage::CacheBackend;

type Namespaces = HashMap<String, HashMap<String, String>>;

/// File-backed cache namespace.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    path: PathBuf,
    namespace: String,
}

impl LocalBackend {
    pub fn new(path: impl Into<PathBuf>, namespace: &str) -> Self {
        Self {
            path: path.into(),
            namespace: namespace.to_string(),
        }
    }

    /// Read the whole file, treating a missing file as empty.
    async fn read_all(&self) -> Result<Namespaces> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Namespaces::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Namespaces::new()),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Write the whole file atomically (write to temp, then rename).
    async fn write_all(&self, data: &Namespaces) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(data)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for LocalBackend {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let mut data = self.read_all().await?;
        Ok(data
            .get_mut(&self.namespace)
            .and_then(|records| records.remove(name))
            .map(String::into_bytes))
    }

    async fn set(&self, name: &str, record: &str) -> Result<()> {
        let mut data = self.read_all().await?;
        data.entry(self.namespace.clone())
            .or_default()
            .insert(name.to_string(), record.to_string());
        self.write_all(&data).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let mut data = self.read_all().await?;
        let removed = data
            .get_mut(&self.namespace)
            .and_then(|records| records.remove(name))
            .is_some();
        if removed {
            self.write_all(&data).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        let data = self.read_all().await?;
        Ok(data
            .get(&self.namespace)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default())
    }
}
