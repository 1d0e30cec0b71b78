//! File-backed storage backend
//!
//! Directory structure:
//! ```text
//! {data-dir}/store/
//! ├── synced.json    # Settings namespace (byte quota enforced)
//! └── local.json     # Everything else
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::backend::{Namespace, NamespaceQuota, Result, StorageBackend};

/// Backend storing one JSON document per namespace
pub struct FileBackend {
    base_path: PathBuf,
    sync_quota: NamespaceQuota,
    /// Serializes read-modify-write cycles on the namespace files
    io_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            base_path: data_dir.join("store"),
            sync_quota: NamespaceQuota::default(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn with_sync_quota(mut self, quota: NamespaceQuota) -> Self {
        self.sync_quota = quota;
        self
    }

    fn namespace_path(&self, namespace: Namespace) -> PathBuf {
        self.base_path.join(format!("{}.json", namespace))
    }

    async fn read_namespace(&self, namespace: Namespace) -> Result<HashMap<String, Value>> {
        let path = self.namespace_path(namespace);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temp file and rename so a crash never leaves a torn document
    async fn write_namespace(
        &self,
        namespace: Namespace,
        contents: &HashMap<String, Value>,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        let path = self.namespace_path(namespace);
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(contents)?).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, namespace: Namespace, keys: &[String]) -> Result<HashMap<String, Value>> {
        let _guard = self.io_lock.lock().await;
        let mut contents = self.read_namespace(namespace).await?;
        Ok(keys
            .iter()
            .filter_map(|k| contents.remove_entry(k))
            .collect())
    }

    async fn set(&self, namespace: Namespace, items: HashMap<String, Value>) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut contents = self.read_namespace(namespace).await?;
        contents.extend(items);

        if namespace == Namespace::Synced {
            self.sync_quota.check(namespace, &contents)?;
        }

        self.write_namespace(namespace, &contents).await
    }

    async fn remove(&self, namespace: Namespace, keys: &[String]) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        let mut contents = self.read_namespace(namespace).await?;
        let before = contents.len();
        for key in keys {
            contents.remove(key);
        }
        if contents.len() != before {
            self.write_namespace(namespace, &contents).await?;
        }
        Ok(())
    }

    async fn clear(&self, namespace: Namespace) -> Result<()> {
        let _guard = self.io_lock.lock().await;
        match tokio::fs::remove_file(self.namespace_path(namespace)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
