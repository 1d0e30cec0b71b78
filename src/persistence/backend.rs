//! Storage backends the persistent store commits to
//!
//! A backend is an opaque key-value store split into two namespaces:
//! a small-quota `Synced` namespace for settings and a larger `Local`
//! namespace for everything else. Backend call failures are the only
//! errors the store has to deal with.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::{keys, lock};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Quota exceeded in {namespace} namespace: {detail}")]
    QuotaExceeded { namespace: Namespace, detail: String },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Logical partition of the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Small-quota namespace replicated across devices
    Synced,
    /// Larger device-local namespace
    Local,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Synced, Namespace::Local];

    /// Namespace a logical key lives in
    pub fn for_key(key: &str) -> Self {
        if key == keys::SETTINGS {
            Namespace::Synced
        } else {
            Namespace::Local
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Synced => "synced",
            Namespace::Local => "local",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Byte limits of the synced namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceQuota {
    /// Total bytes across all items
    pub total_bytes: usize,
    /// Bytes for a single item (key + serialized value)
    pub item_bytes: usize,
}

impl Default for NamespaceQuota {
    fn default() -> Self {
        Self {
            total_bytes: 102_400,
            item_bytes: 8_192,
        }
    }
}

impl NamespaceQuota {
    /// Check a namespace's contents, as they would be after a write, against the quota
    pub fn check(&self, namespace: Namespace, contents: &HashMap<String, Value>) -> Result<()> {
        let mut total = 0usize;
        for (key, value) in contents {
            let size = key.len() + serde_json::to_string(value)?.len();
            if size > self.item_bytes {
                return Err(BackendError::QuotaExceeded {
                    namespace,
                    detail: format!(
                        "item '{}' is {} bytes (limit {})",
                        key, size, self.item_bytes
                    ),
                });
            }
            total += size;
        }

        if total > self.total_bytes {
            return Err(BackendError::QuotaExceeded {
                namespace,
                detail: format!("{} bytes stored (limit {})", total, self.total_bytes),
            });
        }

        Ok(())
    }
}

/// Batched key-value access to the underlying storage
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the given keys; absent keys are omitted from the result
    async fn get(&self, namespace: Namespace, keys: &[String]) -> Result<HashMap<String, Value>>;

    /// Write all items as one batch
    async fn set(&self, namespace: Namespace, items: HashMap<String, Value>) -> Result<()>;

    async fn remove(&self, namespace: Namespace, keys: &[String]) -> Result<()>;

    async fn clear(&self, namespace: Namespace) -> Result<()>;
}

/// In-process backend with failure injection
///
/// Used by tests and as the degraded-mode backend when no data directory
/// is available.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<Namespace, HashMap<String, Value>>>,
    sync_quota: Option<NamespaceQuota>,
    writes_failing: AtomicBool,
    reads_failing: AtomicBool,
    fail_next_writes: AtomicUsize,
    set_calls: AtomicUsize,
    write_delay_ms: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce a byte quota on the synced namespace
    pub fn with_sync_quota(mut self, quota: NamespaceQuota) -> Self {
        self.sync_quota = Some(quota);
        self
    }

    /// Make every write fail until switched off
    pub fn set_failing(&self, failing: bool) {
        self.writes_failing.store(failing, Ordering::SeqCst);
    }

    /// Make every read fail until switched off
    pub fn set_reads_failing(&self, failing: bool) {
        self.reads_failing.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` writes, then recover
    pub fn fail_next(&self, count: usize) {
        self.fail_next_writes.store(count, Ordering::SeqCst);
    }

    /// Hold every write for `delay` before it lands or fails
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of batched `set` calls received, failed ones included
    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Copy of a namespace's committed contents
    pub fn snapshot(&self, namespace: Namespace) -> HashMap<String, Value> {
        lock(&self.data)
            .get(&namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Committed value of a key, looked up in its own namespace
    pub fn committed(&self, key: &str) -> Option<Value> {
        lock(&self.data)
            .get(&Namespace::for_key(key))
            .and_then(|items| items.get(key).cloned())
    }

    fn write_should_fail(&self) -> bool {
        if self.writes_failing.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Failure is decided when the write starts, not when it lands
    async fn begin_write(&self) -> Result<()> {
        let fail = self.write_should_fail();
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if fail {
            return Err(BackendError::Unavailable("simulated write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, namespace: Namespace, keys: &[String]) -> Result<HashMap<String, Value>> {
        if self.reads_failing.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("simulated read failure".to_string()));
        }

        let data = lock(&self.data);
        let Some(items) = data.get(&namespace) else {
            return Ok(HashMap::new());
        };
        Ok(keys
            .iter()
            .filter_map(|k| items.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set(&self, namespace: Namespace, items: HashMap<String, Value>) -> Result<()> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.begin_write().await?;

        let mut data = lock(&self.data);
        let current = data.entry(namespace).or_default();

        if let (Namespace::Synced, Some(quota)) = (namespace, self.sync_quota) {
            let mut merged = current.clone();
            merged.extend(items.clone());
            quota.check(namespace, &merged)?;
        }

        current.extend(items);
        Ok(())
    }

    async fn remove(&self, namespace: Namespace, keys: &[String]) -> Result<()> {
        self.begin_write().await?;
        if let Some(items) = lock(&self.data).get_mut(&namespace) {
            for key in keys {
                items.remove(key);
            }
        }
        Ok(())
    }

    async fn clear(&self, namespace: Namespace) -> Result<()> {
        self.begin_write().await?;
        lock(&self.data).remove(&namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_namespace_routing() {
        assert_eq!(Namespace::for_key(keys::SETTINGS), Namespace::Synced);
        assert_eq!(Namespace::for_key(keys::WORD_PROGRESS), Namespace::Local);
        assert_eq!(Namespace::for_key(keys::DAILY_USAGE), Namespace::Local);
    }

    #[test]
    fn test_quota_rejects_oversized_item() {
        let quota = NamespaceQuota {
            total_bytes: 1000,
            item_bytes: 20,
        };
        let contents = items(&[("settings", json!("a fairly long string value"))]);
        let err = quota.check(Namespace::Synced, &contents).unwrap_err();
        assert!(matches!(err, BackendError::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn test_memory_backend_roundtrip() {
        let backend = MemoryBackend::new();
        backend
            .set(Namespace::Local, items(&[("a", json!(1)), ("b", json!(2))]))
            .await
            .unwrap();

        let found = backend
            .get(Namespace::Local, &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], json!(1));

        // Namespaces are independent
        let other = backend
            .get(Namespace::Synced, &["a".to_string()])
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_fail_next_recovers() {
        let backend = MemoryBackend::new();
        backend.fail_next(2);

        assert!(backend.set(Namespace::Local, items(&[("a", json!(1))])).await.is_err());
        assert!(backend.set(Namespace::Local, items(&[("a", json!(1))])).await.is_err());
        assert!(backend.set(Namespace::Local, items(&[("a", json!(1))])).await.is_ok());
        assert_eq!(backend.set_calls(), 3);
        assert_eq!(backend.committed("a"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_sync_quota_enforced_on_write() {
        let backend = MemoryBackend::new().with_sync_quota(NamespaceQuota {
            total_bytes: 64,
            item_bytes: 64,
        });
        let big = json!("x".repeat(100));
        let err = backend
            .set(Namespace::Synced, items(&[("settings", big.clone())]))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::QuotaExceeded { .. }));

        // Local namespace has no quota
        backend
            .set(Namespace::Local, items(&[("settings", big)]))
            .await
            .unwrap();
    }
}
