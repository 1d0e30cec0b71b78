//! Write-through persistent store
//!
//! Reads are served from an in-memory cache that every `set()` updates
//! immediately, so callers always see their own writes. Durability is
//! asynchronous: writes are debounced into batches, failed batches are
//! retried on an exponential backoff schedule, and a key that runs out of
//! attempts is copied to the local backup and reported through a
//! `StoreEvent::DurabilityExhausted` event.
//!
//! All queue bookkeeping happens synchronously at call time. A single
//! worker task owns the timer and performs every backend write, removals
//! and clears included, so changes to the same key are never in flight
//! concurrently and always land in the order they were made.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::backend::{BackendError, MemoryBackend, Namespace, StorageBackend};
use super::backup::{LocalBackup, MemoryBackup};
use super::lock;
use super::queue::{FailedWrite, Write, WriteQueue};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Removal of '{0}' was not accepted by the backend yet and will be retried")]
    RemovalPending(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Timing and retry policy of the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Debounce delay between the last `set()` and the batched flush
    pub flush_delay: Duration,
    /// Backoff before each retry, indexed by retry count; the last step repeats
    pub retry_backoff: Vec<Duration>,
    /// Failed attempts after which a key is given up and backed up locally
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_millis(250),
            retry_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(15),
            ],
            max_retries: 3,
        }
    }
}

/// Notifications about durable commits
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Keys accepted by the backend
    Committed { keys: Vec<String> },
    /// A key ran out of retries; a written value now lives only in the local backup
    DurabilityExhausted { key: String },
}

/// Snapshot of the store's queues and timers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub cached: usize,
    pub pending: usize,
    pub failed: usize,
    pub flush_scheduled: bool,
    pub retry_scheduled: bool,
}

type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Messages to the store worker
#[derive(Debug)]
enum StoreMessage {
    /// Queue or timers changed, recompute the next wake-up
    Reschedule,
    /// Flush pending and retry-eligible writes now, then report the keys
    /// that are still not committed
    Flush(oneshot::Sender<Vec<String>>),
    /// Clear every namespace once in-flight writes have landed
    Clear(oneshot::Sender<std::result::Result<(), BackendError>>),
}

struct StoreState {
    /// `None` marks a key removed locally
    cache: HashMap<String, Option<Value>>,
    queue: WriteQueue,
    listeners: HashMap<String, Vec<(Uuid, Listener)>>,
    /// Debounce deadline of the next batched flush
    flush_at: Option<Instant>,
    /// Set between `clear()` and the worker clearing the backend
    clearing: bool,
}

struct StoreInner {
    state: Mutex<StoreState>,
    backend: Arc<dyn StorageBackend>,
    backup: Arc<dyn LocalBackup>,
    config: StoreConfig,
    events: broadcast::Sender<StoreEvent>,
}

/// Handle to a persistent store; clones share the same cache and worker
#[derive(Clone)]
pub struct PersistentStore {
    inner: Arc<StoreInner>,
    sender: mpsc::Sender<StoreMessage>,
    cancel: CancellationToken,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Registration of a change listener
pub struct ListenerHandle {
    id: Uuid,
    key: String,
    inner: Weak<StoreInner>,
}

impl ListenerHandle {
    /// Stop receiving change notifications
    pub fn unsubscribe(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.lock();
        if let Some(listeners) = state.listeners.get_mut(&self.key) {
            listeners.retain(|(id, _)| *id != self.id);
            if listeners.is_empty() {
                state.listeners.remove(&self.key);
            }
        }
    }
}

impl PersistentStore {
    /// Start a store and its worker on the current tokio runtime
    pub fn start(
        backend: Arc<dyn StorageBackend>,
        backup: Arc<dyn LocalBackup>,
        config: StoreConfig,
    ) -> Self {
        Self::start_with_cancel(backend, backup, config, CancellationToken::new())
    }

    /// Start a store whose worker stops when `cancel` fires
    pub fn start_with_cancel(
        backend: Arc<dyn StorageBackend>,
        backup: Arc<dyn LocalBackup>,
        config: StoreConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let inner = Arc::new(StoreInner {
            state: Mutex::new(StoreState {
                cache: HashMap::new(),
                queue: WriteQueue::new(),
                listeners: HashMap::new(),
                flush_at: None,
                clearing: false,
            }),
            backend,
            backup,
            config,
            events,
        });

        let (tx, rx) = mpsc::channel(32);
        let worker = tokio::spawn(store_loop(Arc::clone(&inner), rx, cancel.clone()));

        Self {
            inner,
            sender: tx,
            cancel,
            worker: Arc::new(Mutex::new(Some(worker))),
        }
    }

    /// Store over an in-memory backend and backup
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::start(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackup::new()),
            config,
        )
    }

    /// Run `read` on the value of a key, loading it into the cache first
    async fn read_with<R>(&self, key: &str, read: impl FnOnce(&Value) -> R) -> Result<Option<R>> {
        let epoch = {
            let state = self.inner.lock();
            if let Some(entry) = state.cache.get(key) {
                return Ok(entry.as_ref().map(read));
            }
            if state.clearing {
                return Ok(None);
            }
            state.queue.epoch()
        };

        let namespace = Namespace::for_key(key);
        let mut found = self
            .inner
            .backend
            .get(namespace, &[key.to_string()])
            .await?;

        let mut state = self.inner.lock();
        let value = found.remove(key).filter(|_| state.queue.epoch() == epoch);
        let Some(value) = value else {
            // Absent from the backend, or cleared while the read was in flight
            return Ok(state.cache.get(key).and_then(Option::as_ref).map(read));
        };

        // A set() or remove() that landed while the read was in flight wins
        let entry = state.cache.entry(key.to_string()).or_insert(Some(value));
        Ok(entry.as_ref().map(read))
    }

    /// Read a key, surfacing backend failures when nothing is cached
    pub async fn try_get(&self, key: &str) -> Result<Option<Value>> {
        self.read_with(key, Value::clone).await
    }

    /// Read one entry of a map-valued key without copying the whole map
    pub async fn try_get_entry(&self, key: &str, entry: &str) -> Result<Option<Value>> {
        let found = self
            .read_with(key, |value| value.get(entry).cloned())
            .await?;
        Ok(found.flatten())
    }

    /// Read a map-valued key entry by entry
    ///
    /// Entries that fail to deserialize are logged and left out, so one bad
    /// record never costs the others. Backend failures are returned.
    pub async fn try_get_map<T, M>(&self, key: &str) -> Result<M>
    where
        T: DeserializeOwned,
        M: Default + Extend<(String, T)>,
    {
        match self.try_get(key).await? {
            Some(value) => Ok(decode_entries(key, value)),
            None => Ok(M::default()),
        }
    }

    /// Read a key, falling back to `default` when absent or unreadable
    pub async fn get(&self, key: &str, default: Value) -> Value {
        match self.try_get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                log::warn!("Store: read of '{}' failed, using default: {}", key, e);
                default
            }
        }
    }

    /// Typed read; absent, unreadable or malformed values yield `default`
    pub async fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(parsed) => parsed,
                Err(e) => {
                    log::warn!("Store: value of '{}' is malformed, using default: {}", key, e);
                    default
                }
            },
            Ok(None) => default,
            Err(e) => {
                log::warn!("Store: read of '{}' failed, using default: {}", key, e);
                default
            }
        }
    }

    /// Write a value
    ///
    /// The cache and change listeners see the value before this returns;
    /// the backend write is batched and retried in the background.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let listeners = {
            let mut state = self.inner.lock();
            state.cache.insert(key.clone(), Some(value.clone()));
            if state.queue.enqueue(key.clone(), value.clone()) {
                log::debug!("Store: new write to '{}' supersedes a failed one", key);
            }
            state.flush_at = Some(Instant::now() + self.inner.config.flush_delay);
            state.listeners_for(&key)
        };

        // Called outside the lock so listeners may use the store
        for listener in listeners {
            listener(&key, &value);
        }

        // A full channel means the worker is about to wake anyway
        let _ = self.sender.try_send(StoreMessage::Reschedule);
    }

    /// Typed write
    pub fn set_as<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Delete a key
    ///
    /// Readers stop seeing the key immediately. The deletion is queued like
    /// any other write, so it lands after every earlier write to the key and
    /// a later `set()` supersedes it. Returns `Err` when the backend has not
    /// accepted it yet; it then stays in the retry cycle.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let listeners = {
            let mut state = self.inner.lock();
            state.cache.insert(key.to_string(), None);
            state.queue.enqueue_delete(key.to_string());
            state.listeners_for(key)
        };
        for listener in listeners {
            listener(key, &Value::Null);
        }

        if let Err(e) = self.inner.backup.remove(key) {
            log::warn!("Store: failed to drop backup of '{}': {}", key, e);
        }

        let outstanding = self.flush().await;
        if outstanding.iter().any(|k| k == key) || self.inner.lock().queue.is_failed(key) {
            return Err(StoreError::RemovalPending(key.to_string()));
        }
        Ok(())
    }

    /// Drop all state, cached and durable
    ///
    /// Writes already in flight are disowned: they are not retried if they
    /// fail, and the worker clears the backend only after they land.
    pub async fn clear(&self) -> Result<()> {
        {
            let mut state = self.inner.lock();
            state.cache.clear();
            state.queue.clear();
            state.flush_at = None;
            state.clearing = true;
        }

        let (tx, rx) = oneshot::channel();
        let result = if self.sender.send(StoreMessage::Clear(tx)).await.is_err() {
            log::warn!("Store: worker stopped, clearing inline");
            self.inner.clear_backend().await
        } else {
            rx.await.unwrap_or_else(|_| {
                Err(BackendError::Unavailable("store worker stopped".to_string()))
            })
        };
        result?;

        log::info!("Store: cleared all data");
        Ok(())
    }

    /// Register a listener called synchronously on every write to `key`
    pub fn on_change<F>(&self, key: impl Into<String>, listener: F) -> ListenerHandle
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        let key = key.into();
        let id = Uuid::new_v4();
        self.inner
            .lock()
            .listeners
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(listener)));

        ListenerHandle {
            id,
            key,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to commit and durability events
    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.inner.events.subscribe()
    }

    /// Flush pending and retry-eligible writes and wait for the outcome
    pub async fn force_flush(&self) {
        self.flush().await;
    }

    /// Flush through the worker; returns the keys left uncommitted
    async fn flush(&self) -> Vec<String> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(StoreMessage::Flush(tx)).await.is_err() {
            log::warn!("Store: worker stopped, flushing inline");
            return self.inner.flush_all().await;
        }
        rx.await.unwrap_or_default()
    }

    /// Re-submit values left in the local backup by earlier sessions
    ///
    /// Returns the number of keys handed back to the write path.
    pub fn recover_backups(&self) -> usize {
        let entries = match self.inner.backup.load_all() {
            Ok(entries) => entries,
            Err(e) => {
                log::error!("Store: failed to read local backup: {}", e);
                return 0;
            }
        };

        let count = entries.len();
        for entry in entries {
            log::info!("Store: recovering '{}' from local backup", entry.key);
            self.set(entry.key.clone(), entry.value);
            if let Err(e) = self.inner.backup.remove(&entry.key) {
                log::warn!("Store: failed to drop backup of '{}': {}", entry.key, e);
            }
        }
        count
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.inner.lock();
        StoreStats {
            cached: state.cache.values().filter(|v| v.is_some()).count(),
            pending: state.queue.pending_len(),
            failed: state.queue.failed_len(),
            flush_scheduled: state.flush_at.is_some(),
            retry_scheduled: state
                .queue
                .next_retry_at(&self.inner.config.retry_backoff)
                .is_some(),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Token that stops the worker when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Flush what can be flushed and stop the worker
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                log::error!("Store: worker ended abnormally: {}", e);
            }
        }
    }
}

impl StoreState {
    fn listeners_for(&self, key: &str) -> Vec<Listener> {
        self.listeners
            .get(key)
            .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }
}

impl StoreInner {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        lock(&self.state)
    }

    /// Earliest of the debounce deadline and the next retry
    fn next_deadline(&self) -> Option<Instant> {
        let state = self.lock();
        let retry_at = state.queue.next_retry_at(&self.config.retry_backoff);
        match (state.flush_at, retry_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run whatever work is due at `now`
    async fn run_due(&self, now: Instant) {
        let flush_due = self.lock().flush_at.map_or(false, |at| at <= now);
        if flush_due {
            self.flush_pending().await;
        }
        self.retry_failed(now).await;
    }

    async fn flush_all(&self) -> Vec<String> {
        let mut outstanding = self.flush_pending().await;
        outstanding.extend(self.retry_failed(Instant::now()).await);
        outstanding
    }

    /// Commit all pending writes as one batch per namespace
    ///
    /// Returns the keys that failed.
    async fn flush_pending(&self) -> Vec<String> {
        let batch = {
            let mut state = self.lock();
            state.flush_at = None;
            state.queue.take_pending()
        };
        if batch.writes.is_empty() {
            return Vec::new();
        }

        let failed = self.commit(batch.writes).await;
        let keys = failed.iter().map(|(key, _)| key.clone()).collect();
        if failed.is_empty() {
            return keys;
        }

        let exhausted = self.lock().queue.record_batch_failure(
            batch.epoch,
            failed,
            Instant::now(),
            self.config.max_retries,
        );
        for write in exhausted {
            self.give_up(write);
        }
        keys
    }

    /// Retry the failed writes whose backoff has elapsed
    ///
    /// Returns the keys that failed again.
    async fn retry_failed(&self, now: Instant) -> Vec<String> {
        let due = self
            .lock()
            .queue
            .take_due_failures(now, &self.config.retry_backoff);
        if due.is_empty() {
            return Vec::new();
        }

        log::info!("Store: retrying {} failed write(s)", due.len());
        let mut writes: HashMap<String, FailedWrite> =
            due.into_iter().map(|w| (w.key.clone(), w)).collect();
        let batch = writes
            .values()
            .map(|w| (w.key.clone(), w.value.clone()))
            .collect();

        let failed = self.commit(batch).await;
        let now = Instant::now();
        let mut keys = Vec::with_capacity(failed.len());
        for (key, _) in failed {
            let Some(write) = writes.remove(&key) else {
                continue;
            };
            keys.push(key);
            let exhausted = self
                .lock()
                .queue
                .record_retry_failure(write, now, self.config.max_retries);
            if let Some(write) = exhausted {
                self.give_up(write);
            }
        }
        keys
    }

    /// Write a batch to the backend, returning the items that failed
    async fn commit(&self, batch: Vec<(String, Write)>) -> Vec<(String, Write)> {
        let mut sets: HashMap<Namespace, HashMap<String, Value>> = HashMap::new();
        let mut deletes: HashMap<Namespace, Vec<String>> = HashMap::new();
        for (key, write) in batch {
            let namespace = Namespace::for_key(&key);
            match write {
                Some(value) => {
                    sets.entry(namespace).or_default().insert(key, value);
                }
                None => deletes.entry(namespace).or_default().push(key),
            }
        }

        let mut committed = Vec::new();
        let mut failed = Vec::new();
        for namespace in Namespace::ALL {
            if let Some(items) = sets.remove(&namespace) {
                let keys: Vec<String> = items.keys().cloned().collect();
                match self.backend.set(namespace, items.clone()).await {
                    Ok(()) => committed.extend(keys),
                    Err(e) => {
                        log::warn!(
                            "Store: batch write of {} key(s) to {} namespace failed: {}",
                            keys.len(),
                            namespace,
                            e
                        );
                        failed.extend(items.into_iter().map(|(k, v)| (k, Some(v))));
                    }
                }
            }

            if let Some(keys) = deletes.remove(&namespace) {
                match self.backend.remove(namespace, &keys).await {
                    Ok(()) => committed.extend(keys),
                    Err(e) => {
                        log::warn!(
                            "Store: removal of {} key(s) from {} namespace failed: {}",
                            keys.len(),
                            namespace,
                            e
                        );
                        failed.extend(keys.into_iter().map(|k| (k, None)));
                    }
                }
            }
        }

        if !committed.is_empty() {
            log::debug!("Store: committed {} key(s)", committed.len());
            for key in &committed {
                if self.backup.contains(key) {
                    if let Err(e) = self.backup.remove(key) {
                        log::warn!("Store: failed to drop stale backup of '{}': {}", key, e);
                    }
                }
            }
            let _ = self.events.send(StoreEvent::Committed { keys: committed });
        }

        failed
    }

    /// Clear every namespace and the local backup
    async fn clear_backend(&self) -> std::result::Result<(), BackendError> {
        let mut result = Ok(());
        for namespace in Namespace::ALL {
            if let Err(e) = self.backend.clear(namespace).await {
                log::error!("Store: failed to clear {} namespace: {}", namespace, e);
                result = Err(e);
            }
        }
        match self.backup.load_all() {
            Ok(entries) => {
                for entry in entries {
                    if let Err(e) = self.backup.remove(&entry.key) {
                        log::warn!("Store: failed to drop backup of '{}': {}", entry.key, e);
                    }
                }
            }
            Err(e) => log::warn!("Store: failed to read local backup: {}", e),
        }

        // Values set after clear() was called must outlive the clear
        let mut state = self.lock();
        state.clearing = false;
        let rewritten: Vec<(String, Value)> = state
            .cache
            .iter()
            .filter(|(key, _)| !state.queue.is_pending(key))
            .filter_map(|(key, value)| value.clone().map(|v| (key.clone(), v)))
            .collect();
        if !rewritten.is_empty() {
            for (key, value) in rewritten {
                state.queue.enqueue(key, value);
            }
            state.flush_at = Some(Instant::now());
        }
        result
    }

    /// Terminal failure for a key: back it up locally and tell the user
    fn give_up(&self, write: FailedWrite) {
        match &write.value {
            Some(value) => {
                log::error!(
                    "Store: giving up on '{}' after {} failed attempt(s), keeping a local backup",
                    write.key,
                    write.failures()
                );
                if let Err(e) = self.backup.save(&write.key, value) {
                    log::error!("Store: local backup of '{}' failed too: {}", write.key, e);
                }
            }
            None => log::error!(
                "Store: giving up on removing '{}' after {} failed attempt(s)",
                write.key,
                write.failures()
            ),
        }
        let _ = self
            .events
            .send(StoreEvent::DurabilityExhausted { key: write.key });
    }
}

/// Deserialize a JSON object entry by entry, skipping malformed entries
fn decode_entries<T, M>(key: &str, value: Value) -> M
where
    T: DeserializeOwned,
    M: Default + Extend<(String, T)>,
{
    let mut map = M::default();
    let Value::Object(entries) = value else {
        log::warn!("Store: '{}' does not hold a map, treating it as empty", key);
        return map;
    };
    for (entry, value) in entries {
        match serde_json::from_value(value) {
            Ok(parsed) => map.extend(std::iter::once((entry, parsed))),
            Err(e) => log::warn!("Store: dropping malformed entry '{}' of '{}': {}", entry, key, e),
        }
    }
    map
}

/// Sleep until `deadline`, or forever when there is nothing scheduled
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Main worker loop: one timer for both the debounced flush and retries
async fn store_loop(
    inner: Arc<StoreInner>,
    mut receiver: mpsc::Receiver<StoreMessage>,
    cancel: CancellationToken,
) {
    log::debug!("Store: worker started");

    loop {
        let deadline = inner.next_deadline();

        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("Store: shutting down, flushing outstanding writes");
                inner.flush_all().await;
                break;
            }

            _ = sleep_until(deadline) => {
                inner.run_due(Instant::now()).await;
            }

            msg = receiver.recv() => {
                match msg {
                    Some(StoreMessage::Reschedule) => continue,
                    Some(StoreMessage::Flush(done)) => {
                        let outstanding = inner.flush_all().await;
                        let _ = done.send(outstanding);
                    }
                    Some(StoreMessage::Clear(done)) => {
                        let result = inner.clear_backend().await;
                        let _ = done.send(result);
                    }
                    None => {
                        log::debug!("Store: all handles dropped, final flush");
                        inner.flush_all().await;
                        break;
                    }
                }
            }
        }
    }
}
