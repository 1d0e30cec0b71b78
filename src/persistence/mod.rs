//! Durable key-value persistence for learning state
//!
//! This module provides:
//! - The `StorageBackend` abstraction with file and in-memory implementations
//! - A write queue tracking pending and failed writes
//! - `PersistentStore`, a write-through cache that batches, debounces and
//!   retries writes, falling back to a local backup when retries run out

pub mod backend;
pub mod backup;
mod file_backend;
pub mod queue;
mod store;

use std::sync::{Mutex, MutexGuard};

pub use backend::{BackendError, MemoryBackend, Namespace, NamespaceQuota, StorageBackend};
pub use backup::{FileBackup, LocalBackup, MemoryBackup};
pub use file_backend::FileBackend;
pub use store::{
    ListenerHandle, PersistentStore, StoreConfig, StoreError, StoreEvent, StoreStats,
};

/// Logical keys of the persisted state
pub mod keys {
    /// Map of `"language:word"` to `WordProgress`
    pub const WORD_PROGRESS: &str = "word_progress";
    /// Single `DailyUsage` record
    pub const DAILY_USAGE: &str = "daily_usage";
    /// Map of `"language:word"` to cached translations
    pub const TRANSLATION_CACHE: &str = "translation_cache";
    /// User settings, kept in the synced namespace
    pub const SETTINGS: &str = "settings";
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
