//! Persistent cache of word translations
//!
//! Entries live in one map under the `translation_cache` key. Once the map
//! grows past `MAX_ENTRIES`, the oldest entries by timestamp are evicted
//! until `RETAIN_ENTRIES` remain.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::learning::progress_key;
use crate::persistence::{keys, PersistentStore, StoreError};

pub const MAX_ENTRIES: usize = 10_000;
pub const RETAIN_ENTRIES: usize = 9_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTranslation {
    pub translation: String,
    pub timestamp: DateTime<Utc>,
}

type CacheMap = HashMap<String, CachedTranslation>;

pub struct TranslationCache {
    store: PersistentStore,
    max_entries: usize,
    retain_entries: usize,
    update_lock: Mutex<()>,
}

impl TranslationCache {
    pub fn new(store: PersistentStore) -> Self {
        Self::with_limits(store, MAX_ENTRIES, RETAIN_ENTRIES)
    }

    pub fn with_limits(store: PersistentStore, max_entries: usize, retain_entries: usize) -> Self {
        Self {
            store,
            max_entries,
            retain_entries: retain_entries.min(max_entries),
            update_lock: Mutex::new(()),
        }
    }

    /// Entries that deserialize; fails only when the backend cannot be read
    async fn try_load(&self) -> Result<CacheMap, StoreError> {
        self.store
            .try_get_map::<CachedTranslation, _>(keys::TRANSLATION_CACHE)
            .await
    }

    pub async fn get(&self, language: &str, word: &str) -> Option<String> {
        let key = progress_key(language, word);
        let value = match self.store.try_get_entry(keys::TRANSLATION_CACHE, &key).await {
            Ok(value) => value?,
            Err(e) => {
                log::warn!("TranslationCache: lookup of '{}' failed: {}", key, e);
                return None;
            }
        };
        match serde_json::from_value::<CachedTranslation>(value) {
            Ok(entry) => Some(entry.translation),
            Err(e) => {
                log::warn!("TranslationCache: entry '{}' is malformed: {}", key, e);
                None
            }
        }
    }

    pub async fn put(&self, language: &str, word: &str, translation: &str) -> Result<(), StoreError> {
        self.put_at(language, word, translation, Utc::now()).await
    }

    pub async fn put_at(
        &self,
        language: &str,
        word: &str,
        translation: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _guard = self.update_lock.lock().await;
        let mut entries = self.try_load().await?;
        entries.insert(
            progress_key(language, word),
            CachedTranslation {
                translation: translation.to_string(),
                timestamp,
            },
        );

        if entries.len() > self.max_entries {
            self.evict(&mut entries);
        }

        self.store.set_as(keys::TRANSLATION_CACHE, &entries)
    }

    fn evict(&self, entries: &mut CacheMap) {
        let mut by_age: Vec<(String, DateTime<Utc>)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.timestamp))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let excess = entries.len().saturating_sub(self.retain_entries);
        for (key, _) in by_age.into_iter().take(excess) {
            entries.remove(&key);
        }
        log::info!(
            "TranslationCache: evicted {} oldest entries, {} remain",
            excess,
            entries.len()
        );
    }

    pub async fn len(&self) -> usize {
        self.try_load().await.map_or(0, |entries| entries.len())
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.update_lock.lock().await;
        self.store.remove(keys::TRANSLATION_CACHE).await
    }
}
