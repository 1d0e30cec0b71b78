//! Word progress persistence
//!
//! All records live in a single map under the `word_progress` key of the
//! persistent store. Updates are read-modify-write on that map and are
//! serialized so concurrent interactions never lose each other's changes.
//! An update never runs on a map that could not be read: a backend failure
//! fails the update, and a malformed record is dropped on its own.

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::algorithm::{calculate_next_review, get_words_for_review, score_interaction};
use super::models::*;
use crate::persistence::{keys, PersistentStore, StoreError};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Learning state of all words, backed by a `PersistentStore`
pub struct ProgressStore {
    store: PersistentStore,
    update_lock: Mutex<()>,
}

impl ProgressStore {
    pub fn new(store: PersistentStore) -> Self {
        Self {
            store,
            update_lock: Mutex::new(()),
        }
    }

    /// All progress records; unreadable storage yields an empty map
    pub async fn load(&self) -> ProgressMap {
        match self.try_load().await {
            Ok(progress) => progress,
            Err(e) => {
                log::warn!("Learning: progress unavailable: {}", e);
                ProgressMap::new()
            }
        }
    }

    /// All progress records, surfacing storage that cannot be read
    pub async fn try_load(&self) -> Result<ProgressMap> {
        self.store
            .try_get_map::<WordProgress, _>(keys::WORD_PROGRESS)
            .await
    }

    fn save(&self, progress: &ProgressMap) -> Result<()> {
        self.store.set_as(keys::WORD_PROGRESS, progress)
    }

    /// Progress of a single word
    pub async fn get(&self, language: &str, word: &str) -> Option<WordProgress> {
        let key = progress_key(language, word);
        match self.store.try_get_entry(keys::WORD_PROGRESS, &key).await {
            Ok(entry) => entry.and_then(|value| serde_json::from_value(value).ok()),
            Err(e) => {
                log::warn!("Learning: progress of '{}' unavailable: {}", key, e);
                None
            }
        }
    }

    /// Apply an interaction to a word, creating its record on first encounter
    pub async fn record_interaction(
        &self,
        language: &str,
        word: &str,
        kind: InteractionKind,
    ) -> Result<WordProgress> {
        self.record_interaction_at(language, word, kind, Utc::now())
            .await
    }

    pub async fn record_interaction_at(
        &self,
        language: &str,
        word: &str,
        kind: InteractionKind,
        now: DateTime<Utc>,
    ) -> Result<WordProgress> {
        let _guard = self.update_lock.lock().await;
        let mut progress = self.try_load().await?;
        let key = progress_key(language, word);

        let current = progress
            .get(&key)
            .cloned()
            .unwrap_or_else(|| WordProgress::new(now));

        let mut updated = calculate_next_review(&current, score_interaction(kind), now);
        updated.interactions.record(kind);

        log::debug!(
            "Learning: {} {:?} -> interval {}d, mastery {}",
            key,
            kind,
            updated.interval,
            updated.mastery
        );

        progress.insert(key, updated.clone());
        self.save(&progress)?;
        Ok(updated)
    }

    /// Words of a language due for review, most overdue first
    pub async fn review_queue(
        &self,
        language: &str,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<(String, WordProgress)> {
        let progress: ProgressMap = self
            .load()
            .await
            .into_iter()
            .filter(|(key, _)| split_progress_key(key).map_or(false, |(l, _)| l == language))
            .collect();

        get_words_for_review(&progress, limit, now)
            .into_iter()
            .filter_map(|key| {
                let record = progress.get(&key)?.clone();
                let (_, word) = split_progress_key(&key)?;
                Some((word.to_string(), record))
            })
            .collect()
    }

    pub async fn stats(&self, language: Option<&str>, now: DateTime<Utc>) -> LearningStats {
        LearningStats::compute(&self.load().await, language, now)
    }

    /// Delete records not encountered for `STALE_AFTER_DAYS`
    ///
    /// Returns the number of records removed.
    pub async fn cleanup_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.update_lock.lock().await;
        let mut progress = self.try_load().await?;
        let before = progress.len();

        progress.retain(|_, record| !record.is_stale(now));

        let removed = before - progress.len();
        if removed > 0 {
            log::info!("Learning: removed {} stale word record(s)", removed);
            self.save(&progress)?;
        }
        Ok(removed)
    }

    /// Forget all learning progress
    pub async fn reset_progress(&self) -> Result<()> {
        let _guard = self.update_lock.lock().await;
        self.store.remove(keys::WORD_PROGRESS).await?;
        log::info!("Learning: progress reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryBackend, MemoryBackup, Namespace, StorageBackend, StoreConfig};
    use chrono::Duration;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn create_test_storage() -> ProgressStore {
        ProgressStore::new(PersistentStore::in_memory(StoreConfig::default()))
    }

    /// Storage over a backend that already holds `records`
    async fn create_seeded_storage(records: Value) -> (ProgressStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .set(
                Namespace::Local,
                HashMap::from([(keys::WORD_PROGRESS.to_string(), records)]),
            )
            .await
            .unwrap();
        let store = PersistentStore::start(
            backend.clone(),
            Arc::new(MemoryBackup::new()),
            StoreConfig::default(),
        );
        (ProgressStore::new(store), backend)
    }

    fn committed_words(backend: &MemoryBackend) -> Vec<String> {
        let Some(Value::Object(records)) = backend.committed(keys::WORD_PROGRESS) else {
            return Vec::new();
        };
        let mut words: Vec<String> = records.keys().cloned().collect();
        words.sort();
        words
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_interaction_creates_record() {
        let storage = create_test_storage();
        let now = Utc::now();

        let record = storage
            .record_interaction_at("es", "House", InteractionKind::Hover, now)
            .await
            .unwrap();

        assert_eq!(record.interval, 1);
        assert_eq!(record.repetitions, 1);
        assert_eq!(record.interactions.hover, 1);

        let stored = storage.get("es", "house").await.unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interactions_accumulate() {
        let storage = create_test_storage();
        let now = Utc::now();

        storage
            .record_interaction_at("es", "house", InteractionKind::Hover, now)
            .await
            .unwrap();
        storage
            .record_interaction_at("es", "house", InteractionKind::Clicked, now)
            .await
            .unwrap();
        let third = storage
            .record_interaction_at("es", "house", InteractionKind::Hover, now)
            .await
            .unwrap();

        assert_eq!(third.interval, 7);
        assert_eq!(third.total_seen, 3);
        assert_eq!(third.interactions.hover, 2);
        assert!(storage.get("fr", "house").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_review_queue_per_language() {
        let storage = create_test_storage();
        let earlier = Utc::now() - Duration::days(10);

        storage
            .record_interaction_at("es", "casa", InteractionKind::Hover, earlier)
            .await
            .unwrap();
        storage
            .record_interaction_at("es", "perro", InteractionKind::Hover, earlier + Duration::days(2))
            .await
            .unwrap();
        storage
            .record_interaction_at("fr", "chien", InteractionKind::Hover, earlier)
            .await
            .unwrap();

        let queue = storage.review_queue("es", 10, Utc::now()).await;
        let words: Vec<&str> = queue.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, vec!["casa", "perro"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_stale_records() {
        let storage = create_test_storage();
        let now = Utc::now();

        storage
            .record_interaction_at("es", "viejo", InteractionKind::Hover, now - Duration::days(120))
            .await
            .unwrap();
        storage
            .record_interaction_at("es", "nuevo", InteractionKind::Hover, now - Duration::days(3))
            .await
            .unwrap();

        assert_eq!(storage.cleanup_stale(now).await.unwrap(), 1);
        assert!(storage.get("es", "viejo").await.is_none());
        assert!(storage.get("es", "nuevo").await.is_some());
        assert_eq!(storage.cleanup_stale(now).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_progress() {
        let storage = create_test_storage();
        storage
            .record_interaction("es", "casa", InteractionKind::Context)
            .await
            .unwrap();

        storage.reset_progress().await.unwrap();

        assert!(storage.load().await.is_empty());
        assert_eq!(storage.stats(None, Utc::now()).await.total_words, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_progress_is_never_overwritten() {
        let now = Utc::now();
        let record = serde_json::to_value(WordProgress::new(now)).unwrap();
        let (storage, backend) = create_seeded_storage(json!({
            "es:alpha": record,
            "es:beta": record,
            "es:gamma": record,
        }))
        .await;

        backend.set_reads_failing(true);
        let result = storage
            .record_interaction_at("es", "delta", InteractionKind::Hover, now)
            .await;
        assert!(result.is_err());
        assert!(storage.cleanup_stale(now).await.is_err());

        storage.store.force_flush().await;
        assert_eq!(committed_words(&backend), vec!["es:alpha", "es:beta", "es:gamma"]);

        backend.set_reads_failing(false);
        storage
            .record_interaction_at("es", "delta", InteractionKind::Hover, now)
            .await
            .unwrap();
        storage.store.force_flush().await;
        assert_eq!(committed_words(&backend).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_record_is_dropped_alone() {
        let now = Utc::now();
        let record = serde_json::to_value(WordProgress::new(now)).unwrap();
        let (storage, backend) = create_seeded_storage(json!({
            "es:alpha": record,
            "es:broken": {"interval": "soon"},
            "es:gamma": record,
        }))
        .await;

        assert!(storage.get("es", "broken").await.is_none());
        assert!(storage.get("es", "alpha").await.is_some());

        storage
            .record_interaction_at("es", "delta", InteractionKind::Hover, now)
            .await
            .unwrap();
        storage.store.force_flush().await;

        assert_eq!(
            committed_words(&backend),
            vec!["es:alpha", "es:delta", "es:gamma"]
        );
    }
}
