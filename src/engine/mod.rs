//! Learning engine
//!
//! Wires the persistent store, progress tracking, quotas and the
//! translation cache behind a single `dispatch(Command) -> Response` entry
//! point, so callers never depend on how those pieces are put together.

pub mod commands;
pub mod settings;

use std::sync::{Arc, Mutex};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{self, EngineConfig};
use crate::learning::{select_by_frequency, select_words_for_page, PageWords, ProgressStore};
use crate::persistence::{
    keys, lock, FileBackend, FileBackup, PersistentStore, StoreError, StoreEvent,
};
use crate::translation_cache::TranslationCache;
use crate::usage::QuotaManager;

pub use commands::{Command, Response, ReviewItem};
pub use settings::UserSettings;

pub struct LearningEngine {
    store: PersistentStore,
    progress: ProgressStore,
    quota: QuotaManager,
    translations: TranslationCache,
    default_words_per_page: usize,
    rng: Mutex<StdRng>,
}

impl LearningEngine {
    /// Build an engine over an already started store
    pub fn new(store: PersistentStore, config: &EngineConfig) -> Self {
        Self {
            progress: ProgressStore::new(store.clone()),
            quota: QuotaManager::new(store.clone(), config.quota_limits()),
            translations: TranslationCache::new(store.clone()),
            default_words_per_page: config.selection.words_per_page,
            rng: Mutex::new(StdRng::from_entropy()),
            store,
        }
    }

    /// Open the file-backed store in the configured data directory
    ///
    /// Must be called within a tokio runtime. Values left in the local
    /// backup by an earlier session are re-submitted.
    pub fn open(config: &EngineConfig) -> config::Result<Self> {
        let data_dir = config.resolve_data_dir()?;
        log::info!("Engine: opening store in {}", data_dir.display());

        let backend = FileBackend::new(data_dir.clone()).with_sync_quota(config.sync_quota());
        let backup = FileBackup::new(data_dir);
        let store = PersistentStore::start(
            Arc::new(backend),
            Arc::new(backup),
            config.store.to_store_config(),
        );

        let recovered = store.recover_backups();
        if recovered > 0 {
            log::info!("Engine: recovered {} key(s) from local backup", recovered);
        }

        Ok(Self::new(store, config))
    }

    /// Replace the random source, for reproducible selections
    pub fn with_rng(self, rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            ..self
        }
    }

    pub fn store(&self) -> &PersistentStore {
        &self.store
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<StoreEvent> {
        self.store.subscribe_events()
    }

    /// Flush outstanding writes and stop the store worker
    pub async fn shutdown(&self) {
        self.store.shutdown().await;
    }

    pub async fn settings(&self) -> UserSettings {
        self.store
            .get_or(
                keys::SETTINGS,
                UserSettings::with_words_per_page(self.default_words_per_page),
            )
            .await
    }

    async fn resolve_language(&self, explicit: Option<String>) -> Option<String> {
        match explicit {
            Some(language) => Some(language),
            None => self.settings().await.language,
        }
    }

    pub async fn dispatch(&self, command: Command) -> Response {
        match self.handle(command).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Engine: command failed: {}", e);
                Response::error(e.to_string())
            }
        }
    }

    async fn handle(&self, command: Command) -> Result<Response, StoreError> {
        let response = match command {
            Command::SelectWords {
                language,
                candidates,
                text,
                budget,
            } => self.select_words(language, candidates, text, budget).await,

            Command::RecordInteraction {
                word,
                language,
                kind,
            } => {
                let Some(language) = self.resolve_language(language).await else {
                    return Ok(Response::error("No target language configured"));
                };
                let progress = self.progress.record_interaction(&language, &word, kind).await?;
                Response::Progress {
                    word: word.to_lowercase(),
                    progress: Some(progress),
                }
            }

            Command::ReviewQueue { language, limit } => {
                let Some(language) = self.resolve_language(language).await else {
                    return Ok(Response::Review { items: Vec::new() });
                };
                let items = self
                    .progress
                    .review_queue(&language, limit, Utc::now())
                    .await
                    .into_iter()
                    .map(|(word, progress)| ReviewItem { word, progress })
                    .collect();
                Response::Review { items }
            }

            Command::GetProgress { word, language } => {
                let progress = match self.resolve_language(language).await {
                    Some(language) => self.progress.get(&language, &word).await,
                    None => None,
                };
                Response::Progress {
                    word: word.to_lowercase(),
                    progress,
                }
            }

            Command::GetStats { language } => Response::Stats {
                stats: self.progress.stats(language.as_deref(), Utc::now()).await,
            },

            Command::CheckTranslationQuota { count } => Response::Quota {
                decision: self.quota.can_translate_words(count).await,
            },

            Command::CheckExplanationQuota { count } => Response::Quota {
                decision: self.quota.can_view_explanations(count).await,
            },

            Command::RecordTranslations { count } => Response::Usage {
                usage: self.quota.record_translations(count).await?,
            },

            Command::RecordExplanations { count } => Response::Usage {
                usage: self.quota.record_explanations(count).await?,
            },

            Command::GetDailyUsage => Response::Usage {
                usage: self.quota.get_daily_usage().await,
            },

            Command::SetPlus { is_plus } => Response::Usage {
                usage: self.quota.set_plus(is_plus).await?,
            },

            Command::CacheTranslation {
                word,
                language,
                translation,
            } => {
                let Some(language) = self.resolve_language(language).await else {
                    return Ok(Response::error("No target language configured"));
                };
                self.translations.put(&language, &word, &translation).await?;
                Response::Ok
            }

            Command::LookupTranslation { word, language } => {
                let translation = match self.resolve_language(language).await {
                    Some(language) => self.translations.get(&language, &word).await,
                    None => None,
                };
                Response::Translation { word, translation }
            }

            Command::GetSettings => Response::Settings {
                settings: self.settings().await,
            },

            Command::UpdateSettings {
                language,
                words_per_page,
                enabled,
            } => {
                let mut settings = self.settings().await;
                if let Some(language) = language {
                    settings.language = Some(language).filter(|l| !l.is_empty());
                }
                if let Some(words_per_page) = words_per_page {
                    settings.words_per_page = words_per_page;
                }
                if let Some(enabled) = enabled {
                    settings.enabled = enabled;
                }
                self.store.set_as(keys::SETTINGS, &settings)?;
                Response::Settings { settings }
            }

            Command::CleanupStale => Response::Cleaned {
                removed: self.progress.cleanup_stale(Utc::now()).await?,
            },

            Command::ResetData => {
                // Attempt every removal, then report the first failure
                let results = [
                    self.progress.reset_progress().await,
                    self.translations.clear().await,
                    self.store.remove(keys::DAILY_USAGE).await,
                ];
                results.into_iter().collect::<Result<Vec<()>, _>>()?;
                log::info!("Engine: user data reset");
                Response::Ok
            }

            Command::Flush => {
                self.store.force_flush().await;
                Response::Ok
            }
        };

        Ok(response)
    }

    async fn select_words(
        &self,
        language: Option<String>,
        candidates: Vec<String>,
        text: Option<String>,
        budget: Option<usize>,
    ) -> Response {
        let settings = self.settings().await;
        if !settings.enabled {
            return Response::Selection {
                words: Vec::new(),
                degraded: false,
            };
        }

        let decision = self.quota.can_translate_words(1).await;
        if !decision.allowed {
            return Response::QuotaExceeded {
                remaining: decision.remaining,
                message: decision.message,
            };
        }

        let mut budget = budget.unwrap_or(settings.words_per_page);
        if let Some(remaining) = decision.remaining {
            budget = budget.min(remaining as usize);
        }

        let page = match text {
            Some(text) => PageWords::from_text(&text),
            None => PageWords::from_tokens(candidates.iter().map(String::as_str)),
        };

        let language = language.or(settings.language);
        let state = match &language {
            Some(_) => match self.progress.try_load().await {
                Ok(progress) => Some(progress),
                Err(e) => {
                    log::warn!("Engine: progress unreadable, selecting by frequency: {}", e);
                    None
                }
            },
            None => None,
        };

        match (language, state) {
            (Some(language), Some(progress)) => {
                let words = {
                    let mut rng = lock(&self.rng);
                    select_words_for_page(
                        &progress,
                        page.words(),
                        &language,
                        budget,
                        Utc::now(),
                        &mut *rng,
                    )
                };
                log::debug!("Engine: selected {} word(s) for {}", words.len(), language);
                Response::Selection {
                    words,
                    degraded: false,
                }
            }
            _ => Response::Selection {
                words: select_by_frequency(&page, budget),
                degraded: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::InteractionKind;
    use crate::persistence::{MemoryBackend, MemoryBackup, Namespace, StoreConfig};
    use serde_json::json;

    fn create_test_engine() -> (LearningEngine, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = PersistentStore::start(
            backend.clone(),
            Arc::new(MemoryBackup::new()),
            StoreConfig::default(),
        );
        let engine = LearningEngine::new(store, &EngineConfig::default())
            .with_rng(StdRng::seed_from_u64(42));
        (engine, backend)
    }

    fn select(language: Option<&str>, candidates: &[&str], budget: usize) -> Command {
        Command::SelectWords {
            language: language.map(str::to_string),
            candidates: candidates.iter().map(|w| w.to_string()).collect(),
            text: None,
            budget: Some(budget),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_then_interact() {
        let (engine, _backend) = create_test_engine();

        let response = engine
            .dispatch(select(Some("es"), &["house", "river", "garden"], 2))
            .await;
        let Response::Selection { words, degraded } = response else {
            panic!("unexpected response {:?}", response);
        };
        assert_eq!(words.len(), 2);
        assert!(!degraded);

        let response = engine
            .dispatch(Command::RecordInteraction {
                word: "House".to_string(),
                language: Some("es".to_string()),
                kind: InteractionKind::Hover,
            })
            .await;
        match response {
            Response::Progress { word, progress } => {
                assert_eq!(word, "house");
                assert_eq!(progress.unwrap().interval, 1);
            }
            other => panic!("unexpected response {:?}", other),
        }

        // Tracked and not yet due: never offered again today
        let response = engine.dispatch(select(Some("es"), &["house"], 5)).await;
        assert_eq!(
            response,
            Response::Selection {
                words: Vec::new(),
                degraded: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_without_language_is_degraded() {
        let (engine, _backend) = create_test_engine();

        let response = engine
            .dispatch(Command::SelectWords {
                language: None,
                candidates: Vec::new(),
                text: Some("The garden and the garden path. Water flows.".to_string()),
                budget: Some(1),
            })
            .await;
        assert_eq!(
            response,
            Response::Selection {
                words: vec!["garden".to_string()],
                degraded: true
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_denied_when_quota_exhausted() {
        let (engine, _backend) = create_test_engine();
        engine
            .dispatch(Command::RecordTranslations { count: 100 })
            .await;

        let response = engine.dispatch(select(Some("es"), &["house"], 5)).await;
        match response {
            Response::QuotaExceeded { remaining, message } => {
                assert_eq!(remaining, Some(0));
                assert!(message.is_some());
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_budget_capped_by_remaining_quota() {
        let (engine, _backend) = create_test_engine();
        engine.dispatch(Command::RecordTranslations { count: 98 }).await;

        let response = engine
            .dispatch(select(Some("es"), &["house", "river", "garden", "window"], 5))
            .await;
        match response {
            Response::Selection { words, .. } => assert_eq!(words.len(), 2),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_are_synced() {
        let (engine, backend) = create_test_engine();

        let response = engine
            .dispatch(Command::UpdateSettings {
                language: Some("fr".to_string()),
                words_per_page: Some(3),
                enabled: None,
            })
            .await;
        match response {
            Response::Settings { settings } => {
                assert_eq!(settings.language.as_deref(), Some("fr"));
                assert_eq!(settings.words_per_page, 3);
                assert!(settings.enabled);
            }
            other => panic!("unexpected response {:?}", other),
        }

        engine.dispatch(Command::Flush).await;
        let synced = backend.snapshot(Namespace::Synced);
        assert_eq!(
            synced.get(keys::SETTINGS),
            Some(&json!({"language": "fr", "wordsPerPage": 3, "enabled": true}))
        );

        // Configured language is used when a command omits it
        engine
            .dispatch(Command::CacheTranslation {
                word: "dog".to_string(),
                language: None,
                translation: "chien".to_string(),
            })
            .await;
        let response = engine
            .dispatch(Command::LookupTranslation {
                word: "Dog".to_string(),
                language: Some("fr".to_string()),
            })
            .await;
        assert_eq!(
            response,
            Response::Translation {
                word: "Dog".to_string(),
                translation: Some("chien".to_string())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_selects_nothing() {
        let (engine, _backend) = create_test_engine();
        engine
            .dispatch(Command::UpdateSettings {
                language: None,
                words_per_page: None,
                enabled: Some(false),
            })
            .await;

        let response = engine.dispatch(select(Some("es"), &["house"], 5)).await;
        assert_eq!(
            response,
            Response::Selection {
                words: Vec::new(),
                degraded: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_data() {
        let (engine, _backend) = create_test_engine();
        engine
            .dispatch(Command::RecordInteraction {
                word: "house".to_string(),
                language: Some("es".to_string()),
                kind: InteractionKind::Clicked,
            })
            .await;
        engine.dispatch(Command::RecordTranslations { count: 5 }).await;

        assert_eq!(engine.dispatch(Command::ResetData).await, Response::Ok);

        match engine.dispatch(Command::GetStats { language: None }).await {
            Response::Stats { stats } => assert_eq!(stats.total_words, 0),
            other => panic!("unexpected response {:?}", other),
        }
        match engine.dispatch(Command::GetDailyUsage).await {
            Response::Usage { usage } => assert_eq!(usage.words_translated, 0),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_data_reports_backend_failure() {
        let (engine, backend) = create_test_engine();
        engine
            .dispatch(Command::RecordInteraction {
                word: "house".to_string(),
                language: Some("es".to_string()),
                kind: InteractionKind::Clicked,
            })
            .await;
        engine.dispatch(Command::Flush).await;

        backend.set_failing(true);
        let response = engine.dispatch(Command::ResetData).await;
        assert!(matches!(response, Response::Error { .. }));

        // Removal keeps retrying and lands once the backend is back
        backend.set_failing(false);
        tokio::time::sleep(std::time::Duration::from_secs(20)).await;
        assert_eq!(backend.committed(keys::WORD_PROGRESS), None);
        match engine.dispatch(Command::GetStats { language: None }).await {
            Response::Stats { stats } => assert_eq!(stats.total_words, 0),
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interaction_without_language_is_an_error() {
        let (engine, _backend) = create_test_engine();
        let response = engine
            .dispatch(Command::RecordInteraction {
                word: "house".to_string(),
                language: None,
                kind: InteractionKind::Hover,
            })
            .await;
        assert!(matches!(response, Response::Error { .. }));
    }
}
