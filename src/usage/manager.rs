//! Daily quota enforcement
//!
//! Usage lives in a single `DailyUsage` record under the `daily_usage` key.
//! Checks are read-only; counters roll over to zero the first time a new
//! calendar day is observed by `get_daily_usage()` or a `record_*` call.

use chrono::{Local, NaiveDate};
use tokio::sync::Mutex;

use super::models::*;
use crate::persistence::{keys, PersistentStore, StoreError};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Tracks daily translation and explanation usage against tier limits
pub struct QuotaManager {
    store: PersistentStore,
    limits: QuotaLimits,
    update_lock: Mutex<()>,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl QuotaManager {
    pub fn new(store: PersistentStore, limits: QuotaLimits) -> Self {
        Self {
            store,
            limits,
            update_lock: Mutex::new(()),
        }
    }

    pub fn limits(&self) -> QuotaLimits {
        self.limits
    }

    /// The stored record, if any
    ///
    /// Fails only when storage is unreadable and nothing is cached.
    async fn stored_usage(&self) -> Result<Option<DailyUsage>> {
        let Some(value) = self.store.try_get(keys::DAILY_USAGE).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(usage) => Ok(Some(usage)),
            Err(e) => {
                log::warn!("Quota: stored usage is malformed, starting fresh: {}", e);
                Ok(None)
            }
        }
    }

    /// Usage as of `today`, without persisting a rollover
    async fn read_usage(&self, today: NaiveDate) -> Result<DailyUsage> {
        Ok(self
            .stored_usage()
            .await?
            .map_or_else(|| DailyUsage::new(today), |usage| usage.as_of(today)))
    }

    /// Usage of `today`, persisting the reset when the day changed
    async fn current_usage(&self, today: NaiveDate) -> Result<DailyUsage> {
        let stored = self.stored_usage().await?;
        let up_to_date = stored.as_ref().map_or(false, |usage| usage.date == today);
        if let Some(usage) = stored.as_ref().filter(|_| !up_to_date) {
            log::info!("Quota: new day {} (last usage on {}), counters reset", today, usage.date);
        }

        let usage = stored.map_or_else(|| DailyUsage::new(today), |usage| usage.as_of(today));
        if !up_to_date {
            self.store.set_as(keys::DAILY_USAGE, &usage)?;
        }
        Ok(usage)
    }

    pub async fn can_translate_words(&self, count: u32) -> QuotaDecision {
        self.can_translate_words_on(count, today()).await
    }

    pub async fn can_translate_words_on(&self, count: u32, today: NaiveDate) -> QuotaDecision {
        match self.read_usage(today).await {
            Ok(usage) if usage.is_plus => QuotaDecision::unlimited(),
            Ok(usage) => QuotaDecision::evaluate(
                count,
                usage.words_translated,
                self.limits.daily_words,
                "translated words",
            ),
            Err(e) => {
                log::warn!("Quota: usage unreadable, denying translation: {}", e);
                QuotaDecision::unavailable()
            }
        }
    }

    pub async fn can_view_explanations(&self, count: u32) -> QuotaDecision {
        self.can_view_explanations_on(count, today()).await
    }

    pub async fn can_view_explanations_on(&self, count: u32, today: NaiveDate) -> QuotaDecision {
        match self.read_usage(today).await {
            Ok(usage) if usage.is_plus => QuotaDecision::unlimited(),
            Ok(usage) => QuotaDecision::evaluate(
                count,
                usage.explanations_viewed,
                self.limits.daily_explanations,
                "explanations",
            ),
            Err(e) => {
                log::warn!("Quota: usage unreadable, denying explanation: {}", e);
                QuotaDecision::unavailable()
            }
        }
    }

    /// Count delivered translations; call once per delivered batch
    pub async fn record_translations(&self, count: u32) -> Result<DailyUsage> {
        self.record_translations_on(count, today()).await
    }

    pub async fn record_translations_on(&self, count: u32, today: NaiveDate) -> Result<DailyUsage> {
        self.update(today, |usage| {
            usage.words_translated = usage.words_translated.saturating_add(count)
        })
        .await
    }

    /// Count delivered explanations; call once per delivered batch
    pub async fn record_explanations(&self, count: u32) -> Result<DailyUsage> {
        self.record_explanations_on(count, today()).await
    }

    pub async fn record_explanations_on(&self, count: u32, today: NaiveDate) -> Result<DailyUsage> {
        self.update(today, |usage| {
            usage.explanations_viewed = usage.explanations_viewed.saturating_add(count)
        })
        .await
    }

    /// Enable or disable the unlimited tier
    pub async fn set_plus(&self, is_plus: bool) -> Result<DailyUsage> {
        self.set_plus_on(is_plus, today()).await
    }

    pub async fn set_plus_on(&self, is_plus: bool, today: NaiveDate) -> Result<DailyUsage> {
        log::info!("Quota: plus tier {}", if is_plus { "enabled" } else { "disabled" });
        self.update(today, |usage| usage.is_plus = is_plus).await
    }

    /// Today's usage; an unreadable store yields empty counters
    pub async fn get_daily_usage(&self) -> DailyUsage {
        self.get_daily_usage_on(today()).await
    }

    pub async fn get_daily_usage_on(&self, today: NaiveDate) -> DailyUsage {
        let _guard = self.update_lock.lock().await;
        match self.current_usage(today).await {
            Ok(usage) => usage,
            Err(e) => {
                log::warn!("Quota: usage unreadable, reporting empty counters: {}", e);
                DailyUsage::new(today)
            }
        }
    }

    async fn update<F>(&self, today: NaiveDate, apply: F) -> Result<DailyUsage>
    where
        F: FnOnce(&mut DailyUsage),
    {
        let _guard = self.update_lock.lock().await;
        let mut usage = self.read_usage(today).await?;
        apply(&mut usage);
        self.store.set_as(keys::DAILY_USAGE, &usage)?;
        Ok(usage)
    }
}
