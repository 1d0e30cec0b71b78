//! Commands accepted by the engine and their responses
//!
//! Both are internally tagged JSON objects, e.g.
//! `{"type": "recordInteraction", "word": "house", "kind": "hover"}`.

use serde::{Deserialize, Serialize};

use crate::learning::{InteractionKind, LearningStats, WordProgress};
use crate::usage::{DailyUsage, QuotaDecision};

use super::settings::UserSettings;

fn default_review_limit() -> usize {
    20
}

fn default_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Pick the words to replace on a page
    #[serde(rename_all = "camelCase")]
    SelectWords {
        /// Target language; the configured one when absent
        #[serde(default)]
        language: Option<String>,
        /// Already filtered candidate words in page order
        #[serde(default)]
        candidates: Vec<String>,
        /// Raw page text, tokenized and filtered here
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        budget: Option<usize>,
    },
    /// Report how the user engaged with a replaced word
    RecordInteraction {
        word: String,
        #[serde(default)]
        language: Option<String>,
        kind: InteractionKind,
    },
    ReviewQueue {
        #[serde(default)]
        language: Option<String>,
        #[serde(default = "default_review_limit")]
        limit: usize,
    },
    GetProgress {
        word: String,
        #[serde(default)]
        language: Option<String>,
    },
    GetStats {
        #[serde(default)]
        language: Option<String>,
    },
    CheckTranslationQuota {
        #[serde(default = "default_count")]
        count: u32,
    },
    CheckExplanationQuota {
        #[serde(default = "default_count")]
        count: u32,
    },
    RecordTranslations {
        count: u32,
    },
    RecordExplanations {
        count: u32,
    },
    GetDailyUsage,
    #[serde(rename_all = "camelCase")]
    SetPlus {
        is_plus: bool,
    },
    CacheTranslation {
        word: String,
        #[serde(default)]
        language: Option<String>,
        translation: String,
    },
    LookupTranslation {
        word: String,
        #[serde(default)]
        language: Option<String>,
    },
    GetSettings,
    #[serde(rename_all = "camelCase")]
    UpdateSettings {
        #[serde(default)]
        language: Option<String>,
        #[serde(default)]
        words_per_page: Option<usize>,
        #[serde(default)]
        enabled: Option<bool>,
    },
    /// Sweep records not seen for 90 days
    CleanupStale,
    /// Forget all learning state, usage and cached translations
    ResetData,
    /// Commit all outstanding writes now
    Flush,
}

/// A due word with its state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub word: String,
    pub progress: WordProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Response {
    /// Words chosen for a page
    Selection {
        words: Vec<String>,
        /// Chosen by the frequency heuristic, without learning state
        degraded: bool,
    },
    /// Selection refused by the daily quota
    #[serde(rename_all = "camelCase")]
    QuotaExceeded {
        remaining: Option<u32>,
        message: Option<String>,
    },
    Progress {
        word: String,
        progress: Option<WordProgress>,
    },
    Review {
        items: Vec<ReviewItem>,
    },
    Stats {
        stats: LearningStats,
    },
    Quota {
        decision: QuotaDecision,
    },
    Usage {
        usage: DailyUsage,
    },
    Translation {
        word: String,
        translation: Option<String>,
    },
    Settings {
        settings: UserSettings,
    },
    Cleaned {
        removed: usize,
    },
    Ok,
    Error {
        message: String,
    },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
