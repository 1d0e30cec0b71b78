//! Data models for per-word learning state

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::algorithm::{DEFAULT_EASE_FACTOR, MIN_EASE_FACTOR};

/// Days without an encounter after which a record is swept
pub const STALE_AFTER_DAYS: i64 = 90;

/// Word progress records keyed by `"language:word"`
pub type ProgressMap = BTreeMap<String, WordProgress>;

/// Build the storage key of a word; the word is case-folded
pub fn progress_key(language: &str, word: &str) -> String {
    format!("{}:{}", language, word.to_lowercase())
}

/// Split a storage key back into `(language, word)`
pub fn split_progress_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
}

/// How the user engaged with a replaced word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    /// Hovered to reveal the original word
    Hover,
    /// Played the pronunciation
    Pronunciation,
    /// Asked for an explanation in context
    Context,
    /// Read past the word without help
    Ignored,
    /// Clicked through, recognizing the word
    Clicked,
}

impl InteractionKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hover" => Some(Self::Hover),
            "pronunciation" => Some(Self::Pronunciation),
            "context" => Some(Self::Context),
            "ignored" => Some(Self::Ignored),
            "clicked" => Some(Self::Clicked),
            _ => None,
        }
    }
}

/// Counters of help-seeking interactions with a word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionCounts {
    #[serde(default)]
    pub hover: u32,
    #[serde(default)]
    pub pronunciation: u32,
    #[serde(default)]
    pub context: u32,
}

impl InteractionCounts {
    pub fn record(&mut self, kind: InteractionKind) {
        match kind {
            InteractionKind::Hover => self.hover += 1,
            InteractionKind::Pronunciation => self.pronunciation += 1,
            InteractionKind::Context => self.context += 1,
            InteractionKind::Ignored | InteractionKind::Clicked => {}
        }
    }
}

/// Spaced repetition state of one word in one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordProgress {
    /// SM-2 ease factor (default 2.5, never below 1.3)
    #[serde(default = "default_ease_factor")]
    pub ease_factor: f32,
    /// Current interval in days
    #[serde(default)]
    pub interval: u32,
    /// Consecutive successful reviews
    #[serde(default)]
    pub repetitions: u32,
    pub last_seen: DateTime<Utc>,
    pub next_review: DateTime<Utc>,
    #[serde(default)]
    pub total_seen: u32,
    #[serde(default)]
    pub correct_count: u32,
    /// Derived 0-100 score, recomputed on every update
    #[serde(default)]
    pub mastery: u8,
    #[serde(default)]
    pub interactions: InteractionCounts,
}

fn default_ease_factor() -> f32 {
    DEFAULT_EASE_FACTOR
}

impl WordProgress {
    /// State of a word on its first encounter
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            ease_factor: DEFAULT_EASE_FACTOR,
            interval: 0,
            repetitions: 0,
            last_seen: now,
            next_review: now,
            total_seen: 0,
            correct_count: 0,
            mastery: 0,
            interactions: InteractionCounts::default(),
        }
    }

    /// Whether the record satisfies its invariants
    pub fn is_consistent(&self) -> bool {
        self.ease_factor.is_finite()
            && self.ease_factor >= MIN_EASE_FACTOR
            && self.correct_count <= self.total_seen
            && self.next_review >= self.last_seen
            && self.mastery <= 100
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review <= now
    }

    /// How long past its review time the word is (zero if not yet due)
    pub fn overdue_by(&self, now: DateTime<Utc>) -> Duration {
        if self.is_due(now) {
            now - self.next_review
        } else {
            Duration::zero()
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.last_seen > Duration::days(STALE_AFTER_DAYS)
    }

    pub fn level(&self) -> MasteryLevel {
        MasteryLevel::of(self)
    }
}

/// Coarse bucket of a word's mastery score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MasteryLevel {
    /// Never reviewed
    New,
    /// Mastery below 40
    Learning,
    /// Mastery 40 to 79
    Familiar,
    /// Mastery 80 and above
    Mastered,
}

impl MasteryLevel {
    pub fn of(progress: &WordProgress) -> Self {
        if progress.total_seen == 0 {
            Self::New
        } else if progress.mastery >= 80 {
            Self::Mastered
        } else if progress.mastery >= 40 {
            Self::Familiar
        } else {
            Self::Learning
        }
    }
}

/// Learning summary over all tracked words
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningStats {
    pub total_words: usize,
    pub due_words: usize,
    pub new_words: usize,
    pub learning_words: usize,
    pub familiar_words: usize,
    pub mastered_words: usize,
    pub average_mastery: f32,
    pub total_reviews: u32,
}

impl LearningStats {
    /// Summarize the words of one language, or all languages when `None`
    pub fn compute(progress: &ProgressMap, language: Option<&str>, now: DateTime<Utc>) -> Self {
        let mut stats = Self::default();
        let mut mastery_sum = 0u64;

        let records = progress.iter().filter(|(key, _)| match language {
            Some(lang) => split_progress_key(key).map_or(false, |(l, _)| l == lang),
            None => true,
        });

        for (_, record) in records {
            stats.total_words += 1;
            stats.total_reviews += record.total_seen;
            mastery_sum += record.mastery as u64;

            if record.is_due(now) {
                stats.due_words += 1;
            }

            match record.level() {
                MasteryLevel::New => stats.new_words += 1,
                MasteryLevel::Learning => stats.learning_words += 1,
                MasteryLevel::Familiar => stats.familiar_words += 1,
                MasteryLevel::Mastered => stats.mastered_words += 1,
            }
        }

        if stats.total_words > 0 {
            stats.average_mastery = mastery_sum as f32 / stats.total_words as f32;
        }
        stats
    }
}
