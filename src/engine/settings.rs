//! User settings, kept in the synced namespace

use serde::{Deserialize, Serialize};

use crate::learning::DEFAULT_WORDS_PER_PAGE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// Target language; without one, selection runs in degraded mode
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_words_per_page")]
    pub words_per_page: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_words_per_page() -> usize {
    DEFAULT_WORDS_PER_PAGE
}

fn default_enabled() -> bool {
    true
}

impl UserSettings {
    pub fn with_words_per_page(words_per_page: usize) -> Self {
        Self {
            language: None,
            words_per_page,
            enabled: true,
        }
    }
}

impl Default for UserSettings {
    fn default() -> Self {
        Self::with_words_per_page(DEFAULT_WORDS_PER_PAGE)
    }
}
