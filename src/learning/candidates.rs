//! Candidate words of a page
//!
//! Tokenizes page text and applies the candidate filter: words shorter
//! than `MIN_WORD_LENGTH`, stop words and short capitalized tokens (names,
//! acronyms) never reach the selection policy.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

/// Minimum length, in characters, of a candidate word
pub const MIN_WORD_LENGTH: usize = 4;

/// Capitalized tokens up to this length are treated as names
const SHORT_CAPITALIZED_MAX: usize = 5;

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "also", "been", "before", "being", "below",
    "between", "both", "cannot", "could", "does", "doing", "down", "during", "each", "from",
    "further", "have", "having", "here", "hers", "herself", "himself", "into", "itself", "just",
    "more", "most", "myself", "only", "other", "ought", "ours", "ourselves", "over", "same",
    "should", "some", "such", "than", "that", "their", "theirs", "them", "themselves", "then",
    "there", "these", "they", "this", "those", "through", "under", "until", "very", "want",
    "were", "what", "when", "where", "which", "while", "whom", "with", "would", "your", "yours",
    "yourself", "yourselves", "will", "shall", "might", "must", "like", "because",
];

fn word_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\p{L}+(?:['’]\p{L}+)*").unwrap())
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

/// Whether a raw token may be offered as a learning candidate
pub fn is_candidate(token: &str) -> bool {
    let length = token.chars().count();
    if length < MIN_WORD_LENGTH {
        return false;
    }
    if token.contains(|c: char| c == '\'' || c == '’') {
        return false;
    }

    let starts_upper = token.chars().next().map_or(false, char::is_uppercase);
    if starts_upper && length <= SHORT_CAPITALIZED_MAX {
        return false;
    }

    !is_stop_word(&token.to_lowercase())
}

/// Filtered, case-folded candidate words of a page with occurrence counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageWords {
    /// Distinct words in first-seen order
    order: Vec<String>,
    counts: HashMap<String, usize>,
}

impl PageWords {
    /// Tokenize and filter page text
    pub fn from_text(text: &str) -> Self {
        Self::from_tokens(
            word_pattern()
                .find_iter(text)
                .map(|m| m.as_str())
                .filter(|token| is_candidate(token)),
        )
    }

    /// Build from tokens that were already filtered upstream
    pub fn from_tokens<'a>(tokens: impl IntoIterator<Item = &'a str>) -> Self {
        let mut page = Self::default();
        for token in tokens {
            page.add(token, 1);
        }
        page
    }

    /// Build from per-word occurrence counts, keeping their order
    pub fn from_counts<S: AsRef<str>>(counts: impl IntoIterator<Item = (S, usize)>) -> Self {
        let mut page = Self::default();
        for (word, count) in counts {
            page.add(word.as_ref(), count);
        }
        page
    }

    fn add(&mut self, token: &str, count: usize) {
        if count == 0 {
            return;
        }
        let word = token.to_lowercase();
        match self.counts.get_mut(&word) {
            Some(existing) => *existing += count,
            None => {
                self.counts.insert(word.clone(), count);
                self.order.push(word);
            }
        }
    }

    /// Distinct candidates in first-seen order
    pub fn words(&self) -> &[String] {
        &self.order
    }

    pub fn count(&self, word: &str) -> usize {
        self.counts.get(word).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
