//! Word selection policy
//!
//! Turns a page's candidate words into a bounded learning set: review-due
//! words first (most overdue first), capped one below the budget so every
//! page can still introduce a new word, then new words in random order.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;

use super::candidates::PageWords;
use super::models::{progress_key, ProgressMap, WordProgress};

/// Default number of words replaced on a page
pub const DEFAULT_WORDS_PER_PAGE: usize = 5;

/// Frequent everyday words, favoured by the fallback heuristic
const COMMON_WORDS: &[&str] = &[
    "time", "year", "people", "world", "life", "house", "home", "water", "school", "family",
    "friend", "money", "night", "morning", "book", "city", "country", "food", "music", "story",
    "place", "work", "week", "month", "child", "children", "woman", "women", "mother", "father",
    "room", "door", "window", "table", "street", "car", "train", "weather", "today", "tomorrow",
    "yesterday", "little", "great", "small", "large", "good", "happy", "beautiful", "important",
    "different", "number", "question", "answer", "problem", "company", "government", "market",
    "history", "health", "language", "animal", "garden", "river", "mountain", "summer", "winter",
];

/// Select the words to replace on a page
///
/// # Arguments
/// * `existing` - Progress records of all tracked words
/// * `candidates` - Filtered page words in first-seen order
/// * `language` - Target language the records are keyed by
/// * `budget` - Maximum number of words to return
/// * `now` - Time the review-due check is made against
/// * `rng` - Source of randomness for ordering new words
///
/// Words that are tracked but not yet due are never selected.
pub fn select_words_for_page<R: Rng + ?Sized>(
    existing: &ProgressMap,
    candidates: &[String],
    language: &str,
    budget: usize,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<String> {
    if budget == 0 {
        return Vec::new();
    }

    let mut seen = std::collections::HashSet::new();
    let mut review_due: Vec<(String, &WordProgress)> = Vec::new();
    let mut new_words: Vec<String> = Vec::new();

    for candidate in candidates {
        let word = candidate.to_lowercase();
        if !seen.insert(word.clone()) {
            continue;
        }
        match existing.get(&progress_key(language, &word)) {
            Some(record) if record.is_due(now) => review_due.push((word, record)),
            Some(_) => {}
            None => new_words.push(word),
        }
    }

    if review_due.is_empty() && new_words.is_empty() {
        return Vec::new();
    }

    // Stable sort keeps candidate order among equally overdue words
    review_due.sort_by(|a, b| a.1.next_review.cmp(&b.1.next_review));

    let review_slots = review_due.len().min(budget - 1);
    let mut selected: Vec<String> = review_due
        .iter()
        .take(review_slots)
        .map(|(word, _)| word.clone())
        .collect();

    new_words.shuffle(rng);
    let new_slots = budget - selected.len();
    selected.extend(new_words.into_iter().take(new_slots));

    // No new words to fill the page with: let the remaining review words in
    if selected.len() < budget {
        let room = budget - selected.len();
        selected.extend(
            review_due
                .into_iter()
                .skip(review_slots)
                .take(room)
                .map(|(word, _)| word),
        );
    }

    selected
}

/// Heuristic score of a word for the fallback selection
fn frequency_score(word: &str, count: usize) -> u32 {
    let mut score = match count {
        2..=3 => 3,
        4..=6 => 2,
        1 => 1,
        _ => 0,
    };

    score += match word.chars().count() {
        5..=8 => 2,
        4 | 9..=10 => 1,
        _ => 0,
    };

    if COMMON_WORDS.contains(&word) {
        score += 2;
    }

    score
}

/// Fallback selection when no learning state is available
///
/// Prefers words seen two or three times on the page, of medium length,
/// and from the common-word list. Ties keep first-seen order.
pub fn select_by_frequency(page: &PageWords, budget: usize) -> Vec<String> {
    let mut scored: Vec<(&String, u32)> = page
        .words()
        .iter()
        .map(|word| (word, frequency_score(word, page.count(word))))
        .collect();

    scored.sort_by(|a, b| b.1.cmp(&a.1));

    scored
        .into_iter()
        .take(budget)
        .map(|(word, _)| word.clone())
        .collect()
}
