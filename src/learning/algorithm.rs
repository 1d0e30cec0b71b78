//! SM-2 Spaced Repetition Algorithm
//!
//! Variant of SuperMemo 2 driven by passive reading interactions rather
//! than explicit self-grading. Each interaction maps to a quality rating:
//!
//! - 3: hover or context lookup (recalled with difficulty)
//! - 4: pronunciation playback (recalled after hesitation)
//! - 5: ignored or clicked through (effortless recognition)
//!
//! Ratings below 3 are lapses and restart the review cadence.

use chrono::{DateTime, Duration, Utc};

use super::models::{InteractionKind, ProgressMap, WordProgress};

/// Minimum ease factor allowed
pub const MIN_EASE_FACTOR: f32 = 1.3;

/// Ease factor of a word on first encounter
pub const DEFAULT_EASE_FACTOR: f32 = 2.5;

/// Lowest quality rating that counts as a successful review
pub const PASSING_QUALITY: u8 = 3;

/// Longest review interval, about a hundred years
pub const MAX_INTERVAL_DAYS: u32 = 36_500;

/// Map an interaction to an SM-2 quality rating (0-5)
pub fn score_interaction(kind: InteractionKind) -> u8 {
    match kind {
        InteractionKind::Hover => 3,
        InteractionKind::Context => 3,
        InteractionKind::Pronunciation => 4,
        InteractionKind::Ignored => 5,
        InteractionKind::Clicked => 5,
    }
}

/// Compute the ease factor after a review of the given quality
///
/// EF' = EF + (0.1 - (5-q) * (0.08 + (5-q) * 0.02)), floored at 1.3
pub fn next_ease_factor(ease_factor: f32, quality: u8) -> f32 {
    let q = quality.min(5) as f32;
    let ease = ease_factor + (0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02));
    ease.max(MIN_EASE_FACTOR)
}

/// Mastery score blending accuracy, interval length and streak length
pub fn calculate_mastery(correct_count: u32, total_seen: u32, interval: u32, repetitions: u32) -> u8 {
    if total_seen == 0 {
        return 0;
    }

    let accuracy = correct_count as f64 / total_seen as f64;
    let spacing = (interval as f64 / 30.0).min(1.0);
    let streak = (repetitions as f64 / 5.0).min(1.0);
    let score = 100.0 * (0.4 * accuracy + 0.3 * spacing + 0.3 * streak);

    score.round().clamp(0.0, 100.0) as u8
}

/// Calculate the updated record after a review of the given quality
///
/// # Arguments
/// * `record` - Current word state
/// * `quality` - Quality rating (0-5); values above 5 are treated as 5
/// * `now` - Time of the review
///
/// Records that violate their invariants are treated as new rather than
/// carrying the corruption forward.
pub fn calculate_next_review(record: &WordProgress, quality: u8, now: DateTime<Utc>) -> WordProgress {
    let quality = quality.min(5);

    let mut next = if record.is_consistent() {
        record.clone()
    } else {
        log::warn!(
            "Scheduler: inconsistent record (seen={}, correct={}, ease={}), restarting it",
            record.total_seen,
            record.correct_count,
            record.ease_factor
        );
        let mut fresh = WordProgress::new(now);
        fresh.interactions = record.interactions;
        fresh
    };

    next.total_seen += 1;
    next.last_seen = now;
    next.ease_factor = next_ease_factor(next.ease_factor, quality);

    if quality >= PASSING_QUALITY {
        next.correct_count += 1;
        next.interval = match next.repetitions {
            // First successful review: 1 day
            0 => 1,
            // Second: 3 days
            1 => 3,
            // Subsequent reviews: multiply by ease factor
            _ => (next.interval as f32 * next.ease_factor)
                .round()
                .min(MAX_INTERVAL_DAYS as f32) as u32,
        };
        next.repetitions += 1;
    } else {
        // Lapse - restart the cadence
        next.repetitions = 0;
        next.interval = 1;
    }

    next.interval = next.interval.min(MAX_INTERVAL_DAYS);
    next.next_review = now
        .checked_add_signed(Duration::days(next.interval as i64))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    next.mastery = calculate_mastery(
        next.correct_count,
        next.total_seen,
        next.interval,
        next.repetitions,
    );

    next
}

/// Keys of the words due for review, most overdue first
///
/// Records carry no creation order, so equally overdue words come in key
/// order (`language:word`, alphabetical).
pub fn get_words_for_review(records: &ProgressMap, limit: usize, now: DateTime<Utc>) -> Vec<String> {
    let mut due: Vec<(&String, &WordProgress)> = records
        .iter()
        .filter(|(_, record)| record.is_due(now))
        .collect();

    due.sort_by(|a, b| {
        a.1.next_review
            .cmp(&b.1.next_review)
            .then_with(|| a.0.cmp(b.0))
    });

    due.into_iter()
        .take(limit)
        .map(|(key, _)| key.clone())
        .collect()
}

/// Format an interval in days to a human-readable string
pub fn format_interval(days: u32) -> String {
    if days == 0 {
        "now".to_string()
    } else if days < 7 {
        format!("{}d", days)
    } else if days < 30 {
        format!("{}w", days / 7)
    } else if days < 365 {
        format!("{}mo", days / 30)
    } else {
        format!("{}y", days / 365)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::models::progress_key;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_interaction_scores() {
        assert_eq!(score_interaction(InteractionKind::Hover), 3);
        assert_eq!(score_interaction(InteractionKind::Context), 3);
        assert_eq!(score_interaction(InteractionKind::Pronunciation), 4);
        assert_eq!(score_interaction(InteractionKind::Ignored), 5);
        assert_eq!(score_interaction(InteractionKind::Clicked), 5);
    }

    #[test]
    fn test_first_review_hover() {
        let now = Utc::now();
        let record = WordProgress::new(now);

        let next = calculate_next_review(&record, score_interaction(InteractionKind::Hover), now);

        assert_eq!(next.interval, 1);
        assert_eq!(next.repetitions, 1);
        assert_eq!(next.total_seen, 1);
        assert_eq!(next.correct_count, 1);
        // 100 * (0.4 * 1 + 0.3 * 1/30 + 0.3 * 1/5) = 47
        assert_eq!(next.mastery, 47);
        assert_eq!(next.next_review, now + Duration::days(1));
        assert!(approx(next.ease_factor, 2.36));
    }

    #[test]
    fn test_house_review_sequence() {
        let now = Utc::now();
        let first = calculate_next_review(&WordProgress::new(now), 3, now);

        let second = calculate_next_review(&first, score_interaction(InteractionKind::Clicked), now);
        assert_eq!(second.interval, 3);
        assert_eq!(second.repetitions, 2);
        assert!(approx(second.ease_factor, 2.46));

        let third = calculate_next_review(&second, score_interaction(InteractionKind::Hover), now);
        // 3 * 2.32 = 6.96
        assert!(approx(third.ease_factor, 2.32));
        assert_eq!(third.interval, 7);
        assert_eq!(third.repetitions, 3);

        let lapse = calculate_next_review(&third, 2, now);
        assert_eq!(lapse.repetitions, 0);
        assert_eq!(lapse.interval, 1);
        assert_eq!(lapse.correct_count, 3);
        assert_eq!(lapse.total_seen, 4);
    }

    #[test]
    fn test_lapse_resets_regardless_of_history() {
        let now = Utc::now();
        let mut record = WordProgress::new(now);
        record.repetitions = 12;
        record.interval = 180;
        record.total_seen = 12;
        record.correct_count = 12;

        for quality in 0..PASSING_QUALITY {
            let next = calculate_next_review(&record, quality, now);
            assert_eq!(next.repetitions, 0);
            assert_eq!(next.interval, 1);
            assert_eq!(next.next_review, now + Duration::days(1));
        }
    }

    #[test]
    fn test_first_encounter_failure_is_not_special() {
        let now = Utc::now();
        let next = calculate_next_review(&WordProgress::new(now), 1, now);
        assert_eq!(next.interval, 1);
        assert_eq!(next.repetitions, 0);
        assert_eq!(next.correct_count, 0);
    }

    #[test]
    fn test_ease_factor_floor() {
        let now = Utc::now();
        let mut record = WordProgress::new(now);

        // Any mix of ratings keeps the floor
        let ratings = [0u8, 1, 0, 2, 5, 0, 0, 3, 1, 0, 4, 0, 0, 0, 2, 0];
        for quality in ratings.iter().cycle().take(200) {
            record = calculate_next_review(&record, *quality, now);
            assert!(record.ease_factor >= MIN_EASE_FACTOR);
        }
        assert!(approx(next_ease_factor(MIN_EASE_FACTOR, 0), MIN_EASE_FACTOR));
    }

    #[test]
    fn test_mastery_bounds() {
        assert_eq!(calculate_mastery(0, 0, 0, 0), 0);
        assert_eq!(calculate_mastery(0, 10, 0, 0), 0);
        assert_eq!(calculate_mastery(50, 50, 400, 40), 100);

        let now = Utc::now();
        let mut record = WordProgress::new(now);
        for quality in [5u8, 5, 5, 5, 5, 5, 5, 5, 0, 5, 4, 3] {
            record = calculate_next_review(&record, quality, now);
            assert!(record.mastery <= 100);
        }
    }

    #[test]
    fn test_inconsistent_record_restarts() {
        let now = Utc::now();
        let mut record = WordProgress::new(now);
        record.total_seen = 2;
        record.correct_count = 9;
        record.repetitions = 4;
        record.interval = 40;
        record.interactions.hover = 3;

        let next = calculate_next_review(&record, 5, now);
        assert_eq!(next.total_seen, 1);
        assert_eq!(next.correct_count, 1);
        assert_eq!(next.interval, 1);
        assert_eq!(next.interactions.hover, 3);
    }

    #[test]
    fn test_words_for_review_most_overdue_first() {
        let now = Utc::now();
        let mut records = ProgressMap::new();

        let mut make = |word: &str, days_ago: i64| {
            let mut record = WordProgress::new(now - Duration::days(days_ago + 1));
            record.next_review = now - Duration::days(days_ago);
            records.insert(progress_key("es", word), record);
        };
        make("uno", 1);
        make("dos", 10);
        make("tres", 5);
        make("futuro", -3);

        let due = get_words_for_review(&records, 10, now);
        assert_eq!(due, vec!["es:dos", "es:tres", "es:uno"]);

        let limited = get_words_for_review(&records, 2, now);
        assert_eq!(limited, vec!["es:dos", "es:tres"]);
    }

    #[test]
    fn test_equally_overdue_words_in_key_order() {
        let now = Utc::now();
        let due_at = now - Duration::days(4);
        let mut records = ProgressMap::new();

        for word in ["zorro", "abeja", "mesa"] {
            let mut record = WordProgress::new(due_at - Duration::days(1));
            record.next_review = due_at;
            records.insert(progress_key("es", word), record);
        }
        let mut older = WordProgress::new(now - Duration::days(9));
        older.next_review = now - Duration::days(8);
        records.insert(progress_key("es", "tarde"), older);

        let due = get_words_for_review(&records, 10, now);
        assert_eq!(due, vec!["es:tarde", "es:abeja", "es:mesa", "es:zorro"]);
    }

    #[test]
    fn test_long_run_of_easy_reviews_stays_in_range() {
        let now = Utc::now();
        let mut record = WordProgress::new(now);

        for _ in 0..100 {
            record = calculate_next_review(&record, 5, now);
            assert!(record.interval <= MAX_INTERVAL_DAYS);
            assert!(record.next_review >= record.last_seen);
            assert!(record.mastery <= 100);
        }
        assert_eq!(record.interval, MAX_INTERVAL_DAYS);
        assert_eq!(record.next_review, now + Duration::days(MAX_INTERVAL_DAYS as i64));
        assert_eq!(record.repetitions, 100);
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(0), "now");
        assert_eq!(format_interval(1), "1d");
        assert_eq!(format_interval(14), "2w");
        assert_eq!(format_interval(90), "3mo");
        assert_eq!(format_interval(730), "2y");
    }
}
