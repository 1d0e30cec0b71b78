//! Data models for daily usage quotas

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Words translatable per day on the free tier
pub const DAILY_WORDS: u32 = 100;

/// Explanations viewable per day on the free tier
pub const DAILY_EXPLANATIONS: u32 = 10;

/// Usage counters of one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: NaiveDate,
    #[serde(default)]
    pub words_translated: u32,
    #[serde(default)]
    pub explanations_viewed: u32,
    /// Plus tier, unlimited usage; survives the daily reset
    #[serde(default)]
    pub is_plus: bool,
}

impl DailyUsage {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            words_translated: 0,
            explanations_viewed: 0,
            is_plus: false,
        }
    }

    /// Counters as seen on `today`: zeroed when recorded on another day
    pub fn as_of(&self, today: NaiveDate) -> Self {
        if self.date == today {
            self.clone()
        } else {
            Self {
                is_plus: self.is_plus,
                ..Self::new(today)
            }
        }
    }
}

/// Free-tier daily limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaLimits {
    pub daily_words: u32,
    pub daily_explanations: u32,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            daily_words: DAILY_WORDS,
            daily_explanations: DAILY_EXPLANATIONS,
        }
    }
}

/// Outcome of a quota check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Units left today; `None` when unlimited
    pub remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl QuotaDecision {
    pub fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: None,
            message: None,
        }
    }

    /// Check a request of `requested` units against `used` of `limit`
    pub fn evaluate(requested: u32, used: u32, limit: u32, what: &str) -> Self {
        let remaining = limit.saturating_sub(used);
        if requested <= remaining {
            Self {
                allowed: true,
                remaining: Some(remaining),
                message: None,
            }
        } else {
            Self {
                allowed: false,
                remaining: Some(remaining),
                message: Some(format!(
                    "Daily limit of {} {} reached ({} left today). Upgrade to Plus for unlimited use.",
                    limit, what, remaining
                )),
            }
        }
    }

    /// Denial used when today's usage cannot be determined
    pub fn unavailable() -> Self {
        Self {
            allowed: false,
            remaining: Some(0),
            message: Some("Usage data is unavailable, try again shortly.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_of_resets_counters_but_keeps_plus() {
        let yesterday = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let usage = DailyUsage {
            date: yesterday,
            words_translated: 80,
            explanations_viewed: 4,
            is_plus: true,
        };

        let current = usage.as_of(today);
        assert_eq!(current.date, today);
        assert_eq!(current.words_translated, 0);
        assert_eq!(current.explanations_viewed, 0);
        assert!(current.is_plus);

        assert_eq!(usage.as_of(yesterday), usage);
    }

    #[test]
    fn test_evaluate_boundary() {
        let allowed = QuotaDecision::evaluate(1, 99, 100, "words");
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, Some(1));

        let denied = QuotaDecision::evaluate(2, 99, 100, "words");
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, Some(1));
        assert!(denied.message.is_some());

        // Over-recorded counters never underflow
        assert_eq!(QuotaDecision::evaluate(0, 150, 100, "words").remaining, Some(0));
    }

    #[test]
    fn test_usage_json_shape() {
        let usage = DailyUsage::new(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        let json = serde_json::to_value(&usage).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "date": "2026-10-18",
                "wordsTranslated": 0,
                "explanationsViewed": 0,
                "isPlus": false
            })
        );
    }
}
