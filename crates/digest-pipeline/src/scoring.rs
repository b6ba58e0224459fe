//! Phase F scoring math (design §4.4): final importance, the "unique-info"
//! penalty, and the effective relevance threshold.

use digest_core::math::clamp;

/// A crude heuristic for whether a summary carries concrete, checkable
/// content: does it mention a name (a capitalized word past the first),
/// a number, or something that looks like a date/month?
#[must_use]
pub fn has_unique_info(summary: &str) -> bool {
    has_number(summary) || has_capitalized_word(summary) || has_date_token(summary)
}

fn has_number(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

fn has_capitalized_word(text: &str) -> bool {
    text.split_whitespace()
        .skip(1) // the first word is capitalized by ordinary sentence casing
        .any(|w| w.chars().next().is_some_and(char::is_uppercase))
}

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

fn has_date_token(text: &str) -> bool {
    let folded = text.to_lowercase();
    MONTHS.iter().any(|m| folded.contains(m))
}

/// `clamp(raw_importance * clamp(channel_weight, 0.1, 2.0), 0, 1)`, then
/// subtract 0.2 (floored at 0) if the summary lacks unique info.
#[must_use]
pub fn final_importance(raw_importance: f64, channel_weight: f64, summary: &str) -> f64 {
    let weighted = clamp(raw_importance * clamp(channel_weight, 0.1, 2.0), 0.0, 1.0);
    if has_unique_info(summary) {
        weighted
    } else {
        (weighted - 0.2).max(0.0)
    }
}

/// `clamp(channel_threshold or global_threshold + (delta if auto_relevance_enabled else 0), 0, 1)`.
#[must_use]
pub fn effective_relevance_threshold(
    channel_threshold: Option<f64>,
    global_threshold: f64,
    relevance_delta: f64,
    auto_relevance_enabled: bool,
) -> f64 {
    let base = channel_threshold.unwrap_or_else(|| {
        global_threshold + if auto_relevance_enabled { relevance_delta } else { 0.0 }
    });
    clamp(base, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_info_detects_number_name_or_date() {
        assert!(has_unique_info("Released version 12 today"));
        assert!(has_unique_info("Satya Nadella announced it"));
        assert!(has_unique_info("Happening in January next year"));
        assert!(!has_unique_info("something happened recently"));
    }

    #[test]
    fn final_importance_applies_channel_weight_and_penalty() {
        assert!((final_importance(0.8, 1.0, "Released version 12") - 0.8).abs() < 1e-9);
        assert!((final_importance(0.8, 1.0, "something vague happened") - 0.6).abs() < 1e-9);
        // Channel weight is clamped into [0.1, 2.0].
        assert!((final_importance(0.5, 10.0, "version 2 released") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn final_importance_penalty_floors_at_zero() {
        assert_eq!(final_importance(0.1, 1.0, "vague text here"), 0.0);
    }

    #[test]
    fn effective_threshold_prefers_channel_override() {
        assert_eq!(effective_relevance_threshold(Some(0.4), 0.5, 0.1, true), 0.4);
    }

    #[test]
    fn effective_threshold_applies_delta_only_when_auto_relevance_enabled() {
        assert_eq!(effective_relevance_threshold(None, 0.5, 0.1, true), 0.6);
        assert_eq!(effective_relevance_threshold(None, 0.5, 0.1, false), 0.5);
    }

    #[test]
    fn effective_threshold_is_clamped() {
        assert_eq!(effective_relevance_threshold(None, 0.95, 0.2, true), 1.0);
    }
}
