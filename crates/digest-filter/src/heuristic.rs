//! The cheap, stateless admission gate (design §4.3 / §4.4 Phase A).

use digest_core::model::{Filter, FilterType};
use regex::RegexBuilder;

/// Allow/deny pattern evaluation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Denylist,
    Allowlist,
    Mixed,
}

impl FilterMode {
    /// Parses a configured mode name, defaulting to [`FilterMode::Denylist`]
    /// for anything unrecognized.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "allowlist" => FilterMode::Allowlist,
            "mixed" => FilterMode::Mixed,
            _ => FilterMode::Denylist,
        }
    }
}

/// Configuration for [`admit`].
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub min_length: usize,
    pub ads_filter_enabled: bool,
    pub ads_keywords: Vec<String>,
    pub skip_forwards: bool,
    pub mode: FilterMode,
    pub filters: Vec<Filter>,
}

/// Why a message was rejected by the heuristic gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    TooShort,
    AdsKeyword,
    Forwarded,
    DenyPatternMatched,
    NoAllowPatternMatched,
}

/// Evaluates the length/ads/forward/allow-deny gate. `Ok(())` admits the
/// message; `Err` carries the first rule that rejected it.
pub fn admit(text: &str, is_forward: bool, config: &FilterConfig) -> Result<(), Rejection> {
    if text.chars().count() < config.min_length {
        return Err(Rejection::TooShort);
    }
    if config.skip_forwards && is_forward {
        return Err(Rejection::Forwarded);
    }
    let folded = text.to_lowercase();
    if config.ads_filter_enabled
        && config
            .ads_keywords
            .iter()
            .any(|kw| folded.contains(&kw.to_lowercase()))
    {
        return Err(Rejection::AdsKeyword);
    }

    let (allow, deny): (Vec<&Filter>, Vec<&Filter>) = config
        .filters
        .iter()
        .filter(|f| f.active)
        .partition(|f| f.filter_type == FilterType::Allow);

    let pattern_match = |patterns: &[&Filter]| patterns.iter().any(|f| matches_pattern(text, &f.pattern));

    match config.mode {
        FilterMode::Denylist => {
            if pattern_match(&deny) {
                return Err(Rejection::DenyPatternMatched);
            }
        }
        FilterMode::Allowlist => {
            if !allow.is_empty() && !pattern_match(&allow) {
                return Err(Rejection::NoAllowPatternMatched);
            }
        }
        FilterMode::Mixed => {
            if pattern_match(&deny) {
                return Err(Rejection::DenyPatternMatched);
            }
            if !allow.is_empty() && !pattern_match(&allow) {
                return Err(Rejection::NoAllowPatternMatched);
            }
        }
    }

    Ok(())
}

/// Matches `pattern` against `text` as a case-insensitive regex; falls back
/// to a case-folded substring match if the configured pattern doesn't
/// compile as a regex, so a literal keyword like `buy now` still works.
fn matches_pattern(text: &str, pattern: &str) -> bool {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(re) => re.is_match(text),
        Err(_) => text.to_lowercase().contains(&pattern.to_lowercase()),
    }
}

/// The optional heuristic "relevance gate" from Phase A: skip messages
/// that are empty, link-only, or contain no alphanumeric text, recording a
/// decision and confidence for later analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelevanceGateDecision {
    pub skip: bool,
    pub confidence: u8,
    pub reason: &'static str,
}

/// Heuristically decides whether a message is worth sending to the LLM at
/// all. This is separate from [`admit`], which is a hard filter; this gate
/// is advisory (design: "skip with a recorded decision + confidence +
/// reason for later analysis").
#[must_use]
pub fn relevance_gate(text: &str) -> RelevanceGateDecision {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return RelevanceGateDecision {
            skip: true,
            confidence: 100,
            reason: "empty",
        };
    }
    if !trimmed.chars().any(char::is_alphanumeric) {
        return RelevanceGateDecision {
            skip: true,
            confidence: 95,
            reason: "no_alphanumeric",
        };
    }
    let words: Vec<&str> = trimmed.split_whitespace().collect();
    let link_only = !words.is_empty()
        && words
            .iter()
            .all(|w| w.starts_with("http://") || w.starts_with("https://"));
    if link_only {
        return RelevanceGateDecision {
            skip: true,
            confidence: 80,
            reason: "link_only",
        };
    }
    RelevanceGateDecision {
        skip: false,
        confidence: 0,
        reason: "admitted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn filter(filter_type: FilterType, pattern: &str) -> Filter {
        Filter {
            id: Uuid::new_v4(),
            filter_type,
            pattern: pattern.to_string(),
            active: true,
        }
    }

    fn base_config(mode: FilterMode, filters: Vec<Filter>) -> FilterConfig {
        FilterConfig {
            min_length: 5,
            ads_filter_enabled: true,
            ads_keywords: vec!["buy now".to_string()],
            skip_forwards: false,
            mode,
            filters,
        }
    }

    #[test]
    fn rejects_too_short() {
        let config = base_config(FilterMode::Denylist, vec![]);
        assert_eq!(admit("hi", false, &config), Err(Rejection::TooShort));
    }

    #[test]
    fn rejects_ads_keyword_case_folded() {
        let config = base_config(FilterMode::Denylist, vec![]);
        assert_eq!(
            admit("BUY NOW and save", false, &config),
            Err(Rejection::AdsKeyword)
        );
    }

    #[test]
    fn denylist_mode_rejects_on_deny_match() {
        let config = base_config(FilterMode::Denylist, vec![filter(FilterType::Deny, "spam")]);
        assert_eq!(
            admit("this is Spam content", false, &config),
            Err(Rejection::DenyPatternMatched)
        );
    }

    #[test]
    fn allowlist_mode_requires_a_match_when_patterns_exist() {
        let config = base_config(
            FilterMode::Allowlist,
            vec![filter(FilterType::Allow, "rust")],
        );
        assert_eq!(
            admit("talking about golang today", false, &config),
            Err(Rejection::NoAllowPatternMatched)
        );
        assert_eq!(admit("talking about Rust today", false, &config), Ok(()));
    }

    #[test]
    fn mixed_mode_applies_both_rules() {
        let config = base_config(
            FilterMode::Mixed,
            vec![
                filter(FilterType::Allow, "rust"),
                filter(FilterType::Deny, "spam"),
            ],
        );
        assert_eq!(
            admit("rust is great but this is spam", false, &config),
            Err(Rejection::DenyPatternMatched)
        );
        assert_eq!(
            admit("golang content only", false, &config),
            Err(Rejection::NoAllowPatternMatched)
        );
    }

    #[test]
    fn skip_forwards_when_enabled() {
        let mut config = base_config(FilterMode::Denylist, vec![]);
        config.skip_forwards = true;
        assert_eq!(admit("a real message", true, &config), Err(Rejection::Forwarded));
        assert_eq!(admit("a real message", false, &config), Ok(()));
    }

    #[test]
    fn deny_pattern_matches_as_regex() {
        let config = base_config(
            FilterMode::Denylist,
            vec![filter(FilterType::Deny, r"\bcrypto\w*\b")],
        );
        assert_eq!(
            admit("invest in cryptocurrency today", false, &config),
            Err(Rejection::DenyPatternMatched)
        );
        assert_eq!(admit("a real message about rust", false, &config), Ok(()));
    }

    #[test]
    fn invalid_pattern_falls_back_to_substring_match() {
        let config = base_config(FilterMode::Denylist, vec![filter(FilterType::Deny, "a[bc")]);
        assert_eq!(
            admit("this contains a[bc literally", false, &config),
            Err(Rejection::DenyPatternMatched)
        );
    }

    #[test]
    fn relevance_gate_flags_empty_link_only_and_non_alphanumeric() {
        assert!(relevance_gate("").skip);
        assert!(relevance_gate("   ").skip);
        assert!(relevance_gate("https://example.com").skip);
        assert!(relevance_gate("!!! *** ---").skip);
        assert!(!relevance_gate("Rust 1.80 released today").skip);
    }
}
