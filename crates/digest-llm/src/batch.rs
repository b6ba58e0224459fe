//! `ProcessBatch` index alignment (design §4.2).
//!
//! The gateway must return one result per input message, but a misbehaving
//! or truncated LLM response can't always be trusted to do that directly.
//! Three stages, in order: align by the result's own `index` field; if
//! every result claims index 0 (the model echoed nothing useful), fall
//! back to matching by echoed `source_channel`; otherwise assume the
//! results are already in positional order.

use std::collections::HashMap;

/// One input message sent to the LLM as part of a batch.
#[derive(Debug, Clone)]
pub struct BatchMessage {
    pub source_channel: String,
    pub text: String,
    pub has_media: bool,
}

/// One scored result as returned by the LLM provider, prior to alignment.
#[derive(Debug, Clone)]
pub struct RawBatchResult {
    pub index: usize,
    pub source_channel: String,
    pub relevance_score: f64,
    pub importance_score: f64,
    pub topic: String,
    pub summary: String,
    pub language: String,
}

impl RawBatchResult {
    /// A result with an empty summary is treated as a failed score.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.summary.trim().is_empty()
    }
}

/// Aligns `results` to `inputs`, returning exactly `inputs.len()` slots;
/// a slot is `None` when no result could be matched to that input.
#[must_use]
pub fn align(inputs: &[BatchMessage], results: &[RawBatchResult]) -> Vec<Option<RawBatchResult>> {
    if let Some(aligned) = align_by_index(inputs, results) {
        return aligned;
    }
    if results.iter().all(|r| r.index == 0) {
        if let Some(aligned) = align_by_source_channel(inputs, results) {
            return aligned;
        }
    }
    align_positionally(inputs, results)
}

/// Stage 1: every result has a distinct, in-range index. Anything else
/// (duplicate or out-of-range indices) falls through to the next stage.
fn align_by_index(
    inputs: &[BatchMessage],
    results: &[RawBatchResult],
) -> Option<Vec<Option<RawBatchResult>>> {
    if results.is_empty() || results.iter().all(|r| r.index == 0) {
        return None;
    }
    let mut slots: Vec<Option<RawBatchResult>> = vec![None; inputs.len()];
    let mut seen = std::collections::HashSet::new();
    for result in results {
        if result.index >= inputs.len() || !seen.insert(result.index) {
            return None;
        }
        slots[result.index] = Some(result.clone());
    }
    Some(slots)
}

/// Stage 2: match by echoed `source_channel`, requiring over half the
/// inputs to find a match. Ties among results with the same channel are
/// broken by order (first unclaimed result of that channel goes to the
/// first unclaimed input of that channel).
fn align_by_source_channel(
    inputs: &[BatchMessage],
    results: &[RawBatchResult],
) -> Option<Vec<Option<RawBatchResult>>> {
    let mut by_channel: HashMap<&str, Vec<&RawBatchResult>> = HashMap::new();
    for result in results {
        by_channel
            .entry(result.source_channel.as_str())
            .or_default()
            .push(result);
    }

    let mut slots: Vec<Option<RawBatchResult>> = vec![None; inputs.len()];
    let mut matched = 0usize;
    for (i, input) in inputs.iter().enumerate() {
        if let Some(bucket) = by_channel.get_mut(input.source_channel.as_str()) {
            if !bucket.is_empty() {
                slots[i] = Some(bucket.remove(0).clone());
                matched += 1;
            }
        }
    }

    if matched * 2 > inputs.len() {
        Some(slots)
    } else {
        None
    }
}

/// Stage 3: assume the provider preserved input order.
fn align_positionally(
    inputs: &[BatchMessage],
    results: &[RawBatchResult],
) -> Vec<Option<RawBatchResult>> {
    (0..inputs.len())
        .map(|i| results.get(i).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(channel: &str) -> BatchMessage {
        BatchMessage {
            source_channel: channel.to_string(),
            text: "x".to_string(),
            has_media: false,
        }
    }

    fn result(index: usize, channel: &str) -> RawBatchResult {
        RawBatchResult {
            index,
            source_channel: channel.to_string(),
            relevance_score: 0.5,
            importance_score: 0.5,
            topic: "t".to_string(),
            summary: "s".to_string(),
            language: "en".to_string(),
        }
    }

    #[test]
    fn aligns_by_explicit_index() {
        let inputs = vec![msg("a"), msg("b"), msg("c")];
        let results = vec![result(2, "c"), result(0, "a"), result(1, "b")];
        let aligned = align(&inputs, &results);
        assert_eq!(aligned[0].as_ref().unwrap().source_channel, "a");
        assert_eq!(aligned[1].as_ref().unwrap().source_channel, "b");
        assert_eq!(aligned[2].as_ref().unwrap().source_channel, "c");
    }

    #[test]
    fn falls_back_to_source_channel_when_all_indices_zero() {
        let inputs = vec![msg("a"), msg("b"), msg("c")];
        let results = vec![result(0, "c"), result(0, "a"), result(0, "b")];
        let aligned = align(&inputs, &results);
        assert_eq!(aligned[0].as_ref().unwrap().source_channel, "a");
        assert_eq!(aligned[1].as_ref().unwrap().source_channel, "b");
        assert_eq!(aligned[2].as_ref().unwrap().source_channel, "c");
    }

    #[test]
    fn falls_back_to_positional_when_channel_match_is_weak() {
        let inputs = vec![msg("a"), msg("b"), msg("c"), msg("d")];
        // Only one of four channels matches -> below the 50% bar.
        let results = vec![
            result(0, "zzz"),
            result(0, "b"),
            result(0, "zzz"),
            result(0, "zzz"),
        ];
        let aligned = align(&inputs, &results);
        assert_eq!(aligned[0].as_ref().unwrap().source_channel, "zzz");
        assert_eq!(aligned[1].as_ref().unwrap().source_channel, "b");
    }

    #[test]
    fn duplicate_indices_fall_through_to_later_stages() {
        let inputs = vec![msg("a"), msg("b")];
        let results = vec![result(0, "a"), result(0, "a")];
        let aligned = align(&inputs, &results);
        // Channel match: only "a" matches (1 of 2 = not >50%), falls to positional.
        assert_eq!(aligned[0].as_ref().unwrap().source_channel, "a");
        assert_eq!(aligned[1].as_ref().unwrap().source_channel, "a");
    }
}
