//! Strict (canonical-hash) and semantic (cosine) duplicate detection
//! (design §4.3). The store performs the actual cross-batch lookups
//! (`has_strict_duplicate`, `find_similar_item`); this module holds the
//! pure math: the hash function and the within-batch comparison.

use sha2::{Digest, Sha256};

/// A stable digest of the message text, used as the strict-duplicate key.
/// Whitespace/punctuation normalization is intentionally out of scope here
/// (design §4.3); this only guarantees the same input always hashes the
/// same way.
#[must_use]
pub fn canonical_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compares a new candidate embedding against embeddings already accepted
/// earlier in the same batch, rejecting it if any pairing is at or above
/// `threshold` cosine similarity.
#[must_use]
pub fn is_within_batch_duplicate(
    candidate: &[f32],
    accepted: &[Vec<f32>],
    threshold: f64,
) -> bool {
    accepted
        .iter()
        .any(|existing| digest_core::math::cosine_similarity(candidate, existing) >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_hash_is_stable_for_equal_inputs() {
        assert_eq!(canonical_hash("hello world"), canonical_hash("hello world"));
        assert_ne!(canonical_hash("hello world"), canonical_hash("hello worlds"));
    }

    #[test]
    fn within_batch_duplicate_detects_near_identical_vectors() {
        let accepted = vec![vec![1.0, 0.0, 0.0]];
        let near_duplicate = vec![0.99, 0.01, 0.0];
        assert!(is_within_batch_duplicate(&near_duplicate, &accepted, 0.9));
        let distinct = vec![0.0, 1.0, 0.0];
        assert!(!is_within_batch_duplicate(&distinct, &accepted, 0.9));
    }
}
