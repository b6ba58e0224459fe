//! Optional per-channel score normalization (design §4.4).
//!
//! Rescales a raw score to a z-score when the channel has enough history
//! to make `stddev` meaningful. Per design §9, this intentionally breaks
//! the `[0,1]` invariant when enabled; callers decide whether to clamp
//! post-hoc.

use digest_store::types::ScoreStats;

/// `x -> (x - mean) / stddev` when `stddev > 0.01`, otherwise `x` unchanged.
#[must_use]
pub fn normalize(x: f64, mean: f64, stddev: f64) -> f64 {
    if stddev > 0.01 {
        (x - mean) / stddev
    } else {
        x
    }
}

/// Normalizes both scores against the channel's trailing statistics.
#[must_use]
pub fn normalize_scores(relevance: f64, importance: f64, stats: &ScoreStats) -> (f64, f64) {
    (
        normalize(relevance, stats.relevance_mean, stats.relevance_stddev),
        normalize(importance, stats.importance_mean, stats.importance_stddev),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_score_unchanged_when_stddev_too_small() {
        assert_eq!(normalize(0.5, 0.5, 0.0), 0.5);
        assert_eq!(normalize(0.5, 0.5, 0.005), 0.5);
    }

    #[test]
    fn rescales_to_z_score_when_stddev_meaningful() {
        let z = normalize(0.7, 0.5, 0.1);
        assert!((z - 2.0).abs() < 1e-9);
    }
}
