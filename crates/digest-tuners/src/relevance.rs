//! `UpdateAutoRelevance` (design §4.8): per-channel relevance-threshold
//! delta derived from decayed item ratings.

use digest_core::math::clamp;
use digest_store::types::DecayedRatings;

/// Tuning knobs for [`compute_delta`].
#[derive(Debug, Clone, Copy)]
pub struct RelevanceTuning {
    pub min_global: f64,
    pub min_channel: f64,
}

/// Why a channel's relevance delta was left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevanceRejection {
    /// Total weighted ratings across the whole corpus are below
    /// `min_global`: no channel is updated this run.
    InsufficientGlobalSample,
    /// This channel has fewer than `min_channel` weighted ratings.
    InsufficientChannelSample,
    BelowUpdateThreshold,
}

/// `delta = clamp((1 - reliability) * 0.2, 0, 0.2)`, gated by the global
/// and per-channel sample-size floors, and only applied if it moves by at
/// least `0.01` from `current_delta`. When data is insufficient and
/// `current_delta` is already non-zero, resets it to `0.0`.
pub fn compute_delta(
    global: DecayedRatings,
    channel: DecayedRatings,
    current_delta: f64,
    tuning: RelevanceTuning,
) -> Result<f64, RelevanceRejection> {
    if global.weighted_total < tuning.min_global {
        return reset_or_reject(current_delta, RelevanceRejection::InsufficientGlobalSample);
    }
    if channel.weighted_total < tuning.min_channel {
        return reset_or_reject(current_delta, RelevanceRejection::InsufficientChannelSample);
    }

    let delta = clamp((1.0 - channel.reliability()) * 0.2, 0.0, 0.2);
    if (delta - current_delta).abs() >= 0.01 {
        Ok(delta)
    } else {
        Err(RelevanceRejection::BelowUpdateThreshold)
    }
}

fn reset_or_reject(current_delta: f64, reason: RelevanceRejection) -> Result<f64, RelevanceRejection> {
    if current_delta != 0.0 {
        Ok(0.0)
    } else {
        Err(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> RelevanceTuning {
        RelevanceTuning {
            min_global: 20.0,
            min_channel: 5.0,
        }
    }

    #[test]
    fn insufficient_global_sample_resets_nonzero_delta() {
        let global = DecayedRatings {
            weighted_total: 5.0,
            ..Default::default()
        };
        let channel = DecayedRatings::default();
        assert_eq!(compute_delta(global, channel, 0.1, tuning()), Ok(0.0));
    }

    #[test]
    fn insufficient_global_sample_is_rejected_when_already_zero() {
        let global = DecayedRatings {
            weighted_total: 5.0,
            ..Default::default()
        };
        let channel = DecayedRatings::default();
        assert_eq!(
            compute_delta(global, channel, 0.0, tuning()),
            Err(RelevanceRejection::InsufficientGlobalSample)
        );
    }

    #[test]
    fn low_reliability_channel_gets_a_higher_delta() {
        let global = DecayedRatings {
            weighted_total: 100.0,
            weighted_good: 50.0,
            ..Default::default()
        };
        let channel = DecayedRatings {
            weighted_total: 10.0,
            weighted_good: 2.0,
            weighted_bad: 8.0,
            ..Default::default()
        };
        let delta = compute_delta(global, channel, 0.0, tuning()).unwrap();
        assert!(delta > 0.1);
    }

    #[test]
    fn high_reliability_channel_gets_a_near_zero_delta() {
        let global = DecayedRatings {
            weighted_total: 100.0,
            weighted_good: 90.0,
            ..Default::default()
        };
        let channel = DecayedRatings {
            weighted_total: 10.0,
            weighted_good: 10.0,
            ..Default::default()
        };
        let delta = compute_delta(global, channel, 0.5, tuning()).unwrap();
        assert!(delta < 0.05);
    }
}
