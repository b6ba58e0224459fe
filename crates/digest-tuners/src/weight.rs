//! `UpdateAutoWeights` (design §4.8): a per-channel importance multiplier
//! derived from a rolling 30-day activity statistic.

use digest_core::math::clamp;
use digest_store::types::ChannelStats;

/// Tuning knobs for [`compute_weight`], taken from [`digest_core::Config`].
#[derive(Debug, Clone, Copy)]
pub struct WeightTuning {
    pub min_messages: u64,
    pub expected_frequency: f64,
    pub auto_min: f64,
    pub auto_max: f64,
    pub days: u32,
}

/// Why a channel's weight was left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightRejection {
    BelowUpdateThreshold,
}

/// Computes the new weight for one channel, or the reason it was rejected.
///
/// `messages < min_messages` falls back to the neutral `1.0` weight,
/// itself still subject to the `0.05` update-threshold check against
/// `current_weight`.
#[must_use]
pub fn compute_weight(
    stats: ChannelStats,
    current_weight: f64,
    tuning: WeightTuning,
) -> Result<f64, WeightRejection> {
    if stats.messages < tuning.min_messages {
        return reject_or_update(1.0, current_weight);
    }

    let inclusion = if stats.items_created == 0 {
        0.0
    } else {
        stats.items_digested as f64 / stats.items_created.max(1) as f64
    };
    let importance = if stats.items_digested == 0 {
        0.5
    } else {
        stats.avg_importance
    };
    let consistency = if tuning.expected_frequency > 0.0 {
        let per_day = stats.messages as f64 / f64::from(tuning.days).max(1.0);
        (per_day / tuning.expected_frequency).min(1.0)
    } else {
        1.0
    };
    let signal = stats.items_created as f64 / stats.messages.max(1) as f64;

    let raw = 0.30 * inclusion + 0.35 * importance + 0.20 * consistency + 0.15 * signal;
    let weight = clamp(0.5 + raw, tuning.auto_min, tuning.auto_max);
    reject_or_update(weight, current_weight)
}

fn reject_or_update(new: f64, current: f64) -> Result<f64, WeightRejection> {
    if (new - current).abs() >= 0.05 {
        Ok(new)
    } else {
        Err(WeightRejection::BelowUpdateThreshold)
    }
}
