//! `UpdateGlobalThresholds` (design §4.8): a slow step on the two global
//! gates, driven by the corpus-wide net rating signal.

use digest_core::math::clamp;

#[derive(Debug, Clone, Copy)]
pub struct ThresholdTuning {
    pub net_positive: f64,
    pub net_negative: f64,
    pub step: f64,
    pub min: f64,
    pub max: f64,
}

/// The direction global thresholds moved, or why they didn't.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdRejection {
    NeutralBand,
}

/// `net > net_positive` raises the bar (`-step`); `net < net_negative`
/// loosens it (`+step`); otherwise the neutral band leaves both
/// thresholds untouched.
pub fn compute_thresholds(
    net: f64,
    relevance_threshold: f64,
    importance_threshold: f64,
    tuning: ThresholdTuning,
) -> Result<(f64, f64), ThresholdRejection> {
    let step = if net > tuning.net_positive {
        -tuning.step
    } else if net < tuning.net_negative {
        tuning.step
    } else {
        return Err(ThresholdRejection::NeutralBand);
    };

    Ok((
        clamp(relevance_threshold + step, tuning.min, tuning.max),
        clamp(importance_threshold + step, tuning.min, tuning.max),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning() -> ThresholdTuning {
        ThresholdTuning {
            net_positive: 0.20,
            net_negative: -0.20,
            step: 0.02,
            min: 0.0,
            max: 1.0,
        }
    }

    #[test]
    fn strongly_positive_net_raises_the_bar() {
        let (relevance, importance) = compute_thresholds(0.5, 0.5, 0.3, tuning()).unwrap();
        assert!((relevance - 0.48).abs() < 1e-9);
        assert!((importance - 0.28).abs() < 1e-9);
    }

    #[test]
    fn strongly_negative_net_loosens_the_bar() {
        let (relevance, importance) = compute_thresholds(-0.5, 0.5, 0.3, tuning()).unwrap();
        assert!((relevance - 0.52).abs() < 1e-9);
        assert!((importance - 0.32).abs() < 1e-9);
    }

    #[test]
    fn neutral_band_leaves_thresholds_unchanged() {
        assert_eq!(
            compute_thresholds(0.0, 0.5, 0.3, tuning()),
            Err(ThresholdRejection::NeutralBand)
        );
    }

    #[test]
    fn step_is_clamped_at_bounds() {
        let (relevance, _) = compute_thresholds(-0.9, 0.99, 0.5, tuning()).unwrap();
        assert_eq!(relevance, 1.0);
    }
}
