//! The three weekly adaptive-tuning jobs: per-channel importance weight,
//! per-channel relevance-threshold delta, and global thresholds (design
//! §4.8).

pub mod relevance;
pub mod runner;
pub mod thresholds;
pub mod weight;

pub use relevance::{compute_delta, RelevanceRejection, RelevanceTuning};
pub use runner::TunerRunner;
pub use thresholds::{compute_thresholds, ThresholdRejection, ThresholdTuning};
pub use weight::{compute_weight, WeightRejection, WeightTuning};
