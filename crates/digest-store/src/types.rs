//! Request/response types for [`crate::Store`] that don't belong on the
//! shared data model itself (they're store-call shapes, not persisted rows).

use chrono::{DateTime, Utc};
use digest_core::model::{ChannelId, ItemStatus};

/// Input to [`crate::Store::upsert_raw_message`].
#[derive(Debug, Clone)]
pub struct NewRawMessage {
    pub channel_id: ChannelId,
    pub source_msg_id: i64,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub media: Option<Vec<u8>>,
    pub canonical_hash: String,
    pub is_forward: bool,
}

/// Input to [`crate::Store::save_item`]: a successful scoring result to
/// persist (and, for a retry, to supersede the previous attempt with).
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub raw_message_id: digest_core::model::RawMessageId,
    pub channel_id: ChannelId,
    pub relevance_score: f64,
    pub importance_score: f64,
    pub topic: String,
    pub summary: String,
    pub language: String,
    pub status: ItemStatus,
    pub embedding: Option<Vec<f32>>,
}

/// Per-channel rolling statistics used by [`crate::Store::channel_stats`]
/// and the weight tuner (design §4.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelStats {
    pub messages: u64,
    pub items_created: u64,
    pub items_digested: u64,
    pub avg_importance: f64,
}

/// Decayed item-rating aggregate for one channel or the whole corpus
/// (design §4.8): ratings weighted by `exp(-age_days * ln2 / half_life)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecayedRatings {
    pub weighted_good: f64,
    pub weighted_bad: f64,
    pub weighted_irrelevant: f64,
    pub weighted_total: f64,
}

/// Per-channel score statistics over a trailing window, used by the
/// pipeline's optional normalization step (design §4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreStats {
    pub relevance_mean: f64,
    pub relevance_stddev: f64,
    pub importance_mean: f64,
    pub importance_stddev: f64,
}

impl DecayedRatings {
    /// `(good - bad - irrelevant) / total`, `0.0` when there is no data.
    #[must_use]
    pub fn net(&self) -> f64 {
        if self.weighted_total <= 0.0 {
            return 0.0;
        }
        (self.weighted_good - self.weighted_bad - self.weighted_irrelevant) / self.weighted_total
    }

    /// `weighted_good / weighted_total`, `0.0` when there is no data.
    #[must_use]
    pub fn reliability(&self) -> f64 {
        if self.weighted_total <= 0.0 {
            return 0.0;
        }
        self.weighted_good / self.weighted_total
    }
}
