//! The narrow repository interface every pipeline/scheduler/tuner call goes
//! through (design §4.1).
//!
//! All methods fail with [`digest_core::Error`]; `Transient` causes the
//! caller to log and retry on its next tick, `NotFound` from optional paths
//! should be converted to a zero value by the caller rather than
//! propagated.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use digest_core::error::Result;
use digest_core::model::{
    Channel, ChannelId, Cluster, ClusterId, Digest, DigestEntry, DigestId, Filter, Item, ItemId,
    RawMessage, RawMessageId,
};
use serde_json::Value;

use crate::types::{ChannelStats, DecayedRatings, NewRawMessage, ScoreStats, ScoredItem};

/// A raw message joined with its embedding, as returned for a digest
/// window (design §4.1 `GetItemsForWindow`).
#[derive(Debug, Clone)]
pub struct ItemWithEmbedding {
    pub item: Item,
    pub embedding: Vec<f32>,
}

/// The full set of rows committed for one published digest (design
/// invariant 3: `digested_at` is set only in the same transaction that
/// records the Digest).
#[derive(Debug, Clone)]
pub struct DigestWrite {
    pub digest: Digest,
    pub entries: Vec<DigestEntry>,
    pub item_ids: Vec<ItemId>,
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts or updates a raw message, unique on `(channel_id, source_msg_id)`.
    async fn upsert_raw_message(&self, msg: NewRawMessage) -> Result<RawMessageId>;

    /// Unprocessed messages joined with channel metadata, ordered by
    /// source timestamp ascending, capped at `limit`.
    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<(RawMessage, Channel)>>;

    /// Looks up raw messages by id, for attributing a rendered digest
    /// entry back to its source (`channel_id`, `source_msg_id`) pairs.
    async fn get_raw_messages(&self, ids: &[RawMessageId]) -> Result<Vec<RawMessage>>;

    async fn get_active_channels(&self) -> Result<Vec<Channel>>;

    /// Active and inactive allow/deny patterns (design §3 `Filter`).
    async fn list_filters(&self) -> Result<Vec<Filter>>;

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>>;

    /// Persists a new auto-computed `importance_weight` (design §4.8
    /// `UpdateAutoWeights`). Callers must already have checked
    /// `weight_override`.
    async fn update_channel_weight(&self, channel_id: ChannelId, weight: f64) -> Result<()>;

    /// Persists a new auto-computed `relevance_threshold_delta` (design
    /// §4.8 `UpdateAutoRelevance`).
    async fn update_channel_relevance_delta(&self, channel_id: ChannelId, delta: f64) -> Result<()>;

    /// Marks a raw message as processed (terminal outcome recorded).
    async fn mark_processed(&self, id: RawMessageId) -> Result<()>;

    /// True if another non-error message shares `canonical_hash`, excluding
    /// `exclude` itself.
    async fn has_strict_duplicate(
        &self,
        channel_id: ChannelId,
        canonical_hash: &str,
        exclude: RawMessageId,
    ) -> Result<bool>;

    /// Nearest existing item within `(1 - threshold)` cosine distance,
    /// younger than `since`.
    async fn find_similar_item(
        &self,
        embedding: &[f32],
        threshold: f64,
        since: DateTime<Utc>,
    ) -> Result<Option<ItemId>>;

    /// Upserts by raw-message id. A successful rescore resets retry state.
    async fn save_item(&self, result: ScoredItem) -> Result<ItemId>;

    /// Records an `error` item, increments `retry_count`, and computes
    /// `next_retry_at = now + 2^retry_count minutes` (capped at 5 attempts).
    async fn save_item_error(&self, raw_message_id: RawMessageId, error_blob: &str) -> Result<()>;

    async fn mark_items_digested(&self, ids: &[ItemId]) -> Result<()>;

    /// Ready items joined with their embeddings where
    /// `importance_score >= coalesce(channel_threshold, param)` and
    /// `digested_at IS NULL`, ordered importance desc then relevance desc.
    async fn get_items_for_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        importance_threshold: f64,
        limit: usize,
    ) -> Result<Vec<ItemWithEmbedding>>;

    /// Total ready items created within the window, ignoring the
    /// importance threshold (used for empty-pool anomaly detection).
    async fn count_items_in_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64>;

    /// Count of unprocessed raw messages (used for backlog anomaly
    /// detection).
    async fn count_backlog(&self) -> Result<u64>;

    async fn create_cluster(&self, cluster: Cluster) -> Result<ClusterId>;
    async fn add_to_cluster(&self, cluster_id: ClusterId, item_id: ItemId) -> Result<()>;
    async fn delete_clusters_for_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()>;

    /// True when a posted digest exists for the window, or an error digest
    /// was recorded within the last hour (suppresses retry).
    async fn digest_exists(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool>;

    /// Commits the digest, its entries, and `MarkItemsAsDigested` in one
    /// transaction (invariant 3).
    async fn save_digest(&self, write: DigestWrite) -> Result<DigestId>;

    /// Records a failed posting attempt for the window (suppresses retry
    /// for one hour per `digest_exists`).
    async fn save_digest_error(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()>;

    /// Attempts a non-blocking advisory lock keyed by a stable hash of
    /// `lease_name`. Returns `false` rather than blocking on contention.
    async fn try_acquire_advisory_lock(&self, lease_name: &str) -> Result<bool>;
    async fn release_advisory_lock(&self, lease_name: &str) -> Result<()>;

    async fn get_setting(&self, key: &str) -> Result<Option<Value>>;
    /// Writes a setting, best-effort logging a before/after history entry.
    /// The primary write must not fail if the history write fails.
    async fn put_setting(&self, key: &str, value: Value) -> Result<()>;
    async fn delete_setting(&self, key: &str) -> Result<()>;

    async fn channel_stats(&self, channel_id: ChannelId, days: u32) -> Result<ChannelStats>;

    /// Mean/stddev of relevance and importance scores for ready items in a
    /// channel over the trailing `days`, for score normalization.
    async fn channel_score_stats(&self, channel_id: ChannelId, days: u32) -> Result<ScoreStats>;

    /// Up to `limit` most recent message texts in a channel, older than
    /// `before`, used as background context for the LLM (design §4.4 Phase C).
    async fn recent_channel_texts(
        &self,
        channel_id: ChannelId,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Decayed item ratings for one channel over the last `days`, half-life
    /// `half_life_days` (design §4.8).
    async fn decayed_item_ratings(
        &self,
        channel_id: Option<ChannelId>,
        days: u32,
        half_life_days: f64,
    ) -> Result<DecayedRatings>;
}
