//! Data model entities (see design §3).
//!
//! Types are kept deliberately plain structs so every Store implementation
//! (in-memory, Postgres) can share the same row shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable opaque identifiers. Newtypes avoid mixing up e.g. a channel id
/// with an item id at a call site.
macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(ChannelId);
id_type!(RawMessageId);
id_type!(ItemId);
id_type!(DigestId);
id_type!(ClusterId);
id_type!(UserId);

/// A curated source channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// Handle or title shown to operators.
    pub display_name: String,
    pub is_active: bool,
    pub relevance_threshold: Option<f64>,
    pub importance_threshold: Option<f64>,
    /// Per-channel importance multiplier. Absent or `<= 0` reads as `1.0`
    /// everywhere (invariant 6).
    pub importance_weight: Option<f64>,
    pub auto_weight_enabled: bool,
    /// A manual override suppresses [`crate::model::Channel::auto_weight_enabled`] updates.
    pub weight_override: bool,
    pub auto_relevance_enabled: bool,
    pub relevance_threshold_delta: f64,
    pub context: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tone: Option<String>,
    pub update_freq: Option<String>,
    /// Monotonic watermark of the last source message id ingested.
    pub last_seen_message_id: Option<i64>,
}

impl Channel {
    /// Effective importance weight per invariant 6.
    #[must_use]
    pub fn effective_weight(&self) -> f64 {
        match self.importance_weight {
            Some(w) if w > 0.0 => w,
            _ => 1.0,
        }
    }
}

/// A single ingested message, prior to scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: RawMessageId,
    pub channel_id: ChannelId,
    /// Unique together with `channel_id`.
    pub source_msg_id: i64,
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub media: Option<Vec<u8>>,
    pub canonical_hash: String,
    pub is_forward: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub discoveries_extracted: Option<bool>,
}

/// Processing status of an [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Ready,
    Rejected,
    Error,
    Retry,
}

/// A scored, summarized message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub raw_message_id: RawMessageId,
    pub channel_id: ChannelId,
    pub relevance_score: f64,
    pub importance_score: f64,
    pub topic: String,
    pub summary: String,
    pub language: String,
    pub status: ItemStatus,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub digested_at: Option<DateTime<Utc>>,
    pub error_blob: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A fixed-dimension embedding vector tied to one [`Item`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub item_id: ItemId,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Status of a published (or attempted) digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestStatus {
    Posted,
    Error,
}

/// One published (or failed) window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub id: DigestId,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: DigestStatus,
    pub posted_at: Option<DateTime<Utc>>,
    pub chat_id: Option<String>,
    pub message_id: Option<String>,
}

/// A rendered section of a [`Digest`], with source attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestEntry {
    pub digest_id: DigestId,
    pub title: String,
    pub body: String,
    pub sources: Vec<(ChannelId, i64)>,
}

/// A topic cluster built for one digest window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub topic: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

/// Membership of an [`Item`] in a [`Cluster`]. Unique on `(cluster_id, item_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterItem {
    pub cluster_id: ClusterId,
    pub item_id: ItemId,
}

/// A user's qualitative rating of an [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingValue {
    Good,
    Bad,
    Irrelevant,
}

/// Unique on `(item_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemRating {
    pub item_id: ItemId,
    pub user_id: UserId,
    pub value: RatingValue,
    pub timestamp: DateTime<Utc>,
}

/// Unique on `(digest_id, user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DigestRating {
    pub digest_id: DigestId,
    pub user_id: UserId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// One key/value override in the mutable control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Allow/deny pattern type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Allow,
    Deny,
}

/// A single allow/deny pattern entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub id: Uuid,
    pub filter_type: FilterType,
    pub pattern: String,
    pub active: bool,
}
