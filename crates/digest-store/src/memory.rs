//! An in-memory [`Store`] implementation. Sufficient to run pipeline and
//! scheduler tests (and the whole engine, for a single-process deployment)
//! without a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use digest_core::clock::{Clock, SystemClock};
use digest_core::error::{Error, Result};
use digest_core::model::{
    Channel, ChannelId, Cluster, ClusterId, ClusterItem, Digest, DigestEntry, DigestId,
    Item, ItemId, ItemStatus, RawMessage, RawMessageId,
};
use parking_lot::RwLock;
use serde_json::Value;

use crate::traits::{DigestWrite, ItemWithEmbedding, Store};
use crate::types::{ChannelStats, DecayedRatings, NewRawMessage, ScoredItem};

const MAX_RETRY_COUNT: u32 = 5;

#[derive(Default)]
struct Inner {
    channels: HashMap<ChannelId, Channel>,
    raw_by_key: HashMap<(ChannelId, i64), RawMessageId>,
    raw_messages: HashMap<RawMessageId, RawMessage>,
    items: HashMap<ItemId, Item>,
    item_by_raw: HashMap<RawMessageId, ItemId>,
    embeddings: HashMap<ItemId, Vec<f32>>,
    digests: HashMap<DigestId, Digest>,
    digest_by_window: HashMap<(DateTime<Utc>, DateTime<Utc>), DigestId>,
    digest_errors: HashMap<(DateTime<Utc>, DateTime<Utc>), DateTime<Utc>>,
    digest_entries: Vec<DigestEntry>,
    clusters: HashMap<ClusterId, Cluster>,
    cluster_items: Vec<ClusterItem>,
    item_ratings: Vec<digest_core::model::ItemRating>,
    settings: HashMap<String, Value>,
    setting_history: Vec<(String, Option<Value>, Value, DateTime<Utc>)>,
    advisory_locks: std::collections::HashSet<i64>,
    filters: Vec<digest_core::model::Filter>,
}

/// An in-memory, process-local [`Store`]. Channels must be seeded via
/// [`InMemoryStore::upsert_channel`] before the pipeline/scheduler can see
/// them; there is no external reader to do this automatically.
pub struct InMemoryStore {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Seeds or replaces a channel row.
    pub fn upsert_channel(&self, channel: Channel) {
        self.inner.write().channels.insert(channel.id, channel);
    }

    pub fn add_filter(&self, filter: digest_core::model::Filter) {
        self.inner.write().filters.push(filter);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_raw_message(&self, msg: NewRawMessage) -> Result<RawMessageId> {
        let mut inner = self.inner.write();
        let key = (msg.channel_id, msg.source_msg_id);
        if let Some(&id) = inner.raw_by_key.get(&key) {
            return Ok(id);
        }
        let id = RawMessageId::new();
        inner.raw_by_key.insert(key, id);
        inner.raw_messages.insert(
            id,
            RawMessage {
                id,
                channel_id: msg.channel_id,
                source_msg_id: msg.source_msg_id,
                timestamp: msg.timestamp,
                text: msg.text,
                media: msg.media,
                canonical_hash: msg.canonical_hash,
                is_forward: msg.is_forward,
                processed_at: None,
                discoveries_extracted: None,
            },
        );
        Ok(id)
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<(RawMessage, Channel)>> {
        let inner = self.inner.read();
        let mut rows: Vec<_> = inner
            .raw_messages
            .values()
            .filter(|m| m.processed_at.is_none())
            .filter_map(|m| {
                inner
                    .channels
                    .get(&m.channel_id)
                    .map(|c| (m.clone(), c.clone()))
            })
            .collect();
        rows.sort_by_key(|(m, _)| m.timestamp);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_raw_messages(&self, ids: &[digest_core::model::RawMessageId]) -> Result<Vec<RawMessage>> {
        let inner = self.inner.read();
        Ok(ids
            .iter()
            .filter_map(|id| inner.raw_messages.get(id).cloned())
            .collect())
    }

    async fn get_active_channels(&self) -> Result<Vec<Channel>> {
        Ok(self
            .inner
            .read()
            .channels
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect())
    }

    async fn list_filters(&self) -> Result<Vec<digest_core::model::Filter>> {
        Ok(self.inner.read().filters.clone())
    }

    async fn get_channel(&self, id: ChannelId) -> Result<Option<Channel>> {
        Ok(self.inner.read().channels.get(&id).cloned())
    }

    async fn update_channel_weight(&self, channel_id: ChannelId, weight: f64) -> Result<()> {
        let mut inner = self.inner.write();
        let channel = inner
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| Error::NotFound(format!("channel {channel_id}")))?;
        channel.importance_weight = Some(weight);
        Ok(())
    }

    async fn update_channel_relevance_delta(&self, channel_id: ChannelId, delta: f64) -> Result<()> {
        let mut inner = self.inner.write();
        let channel = inner
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| Error::NotFound(format!("channel {channel_id}")))?;
        channel.relevance_threshold_delta = delta;
        Ok(())
    }

    async fn mark_processed(&self, id: RawMessageId) -> Result<()> {
        let mut inner = self.inner.write();
        let now = self.clock.now();
        let msg = inner
            .raw_messages
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("raw message {id}")))?;
        msg.processed_at = Some(now);
        Ok(())
    }

    async fn has_strict_duplicate(
        &self,
        channel_id: ChannelId,
        canonical_hash: &str,
        exclude: RawMessageId,
    ) -> Result<bool> {
        let inner = self.inner.read();
        Ok(inner.raw_messages.values().any(|m| {
            m.id != exclude
                && m.channel_id == channel_id
                && m.canonical_hash == canonical_hash
                && !matches!(
                    inner.item_by_raw.get(&m.id).and_then(|id| inner.items.get(id)),
                    Some(item) if item.status == ItemStatus::Error
                )
        }))
    }

    async fn find_similar_item(
        &self,
        embedding: &[f32],
        threshold: f64,
        since: DateTime<Utc>,
    ) -> Result<Option<ItemId>> {
        let inner = self.inner.read();
        let max_distance = 1.0 - threshold;
        let mut best: Option<(ItemId, f64)> = None;
        for (item_id, vector) in &inner.embeddings {
            let Some(item) = inner.items.get(item_id) else {
                continue;
            };
            if item.created_at < since {
                continue;
            }
            let distance = 1.0 - digest_core::math::cosine_similarity(embedding, vector);
            if distance <= max_distance && best.as_ref().is_none_or(|(_, d)| distance < *d) {
                best = Some((*item_id, distance));
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    async fn save_item(&self, result: ScoredItem) -> Result<ItemId> {
        let mut inner = self.inner.write();
        let now = self.clock.now();
        let existing_id = inner.item_by_raw.get(&result.raw_message_id).copied();
        let id = existing_id.unwrap_or_else(ItemId::new);
        let item = Item {
            id,
            raw_message_id: result.raw_message_id,
            channel_id: result.channel_id,
            relevance_score: result.relevance_score,
            importance_score: result.importance_score,
            topic: result.topic,
            summary: result.summary,
            language: result.language,
            status: result.status,
            retry_count: 0,
            next_retry_at: None,
            digested_at: existing_id.and_then(|id| inner.items.get(&id)).and_then(|i| i.digested_at),
            error_blob: None,
            created_at: existing_id
                .and_then(|id| inner.items.get(&id))
                .map_or(now, |i| i.created_at),
        };
        if let Some(vector) = result.embedding {
            inner.embeddings.insert(id, vector);
        }
        inner.items.insert(id, item);
        inner.item_by_raw.insert(result.raw_message_id, id);
        Ok(id)
    }

    async fn save_item_error(&self, raw_message_id: RawMessageId, error_blob: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let now = self.clock.now();
        let existing_id = inner.item_by_raw.get(&raw_message_id).copied();
        let channel_id = inner
            .raw_messages
            .get(&raw_message_id)
            .map(|m| m.channel_id)
            .ok_or_else(|| Error::NotFound(format!("raw message {raw_message_id}")))?;
        let id = existing_id.unwrap_or_else(ItemId::new);
        let retry_count = existing_id
            .and_then(|id| inner.items.get(&id))
            .map_or(0, |i| i.retry_count)
            .saturating_add(1)
            .min(MAX_RETRY_COUNT);
        let next_retry_at = now + ChronoDuration::minutes(2i64.saturating_pow(retry_count));
        let created_at = existing_id
            .and_then(|id| inner.items.get(&id))
            .map_or(now, |i| i.created_at);
        inner.items.insert(
            id,
            Item {
                id,
                raw_message_id,
                channel_id,
                relevance_score: 0.0,
                importance_score: 0.0,
                topic: String::new(),
                summary: String::new(),
                language: String::new(),
                status: ItemStatus::Error,
                retry_count,
                next_retry_at: Some(next_retry_at),
                digested_at: None,
                error_blob: Some(error_blob.to_string()),
                created_at,
            },
        );
        inner.item_by_raw.insert(raw_message_id, id);
        Ok(())
    }

    async fn mark_items_digested(&self, ids: &[ItemId]) -> Result<()> {
        let mut inner = self.inner.write();
        let now = self.clock.now();
        for id in ids {
            if let Some(item) = inner.items.get_mut(id) {
                item.digested_at = Some(now);
            }
        }
        Ok(())
    }

    async fn get_items_for_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        importance_threshold: f64,
        limit: usize,
    ) -> Result<Vec<ItemWithEmbedding>> {
        let inner = self.inner.read();
        let mut rows: Vec<_> = inner
            .items
            .values()
            .filter(|item| item.status == ItemStatus::Ready && item.digested_at.is_none())
            .filter(|item| item.created_at >= start && item.created_at < end)
            .filter_map(|item| {
                let threshold = inner
                    .channels
                    .get(&item.channel_id)
                    .and_then(|c| c.importance_threshold)
                    .unwrap_or(importance_threshold);
                if item.importance_score < threshold {
                    return None;
                }
                let embedding = inner.embeddings.get(&item.id).cloned().unwrap_or_default();
                Some(ItemWithEmbedding {
                    item: item.clone(),
                    embedding,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            b.item
                .importance_score
                .total_cmp(&a.item.importance_score)
                .then(b.item.relevance_score.total_cmp(&a.item.relevance_score))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count_items_in_window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64> {
        let inner = self.inner.read();
        Ok(inner
            .items
            .values()
            .filter(|item| item.status == ItemStatus::Ready)
            .filter(|item| item.created_at >= start && item.created_at < end)
            .count() as u64)
    }

    async fn count_backlog(&self) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .raw_messages
            .values()
            .filter(|m| m.processed_at.is_none())
            .count() as u64)
    }

    async fn create_cluster(&self, cluster: Cluster) -> Result<ClusterId> {
        let mut inner = self.inner.write();
        let id = cluster.id;
        inner.clusters.insert(id, cluster);
        Ok(id)
    }

    async fn add_to_cluster(&self, cluster_id: ClusterId, item_id: ItemId) -> Result<()> {
        self.inner
            .write()
            .cluster_items
            .push(ClusterItem { cluster_id, item_id });
        Ok(())
    }

    async fn delete_clusters_for_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let removed: Vec<ClusterId> = inner
            .clusters
            .iter()
            .filter(|(_, c)| c.window_start == start && c.window_end == end)
            .map(|(id, _)| *id)
            .collect();
        inner.clusters.retain(|id, _| !removed.contains(id));
        inner
            .cluster_items
            .retain(|ci| !removed.contains(&ci.cluster_id));
        Ok(())
    }

    async fn digest_exists(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<bool> {
        let inner = self.inner.read();
        if inner.digest_by_window.contains_key(&(start, end)) {
            return Ok(true);
        }
        if let Some(&failed_at) = inner.digest_errors.get(&(start, end)) {
            if self.clock.now() - failed_at < ChronoDuration::hours(1) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn save_digest(&self, write: DigestWrite) -> Result<DigestId> {
        let mut inner = self.inner.write();
        let key = (write.digest.window_start, write.digest.window_end);
        if inner.digest_by_window.contains_key(&key) {
            return Err(Error::Conflict(format!("digest already exists for window {key:?}")));
        }
        let id = write.digest.id;
        inner.digest_by_window.insert(key, id);
        inner.digests.insert(id, write.digest);
        inner.digest_entries.extend(write.entries);
        for item_id in &write.item_ids {
            if let Some(item) = inner.items.get_mut(item_id) {
                item.digested_at = Some(self.clock.now());
            }
        }
        inner.digest_errors.remove(&key);
        Ok(id)
    }

    async fn save_digest_error(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
        self.inner
            .write()
            .digest_errors
            .insert((start, end), self.clock.now());
        Ok(())
    }

    async fn try_acquire_advisory_lock(&self, lease_name: &str) -> Result<bool> {
        let key = digest_core::math::stable_lock_key(lease_name);
        Ok(self.inner.write().advisory_locks.insert(key))
    }

    async fn release_advisory_lock(&self, lease_name: &str) -> Result<()> {
        let key = digest_core::math::stable_lock_key(lease_name);
        self.inner.write().advisory_locks.remove(&key);
        Ok(())
    }

    async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.read().settings.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.write();
        let before = inner.settings.get(key).cloned();
        inner.settings.insert(key.to_string(), value.clone());
        // Best-effort history: never abort the primary write.
        inner
            .setting_history
            .push((key.to_string(), before, value, self.clock.now()));
        Ok(())
    }

    async fn delete_setting(&self, key: &str) -> Result<()> {
        self.inner.write().settings.remove(key);
        Ok(())
    }

    async fn channel_stats(&self, channel_id: ChannelId, days: u32) -> Result<ChannelStats> {
        let inner = self.inner.read();
        let since = self.clock.now() - ChronoDuration::days(i64::from(days));
        let messages = inner
            .raw_messages
            .values()
            .filter(|m| m.channel_id == channel_id && m.timestamp >= since)
            .count() as u64;
        let channel_items: Vec<&Item> = inner
            .items
            .values()
            .filter(|i| i.channel_id == channel_id && i.created_at >= since)
            .collect();
        let items_created = channel_items.len() as u64;
        let items_digested = channel_items.iter().filter(|i| i.digested_at.is_some()).count() as u64;
        let avg_importance = if channel_items.is_empty() {
            0.0
        } else {
            channel_items.iter().map(|i| i.importance_score).sum::<f64>() / channel_items.len() as f64
        };
        Ok(ChannelStats {
            messages,
            items_created,
            items_digested,
            avg_importance,
        })
    }

    async fn channel_score_stats(&self, channel_id: ChannelId, days: u32) -> Result<crate::types::ScoreStats> {
        let inner = self.inner.read();
        let since = self.clock.now() - ChronoDuration::days(i64::from(days));
        let items: Vec<&Item> = inner
            .items
            .values()
            .filter(|i| {
                i.channel_id == channel_id && i.created_at >= since && i.status == ItemStatus::Ready
            })
            .collect();
        if items.is_empty() {
            return Ok(crate::types::ScoreStats::default());
        }
        let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
        let stddev = |xs: &[f64], m: f64| {
            (xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
        };
        let relevance: Vec<f64> = items.iter().map(|i| i.relevance_score).collect();
        let importance: Vec<f64> = items.iter().map(|i| i.importance_score).collect();
        let relevance_mean = mean(&relevance);
        let importance_mean = mean(&importance);
        Ok(crate::types::ScoreStats {
            relevance_mean,
            relevance_stddev: stddev(&relevance, relevance_mean),
            importance_mean,
            importance_stddev: stddev(&importance, importance_mean),
        })
    }

    async fn recent_channel_texts(
        &self,
        channel_id: ChannelId,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let mut rows: Vec<&RawMessage> = inner
            .raw_messages
            .values()
            .filter(|m| m.channel_id == channel_id && m.timestamp < before)
            .collect();
        rows.sort_by_key(|m| std::cmp::Reverse(m.timestamp));
        rows.truncate(limit);
        Ok(rows.into_iter().map(|m| m.text.clone()).collect())
    }

    async fn decayed_item_ratings(
        &self,
        channel_id: Option<ChannelId>,
        days: u32,
        half_life_days: f64,
    ) -> Result<DecayedRatings> {
        let inner = self.inner.read();
        let now = self.clock.now();
        let since = now - ChronoDuration::days(i64::from(days));
        let mut out = DecayedRatings::default();
        for rating in &inner.item_ratings {
            if rating.timestamp < since {
                continue;
            }
            if let Some(cid) = channel_id {
                let Some(item) = inner.items.get(&rating.item_id) else {
                    continue;
                };
                if item.channel_id != cid {
                    continue;
                }
            }
            let age_days = (now - rating.timestamp).num_milliseconds() as f64 / 86_400_000.0;
            let weight = (-age_days * std::f64::consts::LN_2 / half_life_days).exp();
            out.weighted_total += weight;
            match rating.value {
                digest_core::model::RatingValue::Good => out.weighted_good += weight,
                digest_core::model::RatingValue::Bad => out.weighted_bad += weight,
                digest_core::model::RatingValue::Irrelevant => out.weighted_irrelevant += weight,
            }
        }
        Ok(out)
    }
}

impl InMemoryStore {
    /// Test/seed helper: records a rating directly (there is no separate
    /// admin surface in this core engine — ratings arrive from the chat
    /// platform's rating buttons, an external collaborator).
    pub fn record_item_rating(&self, rating: digest_core::model::ItemRating) {
        self.inner.write().item_ratings.push(rating);
    }
}
