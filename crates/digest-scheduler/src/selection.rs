//! `BuildDigest` steps 1–5 (design §4.5): pooling, anomaly detection,
//! freshness/diversity scoring, semantic de-duplication, and topic balance.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use digest_core::math::{clamp, cosine_similarity};
use digest_core::model::ItemId;
use digest_store::traits::ItemWithEmbedding;

/// Why no digest could be built for a window (design §4.5 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anomaly {
    /// Items exist in the window but none cleared the importance threshold.
    Threshold,
    /// The window is empty and the unprocessed backlog is large.
    Backlog,
}

/// Step 1: items sorted importance desc, relevance desc, capped at
/// `top_n * pool_multiplier`.
#[must_use]
pub fn build_pool(
    mut items: Vec<ItemWithEmbedding>,
    top_n: usize,
    pool_multiplier: usize,
) -> Vec<ItemWithEmbedding> {
    items.sort_by(|a, b| {
        b.item
            .importance_score
            .partial_cmp(&a.item.importance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.item
                    .relevance_score
                    .partial_cmp(&a.item.relevance_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });
    items.truncate(top_n * pool_multiplier.max(1));
    items
}

/// Step 2: detects the empty-window anomalies.
#[must_use]
pub fn detect_anomaly(
    total_in_window: u64,
    pool_is_empty: bool,
    backlog: u64,
    backlog_threshold: u64,
) -> Option<Anomaly> {
    if total_in_window > 0 && pool_is_empty {
        return Some(Anomaly::Threshold);
    }
    if total_in_window == 0 && backlog > backlog_threshold {
        return Some(Anomaly::Backlog);
    }
    None
}

/// Step 3: freshness decay and single-item-per-channel diversity bonus,
/// then a re-sort by the adjusted importance.
pub fn smart_select(
    mut pool: Vec<ItemWithEmbedding>,
    now: DateTime<Utc>,
    decay_hours: f64,
    floor: f64,
) -> Vec<ItemWithEmbedding> {
    let mut per_channel: HashMap<_, u32> = HashMap::new();
    for entry in &pool {
        *per_channel.entry(entry.item.channel_id).or_insert(0) += 1;
    }
    for entry in &mut pool {
        let age_hours = (now - entry.item.created_at).num_seconds() as f64 / 3600.0;
        let decay = if decay_hours > 0.0 {
            (-age_hours / decay_hours).exp().max(floor)
        } else {
            1.0
        };
        entry.item.importance_score *= decay;
        if per_channel.get(&entry.item.channel_id) == Some(&1) {
            entry.item.importance_score += 0.1;
        }
    }
    pool.sort_by(|a, b| {
        b.item
            .importance_score
            .partial_cmp(&a.item.importance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    pool
}

/// Step 4: keeps the first occurrence of any pair at or above
/// `similarity_threshold` cosine similarity.
#[must_use]
pub fn semantic_dedup(pool: Vec<ItemWithEmbedding>, similarity_threshold: f64) -> Vec<ItemWithEmbedding> {
    let mut kept: Vec<ItemWithEmbedding> = Vec::new();
    for candidate in pool {
        let is_duplicate = kept
            .iter()
            .any(|k| cosine_similarity(&candidate.embedding, &k.embedding) >= similarity_threshold);
        if !is_duplicate {
            kept.push(candidate);
        }
    }
    kept
}

/// Result of the topic-balance pass (design §4.5 step 5).
#[derive(Debug, Clone)]
pub struct TopicBalanceResult {
    pub selected: Vec<ItemWithEmbedding>,
    pub relaxed: bool,
}

/// Step 5: seeds the top `min_topics` distinct topics, then greedy-fills in
/// pool order while respecting `max_per_topic = floor(cap * top_n)`
/// (clamped to at least 1). If fewer than `top_n` were chosen, the cap is
/// relaxed and the pool is filled without it, reporting `relaxed = true`.
#[must_use]
pub fn topic_balance(pool: Vec<ItemWithEmbedding>, top_n: usize, cap: f64, min_topics: usize) -> TopicBalanceResult {
    let max_per_topic = ((clamp(cap, 0.0, 1.0) * top_n as f64).floor() as usize).max(1);

    let mut distinct_topics: Vec<&str> = Vec::new();
    for entry in &pool {
        let key = entry.item.topic.as_str();
        if !distinct_topics.contains(&key) {
            distinct_topics.push(key);
        }
        if distinct_topics.len() >= min_topics {
            break;
        }
    }

    let mut selected_ids: HashSet<ItemId> = HashSet::new();
    let mut per_topic: HashMap<String, usize> = HashMap::new();
    let mut selected: Vec<ItemWithEmbedding> = Vec::new();

    for topic in &distinct_topics {
        if selected.len() >= top_n {
            break;
        }
        if let Some(entry) = pool.iter().find(|e| e.item.topic == *topic) {
            selected_ids.insert(entry.item.id);
            *per_topic.entry(entry.item.topic.clone()).or_insert(0) += 1;
            selected.push(entry.clone());
        }
    }

    for entry in &pool {
        if selected.len() >= top_n {
            break;
        }
        if selected_ids.contains(&entry.item.id) {
            continue;
        }
        let count = per_topic.entry(entry.item.topic.clone()).or_insert(0);
        if *count >= max_per_topic {
            continue;
        }
        *count += 1;
        selected_ids.insert(entry.item.id);
        selected.push(entry.clone());
    }

    if selected.len() >= top_n.min(pool.len()) {
        return TopicBalanceResult {
            selected,
            relaxed: false,
        };
    }

    // Relax: fill purely in pool order, ignoring the per-topic cap.
    let mut relaxed_selected: Vec<ItemWithEmbedding> = Vec::new();
    let mut relaxed_ids: HashSet<ItemId> = HashSet::new();
    for entry in &pool {
        if relaxed_selected.len() >= top_n {
            break;
        }
        relaxed_ids.insert(entry.item.id);
        relaxed_selected.push(entry.clone());
    }
    let _ = relaxed_ids;
    TopicBalanceResult {
        selected: relaxed_selected,
        relaxed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use digest_core::model::{ChannelId, Item, ItemId, ItemStatus};

    fn item(
        channel: ChannelId,
        topic: &str,
        importance: f64,
        relevance: f64,
        created_at: DateTime<Utc>,
    ) -> ItemWithEmbedding {
        ItemWithEmbedding {
            item: Item {
                id: ItemId::new(),
                raw_message_id: digest_core::model::RawMessageId::new(),
                channel_id: channel,
                relevance_score: relevance,
                importance_score: importance,
                topic: topic.to_string(),
                summary: "summary text".to_string(),
                language: "en".to_string(),
                status: ItemStatus::Ready,
                retry_count: 0,
                next_retry_at: None,
                digested_at: None,
                error_blob: None,
                created_at,
            },
            embedding: vec![1.0, 0.0, 0.0],
        }
    }

    #[test]
    fn build_pool_sorts_and_caps() {
        let now = Utc::now();
        let c = ChannelId::new();
        let items = vec![
            item(c, "a", 0.5, 0.5, now),
            item(c, "b", 0.9, 0.1, now),
            item(c, "c", 0.9, 0.9, now),
        ];
        let pool = build_pool(items, 2, 1);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].item.topic, "c");
        assert_eq!(pool[1].item.topic, "b");
    }

    #[test]
    fn detect_anomaly_flags_threshold_and_backlog() {
        assert_eq!(detect_anomaly(5, true, 0, 100), Some(Anomaly::Threshold));
        assert_eq!(detect_anomaly(0, true, 150, 100), Some(Anomaly::Backlog));
        assert_eq!(detect_anomaly(0, true, 50, 100), None);
        assert_eq!(detect_anomaly(5, false, 0, 100), None);
    }

    #[test]
    fn smart_select_decays_old_items_and_rewards_unique_channels() {
        let now = Utc::now();
        let lone_channel = ChannelId::new();
        let busy_channel = ChannelId::new();
        let items = vec![
            item(lone_channel, "a", 0.5, 0.5, now - Duration::hours(72)),
            item(busy_channel, "b", 0.5, 0.5, now),
            item(busy_channel, "b", 0.5, 0.5, now),
        ];
        let selected = smart_select(items, now, 36.0, 0.4);
        // The old lone-channel item gets decayed toward the floor but still
        // receives the +0.1 diversity bonus; the fresh, duplicated-channel
        // items keep full importance with no bonus.
        let lone = selected.iter().find(|e| e.item.channel_id == lone_channel).unwrap();
        assert!(lone.item.importance_score <= 0.5 * 1.0 + 0.1 + 1e-9);
        assert!(lone.item.importance_score >= 0.4 * 0.5);
    }

    #[test]
    fn semantic_dedup_keeps_first_occurrence() {
        let now = Utc::now();
        let c = ChannelId::new();
        let mut a = item(c, "a", 0.9, 0.9, now);
        a.embedding = vec![1.0, 0.0, 0.0];
        let mut b = item(c, "b", 0.8, 0.8, now);
        b.embedding = vec![0.99, 0.01, 0.0];
        let deduped = semantic_dedup(vec![a.clone(), b], 0.9);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].item.id, a.item.id);
    }

    #[test]
    fn topic_balance_seeds_distinct_topics_then_fills_under_cap() {
        let now = Utc::now();
        let c = ChannelId::new();
        let items = vec![
            item(c, "a", 0.9, 0.9, now),
            item(c, "a", 0.8, 0.8, now),
            item(c, "a", 0.7, 0.7, now),
            item(c, "b", 0.6, 0.6, now),
            item(c, "c", 0.5, 0.5, now),
        ];
        let result = topic_balance(items, 4, 0.5, 3);
        assert!(!result.relaxed);
        let a_count = result.selected.iter().filter(|e| e.item.topic == "a").count();
        assert!(a_count <= 2);
    }

    #[test]
    fn topic_balance_relaxes_when_cap_starves_selection() {
        let now = Utc::now();
        let c = ChannelId::new();
        let items: Vec<_> = (0..5).map(|_| item(c, "only-topic", 0.9, 0.9, now)).collect();
        let result = topic_balance(items, 4, 0.1, 1);
        assert!(result.relaxed);
        assert_eq!(result.selected.len(), 4);
    }
}
