//! Per-window topic clustering (design §4.6).

use std::collections::{HashMap, HashSet};

use chrono::Duration;
use digest_core::math::cosine_similarity;
use digest_core::model::ItemId;
use digest_store::traits::ItemWithEmbedding;

/// Safety cap: clustering is O(n^2), so the pool is truncated before it
/// runs (design §4.6 "Safety").
pub const MAX_CLUSTER_POOL: usize = 500;

/// Normalizes a topic string to a grouping key: trim, case-fold, then
/// title-case each word.
#[must_use]
pub fn normalize_topic_key(topic: &str) -> String {
    topic
        .trim()
        .to_lowercase()
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tuning knobs for [`build_clusters`].
#[derive(Debug, Clone)]
pub struct ClusteringConfig {
    pub similarity_threshold: f64,
    pub cross_topic_enabled: bool,
    pub cross_topic_similarity_threshold: f64,
    pub time_window_hours: Option<u64>,
    pub coherence_threshold: f64,
}

/// A cluster built for one window, prior to persistence.
#[derive(Debug, Clone)]
pub struct ClusterBuild {
    pub topic: String,
    pub member_item_ids: Vec<ItemId>,
    pub representative: ItemId,
    pub coherence: f64,
}

/// Builds clusters over `items` (already truncated to the selected pool).
/// Items exceeding [`MAX_CLUSTER_POOL`] are dropped before clustering
/// begins.
#[must_use]
pub fn build_clusters(items: &[ItemWithEmbedding], config: &ClusteringConfig) -> Vec<ClusterBuild> {
    let items: Vec<&ItemWithEmbedding> = items.iter().take(MAX_CLUSTER_POOL).collect();

    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, entry) in items.iter().enumerate() {
        groups
            .entry(normalize_topic_key(&entry.item.topic))
            .or_default()
            .push(i);
    }

    let mut assigned: HashSet<usize> = HashSet::new();
    let mut clusters = Vec::new();

    for (topic, members) in &groups {
        for &seed_idx in members {
            if assigned.contains(&seed_idx) {
                continue;
            }
            let candidate_pool: Vec<usize> = if config.cross_topic_enabled {
                (0..items.len()).collect()
            } else {
                members.clone()
            };

            let mut cluster_indices = vec![seed_idx];
            for &candidate_idx in &candidate_pool {
                if candidate_idx == seed_idx || assigned.contains(&candidate_idx) {
                    continue;
                }
                let seed = items[seed_idx];
                let candidate = items[candidate_idx];
                let cross_topic = normalize_topic_key(&candidate.item.topic) != *topic;
                let threshold = if cross_topic {
                    config.cross_topic_similarity_threshold
                } else {
                    config.similarity_threshold
                };
                let similar =
                    cosine_similarity(&seed.embedding, &candidate.embedding) >= threshold;
                let within_window = config.time_window_hours.is_none_or(|hours| {
                    (seed.item.created_at - candidate.item.created_at)
                        .abs()
                        <= Duration::hours(hours as i64)
                });
                if similar && within_window {
                    cluster_indices.push(candidate_idx);
                }
            }

            let coherence = mean_pairwise_similarity(&items, &cluster_indices);
            let final_indices = if cluster_indices.len() > 2 && coherence < config.coherence_threshold {
                vec![seed_idx]
            } else {
                cluster_indices
            };

            for &idx in &final_indices {
                assigned.insert(idx);
            }

            if final_indices.len() < 2 {
                continue;
            }

            let representative = final_indices
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    items[a]
                        .item
                        .importance_score
                        .partial_cmp(&items[b].item.importance_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| items[a].item.summary.len().cmp(&items[b].item.summary.len()))
                })
                .expect("final_indices is non-empty");

            clusters.push(ClusterBuild {
                topic: topic.clone(),
                member_item_ids: final_indices.iter().map(|&i| items[i].item.id).collect(),
                representative: items[representative].item.id,
                coherence: mean_pairwise_similarity(&items, &final_indices),
            });
        }
    }

    clusters
}

fn mean_pairwise_similarity(items: &[&ItemWithEmbedding], indices: &[usize]) -> f64 {
    if indices.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0;
    for i in 0..indices.len() {
        for j in (i + 1)..indices.len() {
            total += cosine_similarity(&items[indices[i]].embedding, &items[indices[j]].embedding);
            pairs += 1;
        }
    }
    total / pairs as f64
}
