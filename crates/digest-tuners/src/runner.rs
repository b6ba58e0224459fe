//! Runs the three weekly adaptive jobs against a [`Store`] (design §4.8).
//! Each job is idempotent-on-no-change and logs its rejections with
//! reasons; none of them ever panics on a single channel's bad data — a
//! failure to update one channel is logged and the run continues.

use std::sync::Arc;

use digest_core::Config;
use digest_store::Store;
use tracing::{info, warn};

use crate::relevance::{compute_delta, RelevanceTuning};
use crate::thresholds::{compute_thresholds, ThresholdTuning};
use crate::weight::{compute_weight, WeightTuning};

const RATING_WINDOW_DAYS: u32 = 30;
const RELEVANCE_HALF_LIFE_DAYS: f64 = 14.0;

pub struct TunerRunner {
    store: Arc<dyn Store>,
    config: Config,
}

impl TunerRunner {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self { store, config }
    }

    /// Runs all three jobs in sequence, as the weekly scheduler tick does.
    pub async fn run_all(&self) {
        self.update_auto_weights().await;
        self.update_auto_relevance().await;
        self.update_global_thresholds().await;
    }

    pub async fn update_auto_weights(&self) {
        let channels = match self.store.get_active_channels().await {
            Ok(channels) => channels,
            Err(err) => {
                warn!(error = %err, "failed to list channels for weight tuning");
                return;
            }
        };
        let tuning = WeightTuning {
            min_messages: self.config.auto_weight_min_messages,
            expected_frequency: self.config.auto_weight_expected_frequency,
            auto_min: self.config.auto_weight_min,
            auto_max: self.config.auto_weight_max,
            days: RATING_WINDOW_DAYS,
        };

        for channel in channels {
            if !channel.auto_weight_enabled || channel.weight_override {
                continue;
            }
            let stats = match self.store.channel_stats(channel.id, RATING_WINDOW_DAYS).await {
                Ok(stats) => stats,
                Err(err) => {
                    warn!(channel = %channel.id, error = %err, "failed to read channel stats");
                    continue;
                }
            };
            match compute_weight(stats, channel.effective_weight(), tuning) {
                Ok(weight) => {
                    if let Err(err) = self.store.update_channel_weight(channel.id, weight).await {
                        warn!(channel = %channel.id, error = %err, "failed to persist weight");
                    } else {
                        info!(channel = %channel.id, weight, "updated auto weight");
                    }
                }
                Err(reason) => {
                    info!(channel = %channel.id, ?reason, "auto weight unchanged");
                }
            }
        }
    }

    pub async fn update_auto_relevance(&self) {
        let channels = match self.store.get_active_channels().await {
            Ok(channels) => channels,
            Err(err) => {
                warn!(error = %err, "failed to list channels for relevance tuning");
                return;
            }
        };
        let global = match self
            .store
            .decayed_item_ratings(None, RATING_WINDOW_DAYS, RELEVANCE_HALF_LIFE_DAYS)
            .await
        {
            Ok(ratings) => ratings,
            Err(err) => {
                warn!(error = %err, "failed to read global decayed ratings");
                return;
            }
        };
        let tuning = RelevanceTuning {
            min_global: self.config.rating_min_weighted_global,
            min_channel: self.config.rating_min_weighted_channel,
        };

        for channel in channels {
            if !channel.auto_relevance_enabled {
                continue;
            }
            let channel_ratings = match self
                .store
                .decayed_item_ratings(Some(channel.id), RATING_WINDOW_DAYS, RELEVANCE_HALF_LIFE_DAYS)
                .await
            {
                Ok(ratings) => ratings,
                Err(err) => {
                    warn!(channel = %channel.id, error = %err, "failed to read channel decayed ratings");
                    continue;
                }
            };
            match compute_delta(global, channel_ratings, channel.relevance_threshold_delta, tuning) {
                Ok(delta) => {
                    if let Err(err) = self
                        .store
                        .update_channel_relevance_delta(channel.id, delta)
                        .await
                    {
                        warn!(channel = %channel.id, error = %err, "failed to persist relevance delta");
                    } else {
                        info!(channel = %channel.id, delta, "updated auto relevance delta");
                    }
                }
                Err(reason) => {
                    info!(channel = %channel.id, ?reason, "auto relevance delta unchanged");
                }
            }
        }
    }

    pub async fn update_global_thresholds(&self) {
        let global = match self
            .store
            .decayed_item_ratings(None, RATING_WINDOW_DAYS, RELEVANCE_HALF_LIFE_DAYS)
            .await
        {
            Ok(ratings) => ratings,
            Err(err) => {
                warn!(error = %err, "failed to read global decayed ratings");
                return;
            }
        };
        let relevance_threshold = self.get_f64("relevance_threshold", self.config.relevance_threshold).await;
        let importance_threshold = self
            .get_f64("importance_threshold", self.config.importance_threshold)
            .await;
        let tuning = ThresholdTuning {
            net_positive: self.config.net_positive_threshold,
            net_negative: self.config.net_negative_threshold,
            step: self.config.global_threshold_step,
            min: 0.0,
            max: 1.0,
        };

        match compute_thresholds(global.net(), relevance_threshold, importance_threshold, tuning) {
            Ok((relevance, importance)) => {
                if let Err(err) = self
                    .store
                    .put_setting("relevance_threshold", serde_json::json!(relevance))
                    .await
                {
                    warn!(error = %err, "failed to persist relevance_threshold");
                }
                if let Err(err) = self
                    .store
                    .put_setting("importance_threshold", serde_json::json!(importance))
                    .await
                {
                    warn!(error = %err, "failed to persist importance_threshold");
                }
                info!(relevance, importance, "updated global thresholds");
            }
            Err(reason) => {
                info!(?reason, "global thresholds unchanged");
            }
        }
    }

    async fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.store.get_setting(key).await {
            Ok(Some(value)) => value.as_f64().unwrap_or(default),
            _ => default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use digest_core::model::{Channel, ChannelId, ItemRating, RatingValue};
    use digest_store::InMemoryStore;
    use std::sync::Arc as StdArc;

    fn channel(id: ChannelId) -> Channel {
        Channel {
            id,
            display_name: "chan".to_string(),
            is_active: true,
            relevance_threshold: None,
            importance_threshold: None,
            importance_weight: None,
            auto_weight_enabled: true,
            weight_override: false,
            auto_relevance_enabled: true,
            relevance_threshold_delta: 0.0,
            context: None,
            description: None,
            category: None,
            tone: None,
            update_freq: None,
            last_seen_message_id: None,
        }
    }

    #[tokio::test]
    async fn weight_override_channel_is_left_alone() {
        let memory = InMemoryStore::default();
        let id = ChannelId::new();
        let mut c = channel(id);
        c.weight_override = true;
        memory.upsert_channel(c);
        let store: StdArc<dyn Store> = StdArc::new(memory);

        let runner = TunerRunner::new(store.clone(), Config::default());
        runner.update_auto_weights().await;
        let reloaded = store.get_channel(id).await.unwrap().unwrap();
        assert_eq!(reloaded.importance_weight, None);
    }

    #[tokio::test]
    async fn global_thresholds_loosen_on_strongly_negative_net() {
        let memory = InMemoryStore::default();
        let now = Utc::now();
        for _ in 0..30 {
            memory.record_item_rating(ItemRating {
                item_id: digest_core::model::ItemId::new(),
                user_id: digest_core::model::UserId::new(),
                value: RatingValue::Bad,
                timestamp: now,
            });
        }
        let store: StdArc<dyn Store> = StdArc::new(memory);
        let runner = TunerRunner::new(store.clone(), Config::default());
        runner.update_global_thresholds().await;
        let relevance = store.get_setting("relevance_threshold").await.unwrap();
        assert!(relevance.is_some());
    }
}
