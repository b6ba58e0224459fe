//! A full weekly tuning pass (design §4.8) against a real `Store`: enough
//! activity and ratings for a channel to cross every update threshold in
//! one `run_all` call.

use std::sync::Arc;

use chrono::Utc;
use digest_core::model::{Channel, ChannelId, ItemId, ItemRating, ItemStatus, RatingValue, UserId};
use digest_core::Config;
use digest_store::types::{NewRawMessage, ScoredItem};
use digest_store::{InMemoryStore, Store};
use digest_tuners::TunerRunner;

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
async fn a_busy_well_rated_channel_gets_weight_and_relevance_updates() {
    let memory = InMemoryStore::default();
    let channel_id = ChannelId::new();
    memory.upsert_channel(channel(channel_id));

    let now = Utc::now();
    for i in 0..20 {
        let raw_id = memory
            .upsert_raw_message(NewRawMessage {
                channel_id,
                source_msg_id: i,
                timestamp: now,
                text: format!("message {i}"),
                media: None,
                canonical_hash: format!("hash-{i}"),
                is_forward: false,
            })
            .await
            .unwrap();
        let item_id = memory
            .save_item(ScoredItem {
                raw_message_id: raw_id,
                channel_id,
                relevance_score: 0.8,
                importance_score: 0.9,
                topic: "topic".to_string(),
                summary: "a summary long enough".to_string(),
                language: "en".to_string(),
                status: ItemStatus::Ready,
                embedding: None,
            })
            .await
            .unwrap();
        memory.mark_items_digested(&[item_id]).await.unwrap();
    }

    // Enough consistently-good ratings to clear both the global and
    // per-channel sample floors with a high reliability score.
    for _ in 0..40 {
        memory.record_item_rating(ItemRating {
            item_id: ItemId::new(),
            user_id: UserId::new(),
            value: RatingValue::Good,
            timestamp: now,
        });
    }

    let store: Arc<dyn Store> = Arc::new(memory);
    let runner = TunerRunner::new(store.clone(), Config::default());
    runner.run_all().await;

    let reloaded = store.get_channel(channel_id).await.unwrap().unwrap();
    assert!(
        reloaded.importance_weight.is_some(),
        "a consistently active, fully-digested channel should get an updated auto weight"
    );

    let relevance = store.get_setting("relevance_threshold").await.unwrap();
    let importance = store.get_setting("importance_threshold").await.unwrap();
    assert!(relevance.is_some(), "a strongly positive net rating should move the global relevance threshold");
    assert!(importance.is_some(), "a strongly positive net rating should move the global importance threshold");
}
