//! End-to-end scenario: two distinct texts whose embeddings land above
//! the similarity threshold collapse to one `ready` item; the later
//! message is marked processed without a second item (spec §8 scenario 2).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use digest_core::clock::FixedClock;
use digest_core::model::{Channel, ChannelId, ItemStatus};
use digest_core::Config;
use digest_filter::canonical_hash;
use digest_llm::{BatchMessage, LlmGateway, Provider, RawBatchResult};
use digest_pipeline::{NoopLinkEnricher, PipelineWorker};
use digest_store::memory::InMemoryStore;
use digest_store::types::NewRawMessage;
use digest_store::Store;

/// Embeds by first word so two worded-differently inputs can still be
/// pinned to a known cosine similarity (`cos([1,0], [0.82, 0.5725]) ≈ 0.82`).
struct FixedEmbeddingProvider;

#[async_trait]
impl Provider for FixedEmbeddingProvider {
    async fn embed(&self, text: &str) -> digest_llm::Result<Vec<f32>> {
        if text.starts_with("First") {
            Ok(vec![1.0, 0.0])
        } else {
            Ok(vec![0.82, 0.5725])
        }
    }

    async fn chat_batch(
        &self,
        messages: &[BatchMessage],
        _instructions: &str,
        _language: &str,
        _model: &str,
        _tone: &str,
    ) -> digest_llm::Result<Vec<RawBatchResult>> {
        Ok(messages
            .iter()
            .enumerate()
            .map(|(i, m)| RawBatchResult {
                index: i,
                source_channel: m.source_channel.clone(),
                relevance_score: 0.9,
                importance_score: 0.9,
                topic: "topic".to_string(),
                summary: "a summary long enough to pass the heuristic gate".to_string(),
                language: "en".to_string(),
            })
            .collect())
    }

    async fn narrative(&self, _prompt: &str) -> digest_llm::Result<String> {
        Ok(String::new())
    }
}

fn channel(id: ChannelId) -> Channel {
    Channel {
        id,
        display_name: "news".to_string(),
        is_active: true,
        relevance_threshold: None,
        importance_threshold: None,
        importance_weight: None,
        auto_weight_enabled: false,
        weight_override: false,
        auto_relevance_enabled: false,
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
async fn semantic_duplicate_across_batches_yields_one_ready_item() {
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let store = Arc::new(InMemoryStore::new(clock.clone()));
    let channel_id = ChannelId::new();
    store.upsert_channel(channel(channel_id));

    let gateway = Arc::new(LlmGateway::new(Box::new(FixedEmbeddingProvider), 1000.0));
    let worker = PipelineWorker::new(
        store.clone(),
        gateway,
        Config {
            worker_batch_size: 10,
            relevance_threshold: 0.1,
            similarity_threshold: 0.65,
            semantic_dedup_enabled: true,
            ..Config::default()
        },
        clock,
        Arc::new(NoopLinkEnricher),
    );

    let first = "First announcement about the quarterly roadmap release";
    let second = "Second writeup covering the quarterly roadmap release plans";

    store
        .upsert_raw_message(NewRawMessage {
            channel_id,
            source_msg_id: 1,
            timestamp: Utc::now(),
            text: first.to_string(),
            media: None,
            canonical_hash: canonical_hash(first),
            is_forward: false,
        })
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    store
        .upsert_raw_message(NewRawMessage {
            channel_id,
            source_msg_id: 2,
            timestamp: Utc::now(),
            text: second.to_string(),
            media: None,
            canonical_hash: canonical_hash(second),
            is_forward: false,
        })
        .await
        .unwrap();
    worker.run_once().await.unwrap();

    assert!(store.list_unprocessed(10).await.unwrap().is_empty());

    let window_start = Utc::now() - chrono::Duration::days(1);
    let window_end = Utc::now() + chrono::Duration::days(1);
    let items = store
        .get_items_for_window(window_start, window_end, 0.0, 10)
        .await
        .unwrap();
    let ready: Vec<_> = items
        .iter()
        .filter(|i| i.item.status == ItemStatus::Ready)
        .collect();
    assert_eq!(ready.len(), 1, "expected the later near-duplicate to be skipped, not scored again");
}
