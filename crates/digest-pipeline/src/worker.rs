//! The six-phase batch worker (design §4.4).
//!
//! Every setting read goes through [`RuntimeSettings::resolve`]: the store
//! is consulted first, config is the fallback, and nothing is cached
//! across batches.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use digest_core::model::{Channel, ChannelId, ItemStatus, RawMessage, RawMessageId};
use digest_core::{Clock, Config};
use digest_filter::{admit, canonical_hash, relevance_gate, FilterConfig, FilterMode};
use digest_llm::{BatchMessage, LlmGateway, ScoredResult};
use digest_store::types::ScoredItem;
use digest_store::Store;
use tracing::{info, warn};

use crate::link_enricher::LinkEnricher;
use crate::normalization::normalize_scores;
use crate::scoring::{effective_relevance_threshold, final_importance};

const CONTEXT_FETCH_LIMIT: usize = 5;
const RECENT_EMBEDDING_WINDOW_DAYS: i64 = 7;
const SCORE_PROMPT_BASE: &str = "score";
const DEFAULT_SCORE_PROMPT: &str =
    "Score each of the following {{MESSAGE_COUNT}} messages. Respond in {{LANG_INSTRUCTION}}.";

/// Settings resolved for a single batch pass: the store is consulted
/// first, config supplies anything the store doesn't override.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub similarity_threshold: f64,
    pub semantic_dedup_enabled: bool,
    pub topic_clustering_enabled: bool,
    pub relevance_threshold: f64,
    pub default_model: String,
    pub smart_model: String,
    pub vision_routing_enabled: bool,
    pub tiered_rescoring_enabled: bool,
    pub normalization_enabled: bool,
    pub link_enrichment_enabled: bool,
    pub filter: FilterConfig,
    pub relevance_gate_enabled: bool,
}

impl RuntimeSettings {
    pub async fn resolve(store: &dyn Store, config: &Config) -> digest_core::Result<Self> {
        let filters = store.list_filters().await.unwrap_or_default();
        Ok(Self {
            similarity_threshold: resolve_f64(
                store,
                "similarity_threshold",
                config.similarity_threshold,
            )
            .await,
            semantic_dedup_enabled: resolve_bool(
                store,
                "semantic_dedup_enabled",
                config.semantic_dedup_enabled,
            )
            .await,
            topic_clustering_enabled: resolve_bool(
                store,
                "topic_clustering_enabled",
                config.topic_clustering_enabled,
            )
            .await,
            relevance_threshold: resolve_f64(
                store,
                "relevance_threshold",
                config.relevance_threshold,
            )
            .await,
            default_model: resolve_string(store, "default_model", &config.default_model).await,
            smart_model: resolve_string(store, "smart_model", &config.smart_model).await,
            vision_routing_enabled: resolve_bool(
                store,
                "vision_routing_enabled",
                config.vision_routing_enabled,
            )
            .await,
            tiered_rescoring_enabled: resolve_bool(
                store,
                "tiered_rescoring_enabled",
                config.tiered_rescoring_enabled,
            )
            .await,
            normalization_enabled: resolve_bool(
                store,
                "normalization_enabled",
                config.normalization_enabled,
            )
            .await,
            link_enrichment_enabled: resolve_bool(
                store,
                "link_enrichment_enabled",
                config.link_enrichment_enabled,
            )
            .await,
            filter: FilterConfig {
                min_length: resolve_usize(store, "min_length", config.min_length).await,
                ads_filter_enabled: resolve_bool(
                    store,
                    "ads_filter_enabled",
                    config.ads_filter_enabled,
                )
                .await,
                ads_keywords: config.ads_keywords.clone(),
                skip_forwards: resolve_bool(store, "skip_forwards", config.skip_forwards).await,
                mode: FilterMode::parse(&resolve_string(
                    store,
                    "filter_mode",
                    &config.filter_mode,
                )
                .await),
                filters,
            },
            relevance_gate_enabled: resolve_bool(
                store,
                "relevance_gate_enabled",
                config.relevance_gate_enabled,
            )
            .await,
        })
    }
}

async fn resolve_f64(store: &dyn Store, key: &str, default: f64) -> f64 {
    store
        .get_setting(key)
        .await
        .ok()
        .flatten()
        .and_then(|v| v.as_f64())
        .unwrap_or(default)
}

async fn resolve_bool(store: &dyn Store, key: &str, default: bool) -> bool {
    store
        .get_setting(key)
        .await
        .ok()
        .flatten()
        .and_then(|v| v.as_bool())
        .unwrap_or(default)
}

async fn resolve_usize(store: &dyn Store, key: &str, default: usize) -> usize {
    store
        .get_setting(key)
        .await
        .ok()
        .flatten()
        .and_then(|v| v.as_u64())
        .map_or(default, |n| n as usize)
}

async fn resolve_string(store: &dyn Store, key: &str, default: &str) -> String {
    store
        .get_setting(key)
        .await
        .ok()
        .flatten()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| default.to_string())
}

/// The pipeline worker: polls for unprocessed messages and scores them.
pub struct PipelineWorker {
    store: Arc<dyn Store>,
    gateway: Arc<LlmGateway>,
    config: Config,
    clock: Arc<dyn Clock>,
    link_enricher: Arc<dyn LinkEnricher>,
}

impl PipelineWorker {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<LlmGateway>,
        config: Config,
        clock: Arc<dyn Clock>,
        link_enricher: Arc<dyn LinkEnricher>,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
            clock,
            link_enricher,
        }
    }

    /// Runs forever, polling every `worker_poll_interval`.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.worker_poll_interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                warn!(error = %err, "pipeline batch failed");
            }
        }
    }

    /// Processes up to `worker_batch_size` unprocessed messages once.
    pub async fn run_once(&self) -> digest_core::Result<()> {
        let settings = RuntimeSettings::resolve(self.store.as_ref(), &self.config).await?;
        let batch = self
            .store
            .list_unprocessed(self.config.worker_batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(());
        }
        info!(count = batch.len(), "pipeline batch starting");

        let mut accepted_embeddings: Vec<Vec<f32>> = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for (message, channel) in batch {
            match self
                .admit_and_embed(&message, &channel, &settings, &mut accepted_embeddings)
                .await
            {
                Ok(Some(candidate)) => candidates.push(candidate),
                Ok(None) => {}
                Err(err) => {
                    self.fail_message(message.id, &err).await;
                }
            }
        }

        self.score_and_persist(candidates, &settings).await;
        Ok(())
    }

    /// Phases A and B for a single message. `Ok(None)` means the message
    /// was fully handled (duplicate or rejected) and needs no further work.
    async fn admit_and_embed(
        &self,
        message: &RawMessage,
        channel: &Channel,
        settings: &RuntimeSettings,
        accepted_embeddings: &mut Vec<Vec<f32>>,
    ) -> digest_core::Result<Option<Candidate>> {
        let hash = canonical_hash(&message.text);
        if self
            .store
            .has_strict_duplicate(channel.id, &hash, message.id)
            .await?
        {
            self.store.mark_processed(message.id).await?;
            return Ok(None);
        }

        if let Err(rejection) = admit(&message.text, message.is_forward, &settings.filter) {
            self.reject_message(message, channel, &format!("{rejection:?}"))
                .await?;
            return Ok(None);
        }

        if settings.relevance_gate_enabled {
            let decision = relevance_gate(&message.text);
            if decision.skip {
                self.reject_message(message, channel, decision.reason)
                    .await?;
                return Ok(None);
            }
        }

        let mut embedding = None;
        if settings.semantic_dedup_enabled || settings.topic_clustering_enabled {
            let vector = self.gateway.get_embedding(&message.text).await?;
            if digest_filter::dedup::is_within_batch_duplicate(
                &vector,
                accepted_embeddings,
                settings.similarity_threshold,
            ) {
                self.store.mark_processed(message.id).await?;
                return Ok(None);
            }
            let since = self.clock.now() - chrono::Duration::days(RECENT_EMBEDDING_WINDOW_DAYS);
            if self
                .store
                .find_similar_item(&vector, settings.similarity_threshold, since)
                .await?
                .is_some()
            {
                self.store.mark_processed(message.id).await?;
                return Ok(None);
            }
            accepted_embeddings.push(vector.clone());
            embedding = Some(vector);
        }

        let context = self.gather_context(channel.id, message.timestamp, settings).await;

        Ok(Some(Candidate {
            message: message.clone(),
            channel: channel.clone(),
            embedding,
            context,
        }))
    }

    /// Phase C: recent channel texts plus optional link enrichment.
    async fn gather_context(
        &self,
        channel_id: ChannelId,
        before: DateTime<Utc>,
        settings: &RuntimeSettings,
    ) -> Vec<String> {
        let mut context = self
            .store
            .recent_channel_texts(channel_id, before, CONTEXT_FETCH_LIMIT)
            .await
            .unwrap_or_default();

        if settings.link_enrichment_enabled {
            for url in extract_urls(&context.join(" ")) {
                if let Some(resolved) = self.link_enricher.enrich(&url).await {
                    context.push(resolved);
                }
            }
        }
        context
    }

    async fn reject_message(
        &self,
        message: &RawMessage,
        channel: &Channel,
        reason: &str,
    ) -> digest_core::Result<()> {
        self.store
            .save_item(ScoredItem {
                raw_message_id: message.id,
                channel_id: channel.id,
                relevance_score: 0.0,
                importance_score: 0.0,
                topic: String::new(),
                summary: format!("rejected: {reason}"),
                language: String::new(),
                status: ItemStatus::Rejected,
                embedding: None,
            })
            .await?;
        self.store.mark_processed(message.id).await
    }

    async fn fail_message(&self, raw_message_id: RawMessageId, err: &digest_core::Error) {
        if let Err(save_err) = self
            .store
            .save_item_error(raw_message_id, &err.to_string())
            .await
        {
            warn!(error = %save_err, "failed to record item error");
        }
        if let Err(mark_err) = self.store.mark_processed(raw_message_id).await {
            warn!(error = %mark_err, "failed to mark raw message processed after error");
        }
    }

    /// Phases D, E, and F: partition by model, score, tier, persist.
    async fn score_and_persist(&self, candidates: Vec<Candidate>, settings: &RuntimeSettings) {
        if candidates.is_empty() {
            return;
        }

        let (vision, default): (Vec<Candidate>, Vec<Candidate>) = candidates
            .into_iter()
            .partition(|c| settings.vision_routing_enabled && c.message.media.is_some());

        let mut scored: Vec<(Candidate, String, Option<ScoredResult>)> = Vec::new();
        scored.extend(
            self.score_partition(default, &settings.default_model, settings)
                .await,
        );
        scored.extend(
            self.score_partition(vision, &settings.smart_model, settings)
                .await,
        );

        let scored = self.tier_rescore(scored, settings).await;

        for (candidate, model, result) in scored {
            let _ = model;
            match result {
                Some(scored_result) => {
                    self.persist_scored(candidate, scored_result, settings)
                        .await;
                }
                None => {
                    self.fail_message(
                        candidate.message.id,
                        &digest_core::Error::Logical("empty or unaligned LLM result".to_string()),
                    )
                    .await;
                }
            }
        }
    }

    async fn score_partition(
        &self,
        candidates: Vec<Candidate>,
        model: &str,
        settings: &RuntimeSettings,
    ) -> Vec<(Candidate, String, Option<ScoredResult>)> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let _ = settings;
        let messages: Vec<BatchMessage> = candidates
            .iter()
            .map(|c| BatchMessage {
                source_channel: c.channel.id.to_string(),
                text: format_with_context(&c.message.text, &c.context),
                has_media: c.message.media.is_some(),
            })
            .collect();
        let language = "en";
        let tone = candidates
            .first()
            .and_then(|c| c.channel.tone.clone())
            .unwrap_or_else(|| "neutral".to_string());
        let instructions = digest_llm::render(
            self.store.as_ref(),
            SCORE_PROMPT_BASE,
            DEFAULT_SCORE_PROMPT,
            language,
            messages.len(),
        )
        .await
        .unwrap_or_else(|_| DEFAULT_SCORE_PROMPT.to_string());

        let started = std::time::Instant::now();
        let result = self
            .gateway
            .process_batch(&messages, &instructions, language, model, &tone)
            .await;
        info!(
            model,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "llm_request_duration"
        );

        match result {
            Ok(results) => candidates
                .into_iter()
                .zip(results)
                .map(|(c, r)| (c, model.to_string(), r))
                .collect(),
            Err(err) => {
                warn!(error = %err, model, "whole-partition LLM scoring failed");
                candidates
                    .into_iter()
                    .map(|c| (c, model.to_string(), None))
                    .collect()
            }
        }
    }

    /// Phase E: any result scored `importance_score > 0.8` by a model other
    /// than the smart model is re-scored with it; successful re-results
    /// replace the originals.
    async fn tier_rescore(
        &self,
        scored: Vec<(Candidate, String, Option<ScoredResult>)>,
        settings: &RuntimeSettings,
    ) -> Vec<(Candidate, String, Option<ScoredResult>)> {
        if !settings.tiered_rescoring_enabled {
            return scored;
        }
        let mut out = Vec::with_capacity(scored.len());
        for (candidate, model, result) in scored {
            let needs_rescore = result
                .as_ref()
                .is_some_and(|r| r.importance_score > 0.8 && model != settings.smart_model);
            if !needs_rescore {
                out.push((candidate, model, result));
                continue;
            }
            let message = BatchMessage {
                source_channel: candidate.channel.id.to_string(),
                text: format_with_context(&candidate.message.text, &candidate.context),
                has_media: candidate.message.media.is_some(),
            };
            let tone = candidate.channel.tone.clone().unwrap_or_else(|| "neutral".to_string());
            let instructions = digest_llm::render(
                self.store.as_ref(),
                SCORE_PROMPT_BASE,
                DEFAULT_SCORE_PROMPT,
                "en",
                1,
            )
            .await
            .unwrap_or_else(|_| DEFAULT_SCORE_PROMPT.to_string());
            let started = std::time::Instant::now();
            let rescore_result = self
                .gateway
                .process_batch(&[message], &instructions, "en", &settings.smart_model, &tone)
                .await;
            info!(
                model = settings.smart_model.as_str(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "llm_request_duration"
            );
            match rescore_result {
                Ok(mut results) if results.first().is_some_and(Option::is_some) => {
                    out.push((candidate, settings.smart_model.clone(), results.remove(0)));
                }
                _ => out.push((candidate, model, result)),
            }
        }
        out
    }

    /// Phase F: final importance, effective threshold, persist.
    async fn persist_scored(
        &self,
        candidate: Candidate,
        result: ScoredResult,
        settings: &RuntimeSettings,
    ) {
        let channel = &candidate.channel;
        let (relevance_score, importance_score) = if settings.normalization_enabled {
            let stats = self
                .store
                .channel_score_stats(channel.id, 7)
                .await
                .unwrap_or_default();
            normalize_scores(result.relevance_score, result.importance_score, &stats)
        } else {
            (result.relevance_score, result.importance_score)
        };

        let importance = final_importance(importance_score, channel.effective_weight(), &result.summary);
        let threshold = effective_relevance_threshold(
            channel.relevance_threshold,
            settings.relevance_threshold,
            channel.relevance_threshold_delta,
            channel.auto_relevance_enabled,
        );
        let status = if relevance_score >= threshold {
            ItemStatus::Ready
        } else {
            ItemStatus::Rejected
        };

        let save_result = self
            .store
            .save_item(ScoredItem {
                raw_message_id: candidate.message.id,
                channel_id: channel.id,
                relevance_score,
                importance_score: importance,
                topic: result.topic,
                summary: result.summary,
                language: result.language,
                status,
                embedding: candidate.embedding,
            })
            .await;

        if let Err(err) = save_result {
            warn!(error = %err, "failed to persist scored item");
            return;
        }
        if let Err(err) = self.store.mark_processed(candidate.message.id).await {
            warn!(error = %err, "failed to mark raw message processed");
        }
    }
}

struct Candidate {
    message: RawMessage,
    channel: Channel,
    embedding: Option<Vec<f32>>,
    context: Vec<String>,
}

fn format_with_context(text: &str, context: &[String]) -> String {
    if context.is_empty() {
        text.to_string()
    } else {
        format!("{text}\n\n---\n{}", context.join("\n"))
    }
}

fn extract_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .filter(|w| w.starts_with("http://") || w.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use digest_core::clock::FixedClock;
    use digest_llm::batch::RawBatchResult;
    use digest_llm::{LlmGateway, Provider};
    use digest_store::memory::InMemoryStore;
    use digest_store::types::NewRawMessage;

    struct StubProvider;

    #[async_trait]
    impl Provider for StubProvider {
        async fn embed(&self, _text: &str) -> digest_llm::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
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
                    summary: "Satya Nadella announced version 12".to_string(),
                    language: "en".to_string(),
                })
                .collect())
        }

        async fn narrative(&self, _prompt: &str) -> digest_llm::Result<String> {
            Ok(String::new())
        }
    }

    fn worker() -> (PipelineWorker, Arc<InMemoryStore>, ChannelId) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let channel = Channel {
            id: ChannelId::new(),
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
        };
        store.upsert_channel(channel.clone());
        let gateway = Arc::new(LlmGateway::new(Box::new(StubProvider), 1000.0));
        let worker = PipelineWorker::new(
            store.clone(),
            gateway,
            Config {
                worker_batch_size: 10,
                relevance_threshold: 0.1,
                ..Config::default()
            },
            clock,
            Arc::new(crate::link_enricher::NoopLinkEnricher),
        );
        (worker, store, channel.id)
    }

    #[tokio::test]
    async fn admits_and_scores_a_clean_message() {
        let (worker, store, channel_id) = worker();
        store
            .upsert_raw_message(NewRawMessage {
                channel_id,
                source_msg_id: 1,
                timestamp: Utc::now(),
                text: "Rust 1.80 shipped today with new features".to_string(),
                media: None,
                canonical_hash: canonical_hash("Rust 1.80 shipped today with new features"),
                is_forward: false,
            })
            .await
            .unwrap();

        worker.run_once().await.unwrap();

        let unprocessed = store.list_unprocessed(10).await.unwrap();
        assert!(unprocessed.is_empty());
    }

    #[tokio::test]
    async fn strict_duplicate_is_skipped_without_llm_call() {
        let (worker, store, channel_id) = worker();
        let text = "breaking news about something";
        let hash = canonical_hash(text);
        store
            .upsert_raw_message(NewRawMessage {
                channel_id,
                source_msg_id: 1,
                timestamp: Utc::now(),
                text: text.to_string(),
                media: None,
                canonical_hash: hash.clone(),
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
                text: text.to_string(),
                media: None,
                canonical_hash: hash,
                is_forward: false,
            })
            .await
            .unwrap();
        worker.run_once().await.unwrap();

        assert!(store.list_unprocessed(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn too_short_message_is_rejected_not_scored() {
        let (worker, store, channel_id) = worker();
        store
            .upsert_raw_message(NewRawMessage {
                channel_id,
                source_msg_id: 1,
                timestamp: Utc::now(),
                text: "hi".to_string(),
                media: None,
                canonical_hash: canonical_hash("hi"),
                is_forward: false,
            })
            .await
            .unwrap();
        worker.run_once().await.unwrap();
        assert!(store.list_unprocessed(10).await.unwrap().is_empty());
    }
}
