//! The LLM gateway: a rate-limited, circuit-broken wrapper around a
//! low-level [`Provider`] (design §4.2).

use async_trait::async_trait;

use crate::batch::{BatchMessage, RawBatchResult};
use crate::circuit_breaker::CircuitBreaker;
use crate::error::{GatewayError, Result};
use crate::rate_limiter::RateLimiter;

/// The narrow, swappable boundary to an actual embedding/chat-completion
/// backend. Implementations live behind feature-gated crates (or a test
/// mock); the gateway adds rate limiting and circuit breaking uniformly on
/// top, regardless of which provider is plugged in.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn chat_batch(
        &self,
        messages: &[BatchMessage],
        instructions: &str,
        language: &str,
        model: &str,
        tone: &str,
    ) -> Result<Vec<RawBatchResult>>;

    async fn narrative(&self, prompt: &str) -> Result<String>;
}

/// A single scored result, aligned to its input and flagged if the
/// provider failed to score it (design: "items with empty summary are
/// treated as failed").
#[derive(Debug, Clone)]
pub struct ScoredResult {
    pub relevance_score: f64,
    pub importance_score: f64,
    pub topic: String,
    pub summary: String,
    pub language: String,
}

impl TryFrom<RawBatchResult> for ScoredResult {
    type Error = GatewayError;

    fn try_from(raw: RawBatchResult) -> Result<Self> {
        if raw.is_failed() {
            return Err(GatewayError::Provider("empty summary".to_string()));
        }
        Ok(ScoredResult {
            relevance_score: raw.relevance_score,
            importance_score: raw.importance_score,
            topic: raw.topic,
            summary: raw.summary,
            language: raw.language,
        })
    }
}

/// Rate-limited, circuit-broken access to a [`Provider`].
pub struct LlmGateway {
    provider: Box<dyn Provider>,
    rate_limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl LlmGateway {
    #[must_use]
    pub fn new(provider: Box<dyn Provider>, requests_per_second: f64) -> Self {
        Self {
            provider,
            rate_limiter: RateLimiter::new(requests_per_second, 5),
            breaker: CircuitBreaker::new(),
        }
    }

    async fn guard<T, F>(&self, call: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        if self.breaker.is_open() {
            return Err(GatewayError::CircuitOpen);
        }
        self.rate_limiter.acquire().await;
        match call.await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(err)
            }
        }
    }

    pub async fn get_embedding(&self, text: &str) -> Result<Vec<f32>> {
        self.guard(self.provider.embed(text)).await
    }

    /// Index-aligned batch scoring. `instructions` is the rendered prompt
    /// template (design §4.2: versioned in Setting storage, with
    /// `{{LANG_INSTRUCTION}}`/`{{MESSAGE_COUNT}}` substituted by the
    /// caller) sent ahead of the batch. Returns one slot per input; a slot
    /// is `None` when alignment failed to find a match or the provider's
    /// result for that input was empty.
    pub async fn process_batch(
        &self,
        messages: &[BatchMessage],
        instructions: &str,
        language: &str,
        model: &str,
        tone: &str,
    ) -> Result<Vec<Option<ScoredResult>>> {
        let raw = self
            .guard(self.provider.chat_batch(messages, instructions, language, model, tone))
            .await?;
        let aligned = crate::batch::align(messages, &raw);
        Ok(aligned
            .into_iter()
            .map(|slot| slot.and_then(|r| ScoredResult::try_from(r).ok()))
            .collect())
    }

    pub async fn generate_narrative(&self, prompt: &str) -> Result<String> {
        self.guard(self.provider.narrative(prompt)).await
    }

    pub async fn summarize_cluster(&self, prompt: &str) -> Result<String> {
        self.guard(self.provider.narrative(prompt)).await
    }

    pub async fn generate_cluster_topic(&self, prompt: &str) -> Result<String> {
        self.guard(self.provider.narrative(prompt)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                return Err(GatewayError::Provider("flaky".to_string()));
            }
            Ok(vec![1.0, 0.0])
        }

        async fn chat_batch(
            &self,
            messages: &[BatchMessage],
            _instructions: &str,
            _language: &str,
            _model: &str,
            _tone: &str,
        ) -> Result<Vec<RawBatchResult>> {
            Ok(messages
                .iter()
                .enumerate()
                .map(|(i, m)| RawBatchResult {
                    index: i,
                    source_channel: m.source_channel.clone(),
                    relevance_score: 0.9,
                    importance_score: 0.9,
                    topic: "topic".to_string(),
                    summary: "summary".to_string(),
                    language: "en".to_string(),
                })
                .collect())
        }

        async fn narrative(&self, _prompt: &str) -> Result<String> {
            Ok("narrative".to_string())
        }
    }

    #[tokio::test]
    async fn circuit_opens_after_five_failures_and_fails_fast() {
        let provider = FlakyProvider {
            failures_remaining: AtomicU32::new(100),
        };
        let gateway = LlmGateway::new(Box::new(provider), 1000.0);
        for _ in 0..5 {
            assert!(gateway.get_embedding("x").await.is_err());
        }
        match gateway.get_embedding("x").await {
            Err(GatewayError::CircuitOpen) => {}
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn process_batch_is_index_aligned_and_length_matches_input() {
        let provider = FlakyProvider {
            failures_remaining: AtomicU32::new(0),
        };
        let gateway = LlmGateway::new(Box::new(provider), 1000.0);
        let messages = vec![
            BatchMessage {
                source_channel: "a".to_string(),
                text: "x".to_string(),
                has_media: false,
            },
            BatchMessage {
                source_channel: "b".to_string(),
                text: "y".to_string(),
                has_media: false,
            },
        ];
        let results = gateway
            .process_batch(&messages, "", "en", "model", "neutral")
            .await
            .unwrap();
        assert_eq!(results.len(), messages.len());
        assert!(results.iter().all(Option::is_some));
    }
}
