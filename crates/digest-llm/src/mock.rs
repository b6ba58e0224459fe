//! A deterministic in-memory [`Provider`] for tests: scores are derived
//! from the input text so pipeline/scheduler tests can assert on them
//! without a real model.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::batch::{BatchMessage, RawBatchResult};
use crate::error::Result;
use crate::gateway::Provider;

/// A canned response for one input text, keyed by exact match.
#[derive(Debug, Clone)]
pub struct MockScore {
    pub relevance_score: f64,
    pub importance_score: f64,
    pub topic: String,
    pub summary: String,
}

/// A scriptable mock provider. Unscripted inputs get a default mid-range
/// score so batches of mixed scripted/unscripted messages still produce a
/// result for every input.
#[derive(Default)]
pub struct MockProvider {
    scores: Mutex<HashMap<String, MockScore>>,
}

impl MockProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, text: impl Into<String>, score: MockScore) {
        self.scores.lock().expect("mutex poisoned").insert(text.into(), score);
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // A simple, deterministic pseudo-embedding: byte histogram folded
        // into 8 buckets, so near-duplicate texts land close together.
        let mut buckets = [0f32; 8];
        for b in text.bytes() {
            buckets[(b as usize) % 8] += 1.0;
        }
        let norm: f32 = buckets.iter().map(|b| b * b).sum::<f32>().sqrt().max(1e-6);
        Ok(buckets.iter().map(|b| b / norm).collect())
    }

    async fn chat_batch(
        &self,
        messages: &[BatchMessage],
        _instructions: &str,
        _language: &str,
        _model: &str,
        _tone: &str,
    ) -> Result<Vec<RawBatchResult>> {
        let scores = self.scores.lock().expect("mutex poisoned");
        Ok(messages
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let score = scores.get(&m.text).cloned().unwrap_or(MockScore {
                    relevance_score: 0.5,
                    importance_score: 0.5,
                    topic: "general".to_string(),
                    summary: format!("summary of: {}", m.text),
                });
                RawBatchResult {
                    index: i,
                    source_channel: m.source_channel.clone(),
                    relevance_score: score.relevance_score,
                    importance_score: score.importance_score,
                    topic: score.topic,
                    summary: score.summary,
                    language: "en".to_string(),
                }
            })
            .collect())
    }

    async fn narrative(&self, prompt: &str) -> Result<String> {
        Ok(format!("narrative: {prompt}"))
    }
}
