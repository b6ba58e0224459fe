//! The ingest pipeline: admission, dedup, LLM scoring, and persistence
//! (design §4.4).

pub mod link_enricher;
pub mod normalization;
pub mod scoring;
pub mod worker;

pub use link_enricher::{LinkEnricher, NoopLinkEnricher};
pub use worker::{PipelineWorker, RuntimeSettings};
