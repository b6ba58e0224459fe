//! Link enrichment is an external collaborator (design §1 Non-goals): the
//! pipeline only needs a best-effort trait boundary so Phase C can call it
//! without caring how URLs actually get fetched.

use async_trait::async_trait;

/// Resolves a URL found in a message into extracted text content.
/// Failures never block the pipeline (design §4.4 Phase C).
#[async_trait]
pub trait LinkEnricher: Send + Sync {
    async fn enrich(&self, url: &str) -> Option<String>;
}

/// The default enricher: does nothing. Used whenever link enrichment is
/// disabled in configuration.
#[derive(Debug, Default)]
pub struct NoopLinkEnricher;

#[async_trait]
impl LinkEnricher for NoopLinkEnricher {
    async fn enrich(&self, _url: &str) -> Option<String> {
        None
    }
}
