//! The poster and anomaly notifier are external collaborators (design §6 /
//! §1 Non-goals): the scheduler only needs trait boundaries so
//! `processWindow` can call them without caring how delivery actually
//! happens.

use async_trait::async_trait;

/// Sends rendered digests and notifications to the chat platform.
#[async_trait]
pub trait Poster: Send + Sync {
    async fn send_digest(&self, chat_id: &str, body: &str, digest_id: &str) -> Option<String>;
    async fn send_digest_with_image(
        &self,
        chat_id: &str,
        body: &str,
        digest_id: &str,
        image_bytes: &[u8],
    ) -> Option<String>;
    async fn send_notification(&self, body: &str);
}

/// Records anomalies (empty windows, backlog) as a single coalesced
/// notification per scheduler pass.
#[async_trait]
pub trait AnomalyNotifier: Send + Sync {
    async fn notify(&self, anomalies: &[crate::selection::Anomaly]);
}

/// A poster/notifier that drops everything, for tests and for deployments
/// that only care about the persisted Digest rows.
#[derive(Debug, Default)]
pub struct NoopPoster;

#[async_trait]
impl Poster for NoopPoster {
    async fn send_digest(&self, _chat_id: &str, _body: &str, _digest_id: &str) -> Option<String> {
        None
    }

    async fn send_digest_with_image(
        &self,
        _chat_id: &str,
        _body: &str,
        _digest_id: &str,
        _image_bytes: &[u8],
    ) -> Option<String> {
        None
    }

    async fn send_notification(&self, _body: &str) {}
}

#[async_trait]
impl AnomalyNotifier for NoopPoster {
    async fn notify(&self, _anomalies: &[crate::selection::Anomaly]) {}
}
