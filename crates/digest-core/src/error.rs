//! Shared error taxonomy.
//!
//! Every component classifies its failures into the four buckets from the
//! design: [`Error::Transient`] failures are retried on the next poll,
//! [`Error::Logical`] failures are recorded against the offending row,
//! [`Error::Fatal`] failures abort the process, and [`Error::Anomaly`]
//! failures are coalesced into a single notification per scheduler pass.

use thiserror::Error;

/// Errors surfaced by the digest engine's core crates.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Retry on the next poll/tick: database disconnects, rate-limit
    /// exhaustion, LLM timeouts, an open circuit breaker.
    #[error("transient error: {0}")]
    Transient(String),

    /// Recorded against the affected `Item` with a retry schedule: empty
    /// LLM summary, misaligned batch results, an invalid setting value.
    #[error("logical error: {0}")]
    Logical(String),

    /// A required startup option is missing or invalid; the process exits
    /// non-zero.
    #[error("fatal configuration error: {0}")]
    Fatal(String),

    /// An empty window with items available, or a sustained backlog.
    /// Coalesced by the scheduler rather than propagated as a hard error.
    #[error("anomaly: {0}")]
    Anomaly(String),

    /// A row was requested that does not exist. Optional-path callers
    /// convert this to a zero value rather than propagating it.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness or advisory-lock precondition was violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// JSON (de)serialization failure, usually while reading/writing a
    /// [`crate::model::Setting`] value.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for failures the caller should retry on its next tick.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

/// Result alias used throughout the digest engine.
pub type Result<T> = std::result::Result<T, Error>;
