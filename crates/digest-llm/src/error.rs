//! LLM gateway error type.

use thiserror::Error;

/// Errors the gateway can return. All convert to [`digest_core::Error::Transient`]
/// at call sites, since every one of them is meant to be retried on the
/// pipeline's next tick.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Five consecutive failures tripped the breaker; no network call was made.
    #[error("circuit open")]
    CircuitOpen,

    /// The underlying provider call failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// `ProcessBatch` returned a different number of results than inputs
    /// after alignment, or results could not be aligned at all.
    #[error("batch alignment error: {0}")]
    Alignment(String),
}

impl From<GatewayError> for digest_core::Error {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::CircuitOpen => digest_core::Error::Transient("circuit open".to_string()),
            GatewayError::Provider(msg) => digest_core::Error::Transient(msg),
            GatewayError::Alignment(msg) => digest_core::Error::Logical(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
