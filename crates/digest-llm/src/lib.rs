//! Rate-limited, circuit-broken access to embedding and chat-completion
//! capabilities, with index-aligned batch scoring (design §4.2).

pub mod batch;
pub mod circuit_breaker;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod prompts;
pub mod rate_limiter;

pub use batch::{BatchMessage, RawBatchResult};
pub use error::{GatewayError, Result};
pub use gateway::{LlmGateway, Provider, ScoredResult};
pub use prompts::render;

