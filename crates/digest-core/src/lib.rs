//! Core data model, error taxonomy, configuration surface, and shared
//! numeric helpers for the digest engine.

pub mod clock;
pub mod config;
pub mod error;
pub mod math;
pub mod model;

pub use clock::Clock;
pub use config::Config;
pub use error::{Error, Result};
