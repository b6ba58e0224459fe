//! Heuristic admission filter and strict/semantic duplicate detection
//! (design §4.3).

pub mod dedup;
pub mod heuristic;

pub use dedup::canonical_hash;
pub use heuristic::{admit, relevance_gate, FilterConfig, FilterMode, Rejection};

