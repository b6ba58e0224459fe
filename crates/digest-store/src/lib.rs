//! Transactional persistence, advisory locks, and vector similarity search
//! for the digest engine (design §4.1).

pub mod memory;
pub mod traits;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
pub use traits::{DigestWrite, ItemWithEmbedding, Store};

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;
