//! Clients for the three external stores: the authoritative MongoDB document
//! store, the OpenSearch engine (REST), and the Redis key-value cache.

mod documents;
mod engine;
mod error;
mod kv;

pub use documents::DocumentStore;
pub use engine::{BulkOutcome, EngineHit, EngineResults, SearchEngine};
pub use error::{DbError, Result};
pub use kv::RedisKv;
