//! Shared domain model and configuration for the scholar search platform.

pub mod config;
pub mod domain;

pub use config::Config;
pub use domain::{
  Author, CacheEntry, Document, EMBEDDING_DIM, EngineAuthor, EngineDocument, Person,
};
