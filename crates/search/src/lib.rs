//! Hybrid search: query planning, orchestration, and result caching.

pub mod cache_key;
pub mod collaborators;
pub mod facets;
pub mod health;
pub mod planner;
pub mod result_cache;
pub mod service;
pub mod similar;
pub mod types;

use thiserror::Error;

pub use result_cache::ResultCache;
pub use service::SearchService;
pub use types::{Facets, Filters, SearchField, SearchRequest, SearchResponse, SortMode};

/// Fixed user-facing message for the zero-BM25 short circuit.
pub const NO_RESULTS_MESSAGE: &str = "No relevant results found for your query";

/// Errors surfaced by the search side. Each maps to one HTTP status at the
/// edge; internal detail stays in the logs.
#[derive(Debug, Error)]
pub enum SearchError {
  #[error("validation error: {0}")]
  Validation(String),
  #[error("embedding service unavailable")]
  EmbeddingUnavailable,
  #[error("search engine error: {0}")]
  Engine(String),
  #[error("document store error: {0}")]
  Store(String),
  #[error("not found")]
  NotFound,
}

impl From<db::DbError> for SearchError {
  fn from(e: db::DbError) -> Self {
    match e {
      db::DbError::Mongo(_) => SearchError::Store(e.to_string()),
      db::DbError::InvalidId(_) => SearchError::NotFound,
      db::DbError::Redis(_) => SearchError::Store(e.to_string()),
      db::DbError::Cancelled => SearchError::Store(e.to_string()),
      db::DbError::Engine { .. } | db::DbError::Http(_) | db::DbError::Decode(_) => {
        SearchError::Engine(e.to_string())
      }
    }
  }
}

impl From<embedding::EmbeddingError> for SearchError {
  fn from(_: embedding::EmbeddingError) -> Self {
    SearchError::EmbeddingUnavailable
  }
}
