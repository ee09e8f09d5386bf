use thiserror::Error;

/// Errors raised by the indexing side.
#[derive(Debug, Error)]
pub enum IndexError {
  #[error("cache io error: {0}")]
  CacheIo(#[from] std::io::Error),
  #[error("cache encode error: {0}")]
  CacheEncode(String),
  #[error("store error: {0}")]
  Db(#[from] db::DbError),
  #[error("embedding error: {0}")]
  Embedding(#[from] embedding::EmbeddingError),
  #[error("pipeline task failed: {0}")]
  Join(String),
  #[error("cancelled")]
  Cancelled,
}
