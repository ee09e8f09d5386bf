//! Client for the remote embedding service.
//!
//! `HttpEmbedder` owns the whole request discipline: a fixed in-flight cap,
//! a minimum inter-request gap, and retry with exponential backoff.
//! `CachedEmbedder` layers a TTL'd key-value cache over single-text query
//! embedding.

mod cached;
mod client;
mod retry;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use cached::{CachedEmbedder, EmbeddingCache, RedisEmbeddingCache, query_cache_key};
pub use client::HttpEmbedder;
pub use retry::RetryConfig;

/// Errors from the embedding client.
#[derive(Debug, Error)]
pub enum EmbeddingError {
  #[error("network error: {0}")]
  Network(String),
  #[error("embedding service returned {status}: {body}")]
  Service { status: u16, body: String },
  #[error("embedding request timed out")]
  Timeout,
  #[error("embedding service unavailable: {0}")]
  Unavailable(String),
  #[error("embedding response mismatch: {0}")]
  Mismatch(String),
  #[error("cancelled")]
  Cancelled,
}

impl From<reqwest::Error> for EmbeddingError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      EmbeddingError::Timeout
    } else {
      EmbeddingError::Network(e.to_string())
    }
  }
}

impl EmbeddingError {
  /// Whether another attempt could succeed. Non-2xx statuses and
  /// connect/read timeouts are retryable; cancellation never is.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      EmbeddingError::Network(_) | EmbeddingError::Timeout | EmbeddingError::Service { .. }
    )
  }
}

/// Text-to-vector provider.
#[async_trait]
pub trait Embedder: Send + Sync {
  /// Embed a batch; the output is order-preserving and length-equal.
  async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

  /// Embed a batch, aborting without retry when `cancel` fires.
  async fn embed_cancellable(
    &self,
    texts: &[String],
    _cancel: &CancellationToken,
  ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.embed(texts).await
  }

  /// Embed one query string.
  async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let texts = [text.to_string()];
    let mut vectors = self.embed(&texts).await?;
    vectors
      .pop()
      .ok_or_else(|| EmbeddingError::Mismatch("empty response for single text".into()))
  }

  /// Liveness of the remote service.
  async fn is_available(&self) -> bool;
}
