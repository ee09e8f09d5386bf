//! HTTP client for the embedding service.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scholar_core::{EMBEDDING_DIM, config::EmbeddingConfig};

use crate::{Embedder, EmbeddingError, RetryConfig};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
  texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
  embeddings: Vec<Vec<f32>>,
}

/// Client for `POST {base_url}/embed`.
///
/// All request discipline lives here: at most `max_concurrent` requests in
/// flight (semaphore), a minimum gap between consecutive request starts,
/// and per-request retry with exponential backoff. Callers block on the
/// semaphore until a slot frees or cancellation fires.
pub struct HttpEmbedder {
  client: reqwest::Client,
  base_url: String,
  retry: RetryConfig,
  timeout: Duration,
  permits: Semaphore,
  min_gap: Duration,
  /// Start instant reserved for the next request.
  next_slot: Mutex<Option<Instant>>,
}

impl HttpEmbedder {
  pub fn new(config: &EmbeddingConfig) -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url: config.base_url.trim_end_matches('/').to_string(),
      retry: RetryConfig::default().with_max_retries(config.max_retries),
      timeout: config.timeout(),
      permits: Semaphore::new(config.max_concurrent.max(1)),
      min_gap: config.min_gap(),
      next_slot: Mutex::new(None),
    }
  }

  fn embed_url(&self) -> String {
    format!("{}/embed", self.base_url)
  }

  fn health_url(&self) -> String {
    format!("{}/health", self.base_url)
  }

  /// Reserve the next request start, sleeping out the remainder of the
  /// minimum gap since the previous reservation.
  async fn wait_for_gap(&self) {
    let wait = {
      let mut next_slot = self.next_slot.lock().await;
      let now = Instant::now();
      let start = match *next_slot {
        Some(slot) if slot > now => slot,
        _ => now,
      };
      *next_slot = Some(start + self.min_gap);
      start.saturating_duration_since(now)
    };
    if !wait.is_zero() {
      tokio::time::sleep(wait).await;
    }
  }

  async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let response = self
      .client
      .post(self.embed_url())
      .timeout(self.timeout)
      .json(&EmbedRequest { texts })
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      warn!(status = status.as_u16(), "embedding request failed");
      return Err(EmbeddingError::Service {
        status: status.as_u16(),
        body,
      });
    }

    let decoded: EmbedResponse = response.json().await?;
    if decoded.embeddings.len() != texts.len() {
      return Err(EmbeddingError::Mismatch(format!(
        "sent {} texts, got {} vectors",
        texts.len(),
        decoded.embeddings.len()
      )));
    }
    if let Some(vector) = decoded.embeddings.first()
      && vector.len() != EMBEDDING_DIM
    {
      warn!(
        got = vector.len(),
        expected = EMBEDDING_DIM,
        "unexpected embedding dimensions"
      );
    }
    Ok(decoded.embeddings)
  }

  async fn embed_with_retry(
    &self,
    texts: &[String],
    cancel: &CancellationToken,
  ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
      return Ok(Vec::new());
    }

    let _permit = tokio::select! {
      biased;
      _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
      permit = self.permits.acquire() => permit.map_err(|_| EmbeddingError::Cancelled)?,
    };

    let mut last_error = None;
    for attempt in 0..=self.retry.max_retries {
      if attempt > 0 {
        let backoff = self.retry.backoff_for_attempt(attempt - 1);
        debug!(attempt, ?backoff, "retrying embedding request");
        tokio::select! {
          biased;
          _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
          _ = tokio::time::sleep(backoff) => {}
        }
      }

      self.wait_for_gap().await;

      let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(EmbeddingError::Cancelled),
        result = self.request_once(texts) => result,
      };

      match result {
        Ok(vectors) => return Ok(vectors),
        Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
          warn!(attempt = attempt + 1, error = %e, "retryable embedding error");
          last_error = Some(e);
        }
        Err(e) => return Err(e),
      }
    }

    let last = last_error.map(|e| e.to_string()).unwrap_or_else(|| "retries exhausted".into());
    Err(EmbeddingError::Unavailable(last))
  }

  pub fn max_retries(&self) -> u32 {
    self.retry.max_retries
  }
}

#[async_trait]
impl Embedder for HttpEmbedder {
  async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.embed_with_retry(texts, &CancellationToken::new()).await
  }

  async fn embed_cancellable(
    &self,
    texts: &[String],
    cancel: &CancellationToken,
  ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.embed_with_retry(texts, cancel).await
  }

  async fn is_available(&self) -> bool {
    match self
      .client
      .get(self.health_url())
      .timeout(Duration::from_secs(5))
      .send()
      .await
    {
      Ok(response) => response.status().is_success(),
      Err(_) => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn embedder() -> HttpEmbedder {
    HttpEmbedder::new(&EmbeddingConfig::default())
  }

  #[test]
  fn urls_derive_from_base() {
    let client = embedder();
    assert_eq!(client.embed_url(), "http://localhost:8001/embed");
    assert_eq!(client.health_url(), "http://localhost:8001/health");
  }

  #[test]
  fn trailing_slash_is_trimmed() {
    let config = EmbeddingConfig {
      base_url: "http://embed:9000/".into(),
      ..Default::default()
    };
    let client = HttpEmbedder::new(&config);
    assert_eq!(client.embed_url(), "http://embed:9000/embed");
  }

  #[tokio::test]
  async fn empty_batch_returns_without_request() {
    let client = embedder();
    let vectors = client.embed(&[]).await.unwrap();
    assert!(vectors.is_empty());
  }

  #[tokio::test]
  async fn cancellation_aborts_without_retry() {
    let client = embedder();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = client.embed_cancellable(&["text".to_string()], &cancel).await;
    assert!(matches!(result, Err(EmbeddingError::Cancelled)));
  }

  #[tokio::test(start_paused = true)]
  async fn gap_reservations_are_spaced() {
    let client = embedder();
    let start = Instant::now();
    client.wait_for_gap().await;
    client.wait_for_gap().await;
    client.wait_for_gap().await;
    // Third reservation starts two gaps after the first.
    assert!(start.elapsed() >= Duration::from_millis(200));
  }

  // Integration test; requires a running embedding service.
  #[tokio::test]
  async fn embed_round_trip_live() {
    let client = embedder();
    if !client.is_available().await {
      eprintln!("embedding service not available, skipping test");
      return;
    }
    let vectors = client.embed(&["carbon nanotubes".to_string()]).await.unwrap();
    assert_eq!(vectors.len(), 1);
  }
}
