//! Query-embedding cache wrapper.
//!
//! Only single-text query embedding is cached; document batches always go
//! to the service. Cache failures are logged and never fail the call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use db::RedisKv;

use crate::{Embedder, EmbeddingError};

/// Cache key for a query text: `embed:` + first 16 hex chars of SHA-256.
pub fn query_cache_key(text: &str) -> String {
  let digest = Sha256::digest(text.as_bytes());
  let full = hex::encode(digest);
  format!("embed:{}", &full[..16])
}

/// Key-value store for query vectors.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
  async fn get(&self, key: &str) -> Option<Vec<f32>>;
  async fn put(&self, key: &str, vector: &[f32], ttl: Duration);
}

/// Redis-backed vector cache; values are JSON float arrays.
pub struct RedisEmbeddingCache {
  kv: RedisKv,
}

impl RedisEmbeddingCache {
  pub fn new(kv: RedisKv) -> Self {
    Self { kv }
  }
}

#[async_trait]
impl EmbeddingCache for RedisEmbeddingCache {
  async fn get(&self, key: &str) -> Option<Vec<f32>> {
    match self.kv.get(key).await {
      Ok(Some(raw)) => match serde_json::from_str(&raw) {
        Ok(vector) => Some(vector),
        Err(e) => {
          warn!(key, error = %e, "undecodable cached embedding, ignoring");
          None
        }
      },
      Ok(None) => None,
      Err(e) => {
        warn!(key, error = %e, "embedding cache read failed");
        None
      }
    }
  }

  async fn put(&self, key: &str, vector: &[f32], ttl: Duration) {
    let raw = match serde_json::to_string(vector) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key, error = %e, "embedding cache encode failed");
        return;
      }
    };
    if let Err(e) = self.kv.set_ex(key, &raw, ttl).await {
      warn!(key, error = %e, "embedding cache write failed");
    }
  }
}

/// Embedder wrapper that caches query vectors.
pub struct CachedEmbedder<E> {
  inner: E,
  cache: Arc<dyn EmbeddingCache>,
  ttl: Duration,
}

impl<E: Embedder> CachedEmbedder<E> {
  pub fn new(inner: E, cache: Arc<dyn EmbeddingCache>, ttl: Duration) -> Self {
    Self { inner, cache, ttl }
  }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
  async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.inner.embed(texts).await
  }

  async fn embed_cancellable(
    &self,
    texts: &[String],
    cancel: &CancellationToken,
  ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    self.inner.embed_cancellable(texts, cancel).await
  }

  async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
    let key = query_cache_key(text);
    if let Some(vector) = self.cache.get(&key).await {
      debug!(key, "query embedding cache hit");
      return Ok(vector);
    }
    let vector = self.inner.embed_query(text).await?;
    self.cache.put(&key, &vector, self.ttl).await;
    Ok(vector)
  }

  async fn is_available(&self) -> bool {
    self.inner.is_available().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<f32>>>,
  }

  impl MemoryCache {
    fn new() -> Self {
      Self {
        entries: Mutex::new(HashMap::new()),
      }
    }
  }

  #[async_trait]
  impl EmbeddingCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<f32>> {
      self.entries.lock().unwrap().get(key).cloned()
    }

    async fn put(&self, key: &str, vector: &[f32], _ttl: Duration) {
      self.entries.lock().unwrap().insert(key.to_string(), vector.to_vec());
    }
  }

  struct CountingEmbedder {
    calls: AtomicUsize,
  }

  #[async_trait]
  impl Embedder for CountingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
    }

    async fn is_available(&self) -> bool {
      true
    }
  }

  #[test]
  fn cache_key_has_namespace_and_sixteen_hex_chars() {
    let key = query_cache_key("carbon nanotubes");
    assert!(key.starts_with("embed:"));
    assert_eq!(key.len(), "embed:".len() + 16);
    // Deterministic across calls.
    assert_eq!(key, query_cache_key("carbon nanotubes"));
    assert_ne!(key, query_cache_key("carbon nanotube"));
  }

  #[tokio::test]
  async fn query_hit_skips_inner_embedder() {
    let cached = CachedEmbedder::new(
      CountingEmbedder { calls: AtomicUsize::new(0) },
      Arc::new(MemoryCache::new()),
      Duration::from_secs(60),
    );

    let first = cached.embed_query("q").await.unwrap();
    let second = cached.embed_query("q").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn batch_embedding_is_never_cached() {
    let cached = CachedEmbedder::new(
      CountingEmbedder { calls: AtomicUsize::new(0) },
      Arc::new(MemoryCache::new()),
      Duration::from_secs(60),
    );

    let texts = vec!["a".to_string(), "b".to_string()];
    cached.embed(&texts).await.unwrap();
    cached.embed(&texts).await.unwrap();
    assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
  }
}
