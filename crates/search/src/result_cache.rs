//! TTL'd store of shaped search responses in Redis.
//!
//! Read and write failures are warnings; the cache never fails a search.

use std::time::Duration;

use tracing::{debug, warn};

use db::RedisKv;

use crate::types::SearchResponse;

#[derive(Clone)]
pub struct ResultCache {
  kv: RedisKv,
  ttl: Duration,
}

impl ResultCache {
  pub fn new(kv: RedisKv, ttl: Duration) -> Self {
    Self { kv, ttl }
  }

  pub async fn get(&self, key: &str) -> Option<SearchResponse> {
    match self.kv.get(key).await {
      Ok(Some(raw)) => match serde_json::from_str(&raw) {
        Ok(response) => {
          debug!(key, "result cache hit");
          Some(response)
        }
        Err(e) => {
          warn!(key, error = %e, "undecodable cached response, ignoring");
          None
        }
      },
      Ok(None) => None,
      Err(e) => {
        warn!(key, error = %e, "result cache read failed");
        None
      }
    }
  }

  /// Best-effort write.
  pub async fn put(&self, key: &str, response: &SearchResponse) {
    let raw = match serde_json::to_string(response) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key, error = %e, "response encode failed");
        return;
      }
    };
    if let Err(e) = self.kv.set_ex(key, &raw, self.ttl).await {
      warn!(key, error = %e, "result cache write failed");
    }
  }
}
