//! Environment-driven configuration.
//!
//! One `Config` value is built at startup and handed to every component;
//! nothing reads the environment after construction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Sections
// ============================================================================

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host: "0.0.0.0".into(),
      port: 3000,
    }
  }
}

/// Authoritative document store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
  pub uri: String,
  pub database: String,
  pub documents_collection: String,
  pub people_collection: String,
}

impl Default for MongoConfig {
  fn default() -> Self {
    Self {
      uri: "mongodb://localhost:27017".into(),
      database: "research".into(),
      documents_collection: "documents".into(),
      people_collection: "people".into(),
    }
  }
}

/// Search engine connection and index name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
  pub node: String,
  pub username: Option<String>,
  pub password: Option<String>,
  pub index: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      node: "http://localhost:9200".into(),
      username: None,
      password: None,
      index: "research_documents".into(),
    }
  }
}

/// Redis key-value store used by the result and query-embedding caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
  pub url: String,
}

impl Default for RedisConfig {
  fn default() -> Self {
    Self {
      url: "redis://localhost:6379".into(),
    }
  }
}

/// Remote embedding service client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
  pub base_url: String,
  pub timeout_secs: u64,
  pub max_retries: u32,
  /// In-flight request cap, regardless of caller count.
  pub max_concurrent: usize,
  /// Minimum gap between consecutive requests.
  pub min_gap_ms: u64,
  /// TTL for cached query embeddings.
  pub query_cache_ttl_secs: u64,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8001".into(),
      timeout_secs: 60,
      max_retries: 3,
      max_concurrent: 2,
      min_gap_ms: 100,
      query_cache_ttl_secs: 86_400,
    }
  }
}

impl EmbeddingConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn min_gap(&self) -> Duration {
    Duration::from_millis(self.min_gap_ms)
  }
}

/// Batch pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
  pub mongo_batch_size: usize,
  pub embed_batch_size: usize,
  pub bulk_size: usize,
  pub num_workers: usize,
  pub cache_dir: String,
  /// Post-write delay for back-sync bulk updates (free-tier quota).
  pub mongo_bulk_delay_ms: u64,
}

impl Default for IndexerConfig {
  fn default() -> Self {
    Self {
      mongo_batch_size: 100,
      embed_batch_size: 128,
      bulk_size: 100,
      num_workers: 8,
      cache_dir: ".cache".into(),
      mongo_bulk_delay_ms: 50,
    }
  }
}

impl IndexerConfig {
  /// Embed/index worker count; always at least two.
  pub fn workers(&self) -> usize {
    self.num_workers.max(2)
  }
}

/// Search-side behavior toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
  pub result_cache_ttl_secs: u64,
  /// Enable the related-people enrichment on search responses.
  pub related_people: bool,
  /// Return arbitrary people records when no email matches.
  pub related_people_fallback: bool,
}

impl Default for SearchConfig {
  fn default() -> Self {
    Self {
      result_cache_ttl_secs: 300,
      related_people: true,
      related_people_fallback: false,
    }
  }
}

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  pub mongo: MongoConfig,
  pub engine: EngineConfig,
  pub redis: RedisConfig,
  pub embedding: EmbeddingConfig,
  pub indexer: IndexerConfig,
  pub search: SearchConfig,
}

impl Config {
  /// Build a config from the process environment, falling back to defaults
  /// for anything unset or unparsable.
  pub fn from_env() -> Self {
    let d = Config::default();
    Self {
      server: ServerConfig {
        host: env_string("HOST", d.server.host),
        port: env_parse("PORT", d.server.port),
      },
      mongo: MongoConfig {
        uri: env_string("MONGODB_URI", d.mongo.uri),
        database: env_string("MONGODB_DATABASE", d.mongo.database),
        documents_collection: env_string("MONGODB_DOCUMENTS_COLLECTION", d.mongo.documents_collection),
        people_collection: env_string("MONGODB_PEOPLE_COLLECTION", d.mongo.people_collection),
      },
      engine: EngineConfig {
        node: env_string("OPENSEARCH_NODE", d.engine.node),
        username: std::env::var("OPENSEARCH_USER").ok().filter(|v| !v.is_empty()),
        password: std::env::var("OPENSEARCH_PASSWORD").ok().filter(|v| !v.is_empty()),
        index: env_string("OPENSEARCH_INDEX", d.engine.index),
      },
      redis: RedisConfig {
        url: env_string("REDIS_URL", d.redis.url),
      },
      embedding: EmbeddingConfig {
        base_url: env_string("EMBEDDING_SERVICE_URL", d.embedding.base_url),
        timeout_secs: env_parse("EMBEDDING_TIMEOUT", d.embedding.timeout_secs),
        max_retries: env_parse("MAX_RETRIES", d.embedding.max_retries),
        max_concurrent: env_parse("EMBED_MAX_CONCURRENT", d.embedding.max_concurrent),
        min_gap_ms: env_parse("EMBED_MIN_GAP_MS", d.embedding.min_gap_ms),
        query_cache_ttl_secs: env_parse("EMBED_CACHE_TTL", d.embedding.query_cache_ttl_secs),
      },
      indexer: IndexerConfig {
        mongo_batch_size: env_parse("MONGO_BATCH_SIZE", d.indexer.mongo_batch_size),
        embed_batch_size: env_parse("EMBED_BATCH_SIZE", d.indexer.embed_batch_size),
        bulk_size: env_parse("OPENSEARCH_BULK_SIZE", d.indexer.bulk_size),
        num_workers: env_parse("NUM_WORKERS", d.indexer.num_workers),
        cache_dir: env_string("CACHE_DIR", d.indexer.cache_dir),
        mongo_bulk_delay_ms: env_parse("MONGO_BULK_DELAY_MS", d.indexer.mongo_bulk_delay_ms),
      },
      search: SearchConfig {
        result_cache_ttl_secs: env_parse("RESULT_CACHE_TTL", d.search.result_cache_ttl_secs),
        related_people: env_parse("RELATED_PEOPLE", d.search.related_people),
        related_people_fallback: env_parse("RELATED_PEOPLE_FALLBACK", d.search.related_people_fallback),
      },
    }
  }
}

// ============================================================================
// Env helpers
// ============================================================================

fn env_string(key: &str, default: String) -> String {
  match std::env::var(key) {
    Ok(v) if !v.is_empty() => v,
    _ => default,
  }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
  match std::env::var(key) {
    Ok(v) => parse_or(Some(v), default),
    Err(_) => default,
  }
}

/// Parse a raw value, logging and falling back to the default when invalid.
fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
  match raw {
    Some(v) if !v.is_empty() => match v.parse() {
      Ok(parsed) => parsed,
      Err(_) => {
        tracing::warn!(value = %v, "unparsable config value, using default");
        default
      }
    },
    _ => default,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_contract() {
    let config = Config::default();
    assert_eq!(config.server.port, 3000);
    assert_eq!(config.engine.index, "research_documents");
    assert_eq!(config.indexer.mongo_batch_size, 100);
    assert_eq!(config.indexer.embed_batch_size, 128);
    assert_eq!(config.indexer.bulk_size, 100);
    assert_eq!(config.indexer.num_workers, 8);
    assert_eq!(config.embedding.max_retries, 3);
    assert_eq!(config.embedding.max_concurrent, 2);
    assert_eq!(config.embedding.min_gap_ms, 100);
    assert_eq!(config.search.result_cache_ttl_secs, 300);
    assert_eq!(config.embedding.query_cache_ttl_secs, 86_400);
  }

  #[test]
  fn parse_or_falls_back_on_garbage() {
    assert_eq!(parse_or(Some("not-a-number".into()), 42_usize), 42);
    assert_eq!(parse_or(Some("7".into()), 42_usize), 7);
    assert_eq!(parse_or::<usize>(None, 42), 42);
    assert_eq!(parse_or(Some(String::new()), 42_usize), 42);
  }

  #[test]
  fn worker_floor_is_two() {
    let indexer = IndexerConfig {
      num_workers: 1,
      ..Default::default()
    };
    assert_eq!(indexer.workers(), 2);
  }

  #[test]
  fn bool_values_parse() {
    assert!(parse_or(Some("true".into()), false));
    assert!(!parse_or(Some("false".into()), true));
  }
}
