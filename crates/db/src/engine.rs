//! Search engine client (OpenSearch REST).
//!
//! Queries are built by the planner as `serde_json::Value` bodies; this
//! client only moves them over the wire and decodes the envelope.

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use scholar_core::{EngineDocument, config::EngineConfig};

use crate::{DbError, Result};

/// REST client bound to one index.
#[derive(Debug, Clone)]
pub struct SearchEngine {
  client: reqwest::Client,
  node: String,
  index: String,
  username: Option<String>,
  password: Option<String>,
}

impl SearchEngine {
  pub fn new(config: &EngineConfig) -> Self {
    Self {
      client: reqwest::Client::new(),
      node: config.node.trim_end_matches('/').to_string(),
      index: config.index.clone(),
      username: config.username.clone(),
      password: config.password.clone(),
    }
  }

  pub fn index_name(&self) -> &str {
    &self.index
  }

  fn request(&self, method: Method, path: &str) -> RequestBuilder {
    let url = format!("{}{}", self.node, path);
    let builder = self.client.request(method, url);
    match (&self.username, &self.password) {
      (Some(user), password) => builder.basic_auth(user, password.as_deref()),
      _ => builder,
    }
  }

  async fn expect_2xx(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %truncate(&body, 512), "engine request failed");
    Err(DbError::engine(status.as_u16(), body))
  }

  // ==========================================================================
  // Index management
  // ==========================================================================

  pub async fn index_exists(&self) -> Result<bool> {
    let response = self.request(Method::HEAD, &format!("/{}", self.index)).send().await?;
    match response.status() {
      StatusCode::OK => Ok(true),
      StatusCode::NOT_FOUND => Ok(false),
      status => {
        let body = response.text().await.unwrap_or_default();
        Err(DbError::engine(status.as_u16(), body))
      }
    }
  }

  pub async fn create_index(&self, mapping: &Value) -> Result<()> {
    let response = self
      .request(Method::PUT, &format!("/{}", self.index))
      .json(mapping)
      .send()
      .await?;
    Self::expect_2xx(response).await?;
    debug!(index = %self.index, "index created");
    Ok(())
  }

  /// Delete the index; an absent index is not an error.
  pub async fn delete_index(&self) -> Result<()> {
    let response = self.request(Method::DELETE, &format!("/{}", self.index)).send().await?;
    if response.status() == StatusCode::NOT_FOUND {
      return Ok(());
    }
    Self::expect_2xx(response).await?;
    debug!(index = %self.index, "index deleted");
    Ok(())
  }

  pub async fn count(&self) -> Result<u64> {
    #[derive(Deserialize)]
    struct CountResponse {
      count: u64,
    }
    let response = self.request(Method::GET, &format!("/{}/_count", self.index)).send().await?;
    let response = Self::expect_2xx(response).await?;
    Ok(response.json::<CountResponse>().await?.count)
  }

  /// Cluster status string (`green`/`yellow`/`red`).
  pub async fn cluster_health(&self) -> Result<String> {
    #[derive(Deserialize)]
    struct Health {
      status: String,
    }
    let response = self.request(Method::GET, "/_cluster/health").send().await?;
    let response = Self::expect_2xx(response).await?;
    Ok(response.json::<Health>().await?.status)
  }

  // ==========================================================================
  // Documents
  // ==========================================================================

  /// Bulk-index with immediate refresh; engine ids are generated server-side.
  ///
  /// Returns one outcome per input document, in order. A non-2xx item status
  /// is reported, not raised.
  pub async fn bulk_index(&self, documents: &[EngineDocument]) -> Result<Vec<BulkOutcome>> {
    if documents.is_empty() {
      return Ok(Vec::new());
    }
    let mut body = String::new();
    for document in documents {
      body.push_str("{\"index\":{}}\n");
      body.push_str(&serde_json::to_string(document).map_err(|e| DbError::Decode(e.to_string()))?);
      body.push('\n');
    }

    let response = self
      .request(Method::POST, &format!("/{}/_bulk?refresh=true", self.index))
      .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
      .body(body)
      .send()
      .await?;
    let response = Self::expect_2xx(response).await?;
    let bulk: BulkResponse = response.json().await?;

    if bulk.items.len() != documents.len() {
      return Err(DbError::Decode(format!(
        "bulk item count mismatch: sent {}, got {}",
        documents.len(),
        bulk.items.len()
      )));
    }

    Ok(
      bulk
        .items
        .into_iter()
        .map(|item| {
          let status = item.index.status;
          BulkOutcome {
            ok: (200..300).contains(&status),
            status,
            engine_id: item.index.id,
          }
        })
        .collect(),
    )
  }

  /// Execute a full search body against the index.
  pub async fn search(&self, body: &Value) -> Result<EngineResults> {
    let response = self
      .request(Method::POST, &format!("/{}/_search", self.index))
      .json(body)
      .send()
      .await?;
    let response = Self::expect_2xx(response).await?;
    let raw: RawSearch = response.json().await?;
    Ok(EngineResults::from(raw))
  }
}

fn truncate(s: &str, max: usize) -> &str {
  match s.char_indices().nth(max) {
    Some((idx, _)) => &s[..idx],
    None => s,
  }
}

// ============================================================================
// Response envelopes
// ============================================================================

/// Per-document outcome of a bulk index request.
#[derive(Debug, Clone)]
pub struct BulkOutcome {
  pub ok: bool,
  pub status: u16,
  pub engine_id: Option<String>,
}

/// One search hit; `source` carries whatever `_source` filter was requested.
#[derive(Debug, Clone)]
pub struct EngineHit {
  pub engine_id: String,
  pub score: Option<f64>,
  pub source: Value,
}

/// Decoded search response.
#[derive(Debug, Clone)]
pub struct EngineResults {
  pub took_ms: u64,
  pub total: u64,
  pub hits: Vec<EngineHit>,
  pub aggregations: Option<Value>,
}

impl EngineResults {
  /// Ordered authoritative ids carried in the hit sources.
  pub fn mongo_ids(&self) -> Vec<String> {
    self
      .hits
      .iter()
      .filter_map(|hit| hit.source.get("mongo_id").and_then(Value::as_str).map(String::from))
      .collect()
  }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
  #[allow(dead_code)]
  #[serde(default)]
  errors: bool,
  items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
  index: BulkItemStatus,
}

#[derive(Debug, Deserialize)]
struct BulkItemStatus {
  #[serde(rename = "_id")]
  id: Option<String>,
  status: u16,
}

#[derive(Debug, Deserialize)]
struct RawSearch {
  #[serde(default)]
  took: u64,
  hits: RawHits,
  #[serde(default)]
  aggregations: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawHits {
  #[serde(default)]
  total: Option<RawTotal>,
  #[serde(default)]
  hits: Vec<RawHit>,
}

// `track_total_hits=true` yields an object; some engines return a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTotal {
  Object { value: u64 },
  Number(u64),
}

#[derive(Debug, Deserialize)]
struct RawHit {
  #[serde(rename = "_id")]
  id: String,
  #[serde(rename = "_score", default)]
  score: Option<f64>,
  #[serde(rename = "_source", default)]
  source: Option<Value>,
}

impl From<RawSearch> for EngineResults {
  fn from(raw: RawSearch) -> Self {
    let total = match raw.hits.total {
      Some(RawTotal::Object { value }) | Some(RawTotal::Number(value)) => value,
      None => raw.hits.hits.len() as u64,
    };
    EngineResults {
      took_ms: raw.took,
      total,
      hits: raw
        .hits
        .hits
        .into_iter()
        .map(|hit| EngineHit {
          engine_id: hit.id,
          score: hit.score,
          source: hit.source.unwrap_or(Value::Null),
        })
        .collect(),
      aggregations: raw.aggregations,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn search_response_decodes_object_total() {
    let raw: RawSearch = serde_json::from_value(serde_json::json!({
      "took": 12,
      "hits": {
        "total": { "value": 2, "relation": "eq" },
        "hits": [
          { "_id": "e1", "_score": 0.72, "_source": { "mongo_id": "a1" } },
          { "_id": "e2", "_score": 0.41, "_source": { "mongo_id": "a2" } },
        ]
      },
      "aggregations": { "years": {} }
    }))
    .unwrap();
    let results = EngineResults::from(raw);
    assert_eq!(results.total, 2);
    assert_eq!(results.took_ms, 12);
    assert_eq!(results.mongo_ids(), vec!["a1".to_string(), "a2".to_string()]);
    assert!(results.aggregations.is_some());
  }

  #[test]
  fn search_response_decodes_numeric_total() {
    let raw: RawSearch = serde_json::from_value(serde_json::json!({
      "hits": { "total": 5, "hits": [] }
    }))
    .unwrap();
    assert_eq!(EngineResults::from(raw).total, 5);
  }

  #[test]
  fn bulk_response_decodes_item_statuses() {
    let bulk: BulkResponse = serde_json::from_value(serde_json::json!({
      "errors": true,
      "items": [
        { "index": { "_id": "e1", "status": 201 } },
        { "index": { "status": 429, "error": { "type": "es_rejected_execution_exception" } } },
      ]
    }))
    .unwrap();
    assert_eq!(bulk.items.len(), 2);
    assert_eq!(bulk.items[0].index.id.as_deref(), Some("e1"));
    assert_eq!(bulk.items[1].index.status, 429);
  }

  #[test]
  fn hit_order_is_preserved() {
    let raw: RawSearch = serde_json::from_value(serde_json::json!({
      "hits": {
        "total": { "value": 3 },
        "hits": [
          { "_id": "c", "_source": { "mongo_id": "3" } },
          { "_id": "a", "_source": { "mongo_id": "1" } },
          { "_id": "b", "_source": { "mongo_id": "2" } },
        ]
      }
    }))
    .unwrap();
    let results = EngineResults::from(raw);
    assert_eq!(results.mongo_ids(), vec!["3", "1", "2"]);
  }
}
