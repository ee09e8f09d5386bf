//! "More like this" over the engine's stored vectors.

use serde_json::{Value, json};

use crate::{
  SearchError,
  service::SearchService,
  types::{SimilarItem, SimilarResponse, SimilarSource},
};

const DEFAULT_LIMIT: u32 = 5;
const MAX_LIMIT: u32 = 50;
/// Oversampling applied to k so the source and thin hydrations still leave
/// `limit` usable neighbors.
const K_MARGIN: u32 = 5;

/// Lookup of the source engine document by authoritative id.
pub(crate) fn source_query(id: &str) -> Value {
  json!({
    "size": 1,
    "query": { "term": { "mongo_id": id } },
    "_source": ["mongo_id", "title", "subject_area", "embedding"],
  })
}

/// k-NN over the source vector, excluding the source itself.
pub(crate) fn neighbors_query(vector: &[f32], exclude_id: &str, limit: u32) -> Value {
  json!({
    "size": limit,
    "query": {
      "bool": {
        "must": [
          { "knn": { "embedding": { "vector": vector, "k": limit + K_MARGIN } } }
        ],
        "must_not": [
          { "term": { "mongo_id": exclude_id } }
        ]
      }
    },
    "_source": ["mongo_id"],
  })
}

impl SearchService {
  /// `GET /document/{id}/similar?limit=`
  pub async fn similar(&self, id: &str, limit: Option<u32>) -> Result<SimilarResponse, SearchError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
      return Err(SearchError::Validation(format!(
        "limit must be between 1 and {MAX_LIMIT}"
      )));
    }

    let source_results = self.engine().search(&source_query(id)).await?;
    let Some(source_hit) = source_results.hits.first() else {
      return Err(SearchError::NotFound);
    };
    let source = &source_hit.source;
    let vector: Vec<f32> = source
      .get("embedding")
      .and_then(Value::as_array)
      .map(|values| values.iter().filter_map(Value::as_f64).map(|v| v as f32).collect())
      .unwrap_or_default();
    if vector.is_empty() {
      return Err(SearchError::Engine("source document has no embedding".into()));
    }

    let neighbors = self.engine().search(&neighbors_query(&vector, id, limit)).await?;
    let ids = neighbors.mongo_ids();
    let documents = self.store().fetch_by_ids(&ids).await?;
    let by_id: std::collections::HashMap<String, scholar_core::Document> =
      documents.into_iter().map(|d| (d.id.clone(), d)).collect();

    let mut similar = Vec::with_capacity(ids.len());
    for hit in &neighbors.hits {
      let Some(mongo_id) = hit.source.get("mongo_id").and_then(Value::as_str) else {
        continue;
      };
      let Some(document) = by_id.get(mongo_id) else { continue };
      similar.push(SimilarItem {
        document: document.clone(),
        similarity_score: hit.score.unwrap_or_default(),
      });
      if similar.len() as u32 >= limit {
        break;
      }
    }

    Ok(SimilarResponse {
      source: SimilarSource {
        id: id.to_string(),
        title: source
          .get("title")
          .and_then(Value::as_str)
          .unwrap_or_default()
          .to_string(),
        subject_areas: source
          .get("subject_area")
          .and_then(Value::as_array)
          .map(|values| {
            values
              .iter()
              .filter_map(Value::as_str)
              .map(String::from)
              .collect()
          })
          .unwrap_or_default(),
      },
      similar,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn source_query_selects_by_mongo_id() {
    let body = source_query("64f0");
    assert_eq!(body["size"], 1);
    assert_eq!(body["query"]["term"]["mongo_id"], "64f0");
    let source = body["_source"].as_array().unwrap();
    assert!(source.iter().any(|f| f == "embedding"));
  }

  #[test]
  fn neighbors_query_oversamples_and_excludes_source() {
    let vector = vec![0.25_f32; 3];
    let body = neighbors_query(&vector, "64f0", 5);
    assert_eq!(body["size"], 5);
    assert_eq!(body["query"]["bool"]["must"][0]["knn"]["embedding"]["k"], 10);
    assert_eq!(body["query"]["bool"]["must_not"][0]["term"]["mongo_id"], "64f0");
  }
}
