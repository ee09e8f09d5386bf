//! Declarative index schema for the search engine.
//!
//! Custom BM25 similarity, n-gram and shingle analyzers, nested authors,
//! and the HNSW vector field. `ensure_index` is idempotent.

use serde_json::{Value, json};
use tracing::info;

use db::SearchEngine;
use scholar_core::EMBEDDING_DIM;

use crate::IndexError;

/// Full index body: settings, analysis, and mappings.
pub fn index_mapping(dimension: usize) -> Value {
  json!({
    "settings": {
      "index": {
        "knn": true,
        "knn.algo_param.ef_search": 300,
        "number_of_shards": 3,
        "number_of_replicas": 1,
        "similarity": {
          "custom_bm25": { "type": "BM25", "k1": 1.8, "b": 0.6 }
        }
      },
      "analysis": {
        "filter": {
          "ngram_filter": { "type": "ngram", "min_gram": 2, "max_gram": 4 },
          "shingle_filter": {
            "type": "shingle",
            "min_shingle_size": 2,
            "max_shingle_size": 3,
            "output_unigrams": true
          }
        },
        "analyzer": {
          "ngram_analyzer": {
            "type": "custom",
            "tokenizer": "standard",
            "filter": ["lowercase", "ngram_filter"]
          },
          "shingle_analyzer": {
            "type": "custom",
            "tokenizer": "standard",
            "filter": ["lowercase", "shingle_filter"]
          }
        }
      }
    },
    "mappings": {
      "properties": {
        "mongo_id": { "type": "keyword" },
        "title": {
          "type": "text",
          "analyzer": "english",
          "similarity": "custom_bm25",
          "fields": {
            "exact": { "type": "keyword" },
            "shingles": { "type": "text", "analyzer": "shingle_analyzer" }
          }
        },
        "abstract": {
          "type": "text",
          "analyzer": "english",
          "similarity": "custom_bm25",
          "fields": {
            "shingles": { "type": "text", "analyzer": "shingle_analyzer" }
          }
        },
        "authors": {
          "type": "nested",
          "properties": {
            "author_id": { "type": "keyword" },
            "author_name": {
              "type": "text",
              "fields": {
                "keyword": { "type": "keyword" },
                "ngram": { "type": "text", "analyzer": "ngram_analyzer" }
              }
            },
            "author_available_names": {
              "type": "text",
              "fields": {
                "keyword": { "type": "keyword" },
                "ngram": { "type": "text", "analyzer": "ngram_analyzer" }
              }
            },
            "author_position": { "type": "integer" },
            "author_affiliation": { "type": "text" },
            "author_email": { "type": "keyword" },
            "has_matched_profile": { "type": "boolean" }
          }
        },
        "author_names": {
          "type": "text",
          "fields": {
            "keyword": { "type": "keyword" },
            "ngram": { "type": "text", "analyzer": "ngram_analyzer" }
          }
        },
        "author_name_variants": {
          "type": "text",
          "fields": {
            "keyword": { "type": "keyword" },
            "ngram": { "type": "text", "analyzer": "ngram_analyzer" }
          }
        },
        "publication_year": { "type": "integer" },
        "field_associated": {
          "type": "text",
          "fields": {
            "keyword": { "type": "keyword" },
            "ngram": { "type": "text", "analyzer": "ngram_analyzer" }
          }
        },
        "document_type": { "type": "keyword" },
        "subject_area": {
          "type": "text",
          "fields": {
            "keyword": { "type": "keyword" },
            "ngram": { "type": "text", "analyzer": "ngram_analyzer" }
          }
        },
        "subject_area_count": { "type": "integer" },
        "citation_count": { "type": "integer" },
        "reference_count": { "type": "integer" },
        "embedding": {
          "type": "knn_vector",
          "dimension": dimension,
          "method": {
            "name": "hnsw",
            "space_type": "cosinesimil",
            "parameters": { "ef_construction": 512, "m": 32 }
          }
        }
      }
    }
  })
}

/// Create the index when it does not exist yet. Returns whether it was
/// created by this call.
pub async fn ensure_index(engine: &SearchEngine) -> Result<bool, IndexError> {
  if engine.index_exists().await? {
    return Ok(false);
  }
  engine.create_index(&index_mapping(EMBEDDING_DIM)).await?;
  info!(index = engine.index_name(), "created search index");
  Ok(true)
}

/// Drop and recreate the index (full reindex).
pub async fn recreate_index(engine: &SearchEngine) -> Result<(), IndexError> {
  engine.delete_index().await?;
  engine.create_index(&index_mapping(EMBEDDING_DIM)).await?;
  info!(index = engine.index_name(), "recreated search index");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bm25_parameters_are_custom() {
    let mapping = index_mapping(EMBEDDING_DIM);
    let bm25 = &mapping["settings"]["index"]["similarity"]["custom_bm25"];
    assert_eq!(bm25["k1"], 1.8);
    assert_eq!(bm25["b"], 0.6);
  }

  #[test]
  fn knn_settings_match_contract() {
    let mapping = index_mapping(EMBEDDING_DIM);
    assert_eq!(mapping["settings"]["index"]["knn"], true);
    assert_eq!(mapping["settings"]["index"]["knn.algo_param.ef_search"], 300);

    let vector = &mapping["mappings"]["properties"]["embedding"];
    assert_eq!(vector["type"], "knn_vector");
    assert_eq!(vector["dimension"], 768);
    assert_eq!(vector["method"]["name"], "hnsw");
    assert_eq!(vector["method"]["space_type"], "cosinesimil");
    assert_eq!(vector["method"]["parameters"]["ef_construction"], 512);
    assert_eq!(vector["method"]["parameters"]["m"], 32);
  }

  #[test]
  fn analyzers_use_standard_tokenizer_and_lowercase() {
    let mapping = index_mapping(EMBEDDING_DIM);
    let analysis = &mapping["settings"]["analysis"];
    assert_eq!(analysis["filter"]["ngram_filter"]["min_gram"], 2);
    assert_eq!(analysis["filter"]["ngram_filter"]["max_gram"], 4);
    assert_eq!(analysis["filter"]["shingle_filter"]["output_unigrams"], true);
    for analyzer in ["ngram_analyzer", "shingle_analyzer"] {
      assert_eq!(analysis["analyzer"][analyzer]["tokenizer"], "standard");
      assert_eq!(analysis["analyzer"][analyzer]["filter"][0], "lowercase");
    }
  }

  #[test]
  fn authors_are_nested_with_position() {
    let mapping = index_mapping(EMBEDDING_DIM);
    let authors = &mapping["mappings"]["properties"]["authors"];
    assert_eq!(authors["type"], "nested");
    assert_eq!(authors["properties"]["author_position"]["type"], "integer");
    assert_eq!(authors["properties"]["author_name"]["fields"]["ngram"]["analyzer"], "ngram_analyzer");
  }

  #[test]
  fn mongo_id_is_keyword_not_engine_id() {
    let mapping = index_mapping(EMBEDDING_DIM);
    assert_eq!(mapping["mappings"]["properties"]["mongo_id"]["type"], "keyword");
  }
}
