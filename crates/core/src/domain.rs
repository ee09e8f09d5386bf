//! Domain types shared across the indexing pipeline and the search service.
//!
//! `Document`/`Author` mirror the authoritative store records. `EngineDocument`
//! is the denormalized projection written to the search engine; it keeps the
//! authoritative id in `mongo_id` and never reuses it as the engine's own id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dimensionality of the embedding vector field. Constant across the index.
pub const EMBEDDING_DIM: usize = 768;

/// An author as stored on the authoritative record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Author {
  pub author_id: String,
  pub author_name: String,
  #[serde(default)]
  pub author_available_names: Vec<String>,
  /// 1-based position within the paper, stored as a string upstream.
  #[serde(default)]
  pub author_position: String,
  #[serde(default)]
  pub author_affiliation: String,
  #[serde(default)]
  pub author_email: String,
  /// Reference to a matched institutional profile, when one exists.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub matched_profile: Option<String>,
}

/// An authoritative paper record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Document {
  /// Opaque hex identifier from the authoritative store.
  pub id: String,
  pub title: String,
  #[serde(rename = "abstract", default)]
  pub abstract_text: String,
  #[serde(default)]
  pub authors: Vec<Author>,
  #[serde(default)]
  pub publication_year: i32,
  #[serde(default)]
  pub field_associated: String,
  #[serde(default)]
  pub document_type: String,
  #[serde(default)]
  pub subject_area: Vec<String>,
  #[serde(default)]
  pub citation_count: i64,
  #[serde(default)]
  pub reference_count: i64,
  /// Cross-reference into the search engine, set after phase 2.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub open_search_id: Option<String>,
}

impl Document {
  /// Text sent to the embedding service for this document.
  pub fn embedding_text(&self) -> String {
    if self.abstract_text.is_empty() {
      self.title.clone()
    } else {
      format!("{}\n{}", self.title, self.abstract_text)
    }
  }
}

/// A person record from the authoritative store (faculty/staff directory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Person {
  pub id: String,
  pub full_name: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub department: String,
}

/// Per-author fields kept on the nested `authors` path of the engine document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineAuthor {
  pub author_id: String,
  pub author_name: String,
  #[serde(default)]
  pub author_available_names: Vec<String>,
  /// Parsed 1-based position; 0 when the source string was not a number.
  pub author_position: i32,
  #[serde(default)]
  pub author_affiliation: String,
  #[serde(default)]
  pub author_email: String,
  pub has_matched_profile: bool,
}

/// The denormalized projection written to the search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineDocument {
  /// Authoritative identifier, kept as a keyword field.
  pub mongo_id: String,
  pub title: String,
  #[serde(rename = "abstract", default)]
  pub abstract_text: String,
  /// Ordered display names, flattened from `authors`.
  pub author_names: Vec<String>,
  /// Union of all known name variants across authors; duplicates preserved,
  /// the analyzer deduplicates at token level.
  pub author_name_variants: Vec<String>,
  pub authors: Vec<EngineAuthor>,
  pub publication_year: i32,
  pub field_associated: String,
  pub document_type: String,
  pub subject_area: Vec<String>,
  /// Pre-computed for the interdisciplinary filter.
  pub subject_area_count: usize,
  pub citation_count: i64,
  pub reference_count: i64,
  pub embedding: Vec<f32>,
}

/// A checkpointed unit of phase-1 work: the fetched record plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
  pub document: Document,
  pub embedding: Vec<f32>,
  pub processed_at: DateTime<Utc>,
}

impl CacheEntry {
  pub fn new(document: Document, embedding: Vec<f32>) -> Self {
    Self {
      document,
      embedding,
      processed_at: Utc::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn embedding_text_joins_title_and_abstract() {
    let doc = Document {
      title: "Carbon nanotubes".into(),
      abstract_text: "A survey.".into(),
      ..Default::default()
    };
    assert_eq!(doc.embedding_text(), "Carbon nanotubes\nA survey.");
  }

  #[test]
  fn embedding_text_falls_back_to_title() {
    let doc = Document {
      title: "Untitled".into(),
      ..Default::default()
    };
    assert_eq!(doc.embedding_text(), "Untitled");
  }

  #[test]
  fn document_serializes_abstract_under_wire_name() {
    let doc = Document {
      id: "a1".into(),
      abstract_text: "text".into(),
      ..Default::default()
    };
    let value = serde_json::to_value(&doc).unwrap();
    assert_eq!(value["abstract"], "text");
    assert!(value.get("abstract_text").is_none());
  }
}
