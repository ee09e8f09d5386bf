//! Request and response shapes for the search surface.

use serde::{Deserialize, Serialize};

use scholar_core::{Document, Person};

/// Ranking modes. `Relevance`, `Date`, and `Citations` share the hybrid
/// query and differ only in the secondary sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
  #[default]
  Relevance,
  Date,
  Citations,
  Impact,
  Normalized,
}

impl SortMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      SortMode::Relevance => "relevance",
      SortMode::Date => "date",
      SortMode::Citations => "citations",
      SortMode::Impact => "impact",
      SortMode::Normalized => "normalized",
    }
  }
}

/// Logical fields a query can be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
  Title,
  Abstract,
  Author,
  SubjectArea,
  Field,
}

impl SearchField {
  pub fn as_str(&self) -> &'static str {
    match self {
      SearchField::Title => "title",
      SearchField::Abstract => "abstract",
      SearchField::Author => "author",
      SearchField::SubjectArea => "subject_area",
      SearchField::Field => "field",
    }
  }
}

/// Default logical field set when `search_in` is absent or empty.
pub const DEFAULT_SEARCH_IN: &[SearchField] = &[
  SearchField::Title,
  SearchField::Abstract,
  SearchField::Author,
  SearchField::SubjectArea,
  SearchField::Field,
];

/// Enumerated filter options; unset entries compile to nothing.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Filters {
  pub year_from: Option<i32>,
  pub year_to: Option<i32>,
  pub field_associated: Option<String>,
  pub document_type: Option<String>,
  pub document_types: Option<Vec<String>>,
  pub subject_area: Option<Vec<String>>,
  pub author_id: Option<String>,
  pub affiliation: Option<String>,
  pub first_author_only: Option<bool>,
  pub interdisciplinary: Option<bool>,
}

/// Body of `POST /search`.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchRequest {
  pub query: String,
  pub filters: Option<Filters>,
  pub sort: Option<SortMode>,
  pub page: Option<u32>,
  pub per_page: Option<u32>,
  pub search_in: Option<Vec<SearchField>>,
  /// Skip the result cache (debugging).
  pub bypass_cache: Option<bool>,
}

impl SearchRequest {
  pub fn sort_mode(&self) -> SortMode {
    self.sort.unwrap_or_default()
  }

  pub fn page(&self) -> u32 {
    self.page.unwrap_or(1).max(1)
  }

  pub fn per_page(&self) -> u32 {
    self.per_page.unwrap_or(10)
  }

  /// Effective logical fields: the default set when absent or empty.
  pub fn effective_search_in(&self) -> Vec<SearchField> {
    match &self.search_in {
      Some(fields) if !fields.is_empty() => fields.clone(),
      _ => DEFAULT_SEARCH_IN.to_vec(),
    }
  }

  /// Whether the caller restricted the fields explicitly.
  pub fn has_explicit_search_in(&self) -> bool {
    self.search_in.as_ref().is_some_and(|fields| !fields.is_empty())
  }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FacetBucket {
  pub key: String,
  pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Facets {
  pub years: Vec<FacetBucket>,
  pub year_ranges: Vec<FacetBucket>,
  pub document_types: Vec<FacetBucket>,
  pub fields: Vec<FacetBucket>,
  pub subject_areas: Vec<FacetBucket>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Pagination {
  pub page: u32,
  pub per_page: u32,
  pub total: u64,
  pub total_pages: u64,
}

impl Pagination {
  pub fn new(page: u32, per_page: u32, total: u64) -> Self {
    Self {
      page,
      per_page,
      total,
      total_pages: total.div_ceil(per_page.max(1) as u64),
    }
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct Meta {
  pub took_ms: u64,
  pub cache_hit: bool,
}

/// One hydrated hit; the full authoritative record plus the engine score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResultItem {
  #[serde(flatten)]
  pub document: Document,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub score: Option<f64>,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResponse {
  pub results: Vec<SearchResultItem>,
  pub related_people: Option<Vec<Person>>,
  pub facets: Facets,
  pub pagination: Pagination,
  pub meta: Meta,
  pub message: Option<String>,
}

// ============================================================================
// Auxiliary endpoints
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarSource {
  pub id: String,
  pub title: String,
  pub subject_areas: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarItem {
  #[serde(flatten)]
  pub document: Document,
  pub similarity_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarResponse {
  pub source: SimilarSource,
  pub similar: Vec<SimilarItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collaborator {
  pub author_id: String,
  pub name: String,
  pub affiliation: String,
  /// Co-authored paper count.
  pub papers: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsResponse {
  pub author_id: String,
  pub total_papers: u64,
  pub collaborators: Vec<Collaborator>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
  pub healthy: bool,
  pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
  pub status: String,
  pub engine: ComponentHealth,
  pub embedding: ComponentHealth,
  pub cache: ComponentHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorDocumentsResponse {
  pub author_id: String,
  pub documents: Vec<Document>,
  pub pagination: Pagination,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sort_mode_parses_lowercase() {
    let mode: SortMode = serde_json::from_str("\"normalized\"").unwrap();
    assert_eq!(mode, SortMode::Normalized);
    assert_eq!(serde_json::to_string(&SortMode::Impact).unwrap(), "\"impact\"");
  }

  #[test]
  fn search_field_uses_snake_case() {
    let field: SearchField = serde_json::from_str("\"subject_area\"").unwrap();
    assert_eq!(field, SearchField::SubjectArea);
  }

  #[test]
  fn effective_search_in_defaults_when_empty() {
    let request = SearchRequest {
      search_in: Some(vec![]),
      ..Default::default()
    };
    assert_eq!(request.effective_search_in(), DEFAULT_SEARCH_IN.to_vec());
    assert!(!request.has_explicit_search_in());

    let explicit = SearchRequest {
      search_in: Some(vec![SearchField::Title]),
      ..Default::default()
    };
    assert_eq!(explicit.effective_search_in(), vec![SearchField::Title]);
    assert!(explicit.has_explicit_search_in());
  }

  #[test]
  fn pagination_rounds_pages_up() {
    let pagination = Pagination::new(1, 10, 101);
    assert_eq!(pagination.total_pages, 11);
    assert_eq!(Pagination::new(1, 10, 100).total_pages, 10);
    assert_eq!(Pagination::new(1, 10, 0).total_pages, 0);
  }

  #[test]
  fn request_deserializes_from_wire_shape() {
    let request: SearchRequest = serde_json::from_value(serde_json::json!({
      "query": "carbon nanotubes",
      "filters": { "year_from": 2015, "author_id": "AID42" },
      "sort": "citations",
      "page": 2,
      "per_page": 25,
      "search_in": ["title", "abstract"]
    }))
    .unwrap();
    assert_eq!(request.page(), 2);
    assert_eq!(request.per_page(), 25);
    assert_eq!(request.sort_mode(), SortMode::Citations);
    assert_eq!(request.filters.unwrap().author_id.as_deref(), Some("AID42"));
  }
}
