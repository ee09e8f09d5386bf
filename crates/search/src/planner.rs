//! Query planner: compiles a search request into a complete engine query
//! body for one of the three ranking modes.
//!
//! Hybrid (`relevance`/`date`/`citations`) unions lexical clauses with a
//! k-NN clause. Impact wraps the lexical query in a function score and
//! deliberately omits the vector clause so citation-weighted results stay
//! anchored to keyword matches. Normalized fuses both signals on a [0,1]
//! scale in a script score.

use serde_json::{Value, json};

use crate::types::{Filters, SearchField, SearchRequest, SortMode};

// ============================================================================
// Weights
// ============================================================================

const BOOST_TITLE: f64 = 4.0;
const BOOST_TITLE_EXACT: f64 = 5.0;
const BOOST_ABSTRACT: f64 = 1.5;
const BOOST_SUBJECT: f64 = 3.0;
const BOOST_SUBJECT_NGRAM: f64 = 2.0;
const BOOST_AUTHOR_NAMES: f64 = 2.0;
const BOOST_AUTHOR_NAMES_NGRAM: f64 = 1.5;
const BOOST_VARIANTS: f64 = 2.5;
const BOOST_VARIANTS_NGRAM: f64 = 1.5;
const BOOST_FIELD: f64 = 2.5;
const BOOST_FIELD_NGRAM: f64 = 1.5;
const BOOST_PHRASE: f64 = 2.5;
/// Applied to every base boost when the caller names fields explicitly.
const SEARCH_IN_MULTIPLIER: f64 = 1.5;

const TIE_BREAKER: f64 = 0.3;
const KNN_K: u64 = 100;

/// Informational per-mode floors; the orchestrator commits the final value.
pub const MIN_SCORE_HYBRID: f64 = 5.0;
pub const MIN_SCORE_IMPACT: f64 = 5.0;
pub const MIN_SCORE_NORMALIZED: f64 = 0.3;

const BM25_WEIGHT: f64 = 0.4;
const KNN_WEIGHT: f64 = 0.6;
const CITATION_FACTOR: f64 = 0.3;
const CITATION_WEIGHT: f64 = 1.2;
const RECENCY_SCALE_YEARS: u32 = 5;
const RECENCY_DECAY: f64 = 0.5;
const RECENCY_WEIGHT: f64 = 0.8;

/// Everything the planner needs beyond the request itself.
#[derive(Debug, Clone, Copy)]
pub struct PlannerContext<'a> {
  pub query_vector: &'a [f32],
  pub current_year: i32,
  /// Overrides the mode's informational floor when set.
  pub min_score: Option<f64>,
}

// ============================================================================
// Entry point
// ============================================================================

/// Build the full engine query body for the requested ranking mode.
pub fn build_query(request: &SearchRequest, ctx: &PlannerContext) -> Value {
  let query = match request.sort_mode() {
    SortMode::Relevance | SortMode::Date | SortMode::Citations => hybrid_query(request, ctx),
    SortMode::Impact => impact_query(request, ctx),
    SortMode::Normalized => normalized_query(request, ctx),
  };

  let page = request.page() as u64;
  let per_page = request.per_page() as u64;

  let mut body = json!({
    "query": query,
    "aggs": aggregations(),
    "from": (page - 1) * per_page,
    "size": per_page,
    "track_total_hits": true,
    "_source": ["mongo_id"],
    "min_score": min_score_for(request.sort_mode(), ctx),
  });

  match request.sort_mode() {
    SortMode::Date => {
      body["sort"] = json!([{ "publication_year": "desc" }]);
    }
    SortMode::Citations => {
      body["sort"] = json!([{ "citation_count": "desc" }]);
    }
    _ => {}
  }

  body
}

fn min_score_for(mode: SortMode, ctx: &PlannerContext) -> f64 {
  ctx.min_score.unwrap_or(match mode {
    SortMode::Impact => MIN_SCORE_IMPACT,
    SortMode::Normalized => MIN_SCORE_NORMALIZED,
    _ => MIN_SCORE_HYBRID,
  })
}

/// Cheap BM25-only existence probe run before the full query.
pub fn precheck_query(query: &str) -> Value {
  json!({
    "size": 0,
    "track_total_hits": true,
    "query": {
      "multi_match": {
        "query": query,
        "fields": ["title", "abstract", "author_names", "subject_area"],
      }
    }
  })
}

// ============================================================================
// Modes
// ============================================================================

fn hybrid_query(request: &SearchRequest, ctx: &PlannerContext) -> Value {
  let mut should = lexical_clauses(request);
  should.push(json!({
    "knn": { "embedding": { "vector": ctx.query_vector, "k": KNN_K } }
  }));
  bool_query(should, request.filters.as_ref())
}

fn impact_query(request: &SearchRequest, ctx: &PlannerContext) -> Value {
  // At least one keyword match is required; the vector clause is omitted so
  // impact ranking cannot drift into lexically unrelated content.
  let mut inner = json!({
    "bool": {
      "must": [primary_multi_match(request)],
      "should": secondary_clauses(request),
    }
  });
  let filters = compile_filters(request.filters.as_ref());
  if !filters.is_empty() {
    inner["bool"]["filter"] = Value::Array(filters);
  }

  json!({
    "function_score": {
      "query": inner,
      "functions": [
        {
          "field_value_factor": {
            "field": "citation_count",
            "modifier": "log1p",
            "factor": CITATION_FACTOR,
          },
          "weight": CITATION_WEIGHT,
        },
        {
          "gauss": {
            "publication_year": {
              "origin": ctx.current_year,
              "scale": RECENCY_SCALE_YEARS,
              "decay": RECENCY_DECAY,
            }
          },
          "weight": RECENCY_WEIGHT,
        }
      ],
      "score_mode": "sum",
      "boost_mode": "multiply",
    }
  })
}

fn normalized_query(request: &SearchRequest, ctx: &PlannerContext) -> Value {
  json!({
    "script_score": {
      "query": bool_query(lexical_clauses(request), request.filters.as_ref()),
      "script": {
        "source": "double bm25 = _score / (1.0 + _score); \
                   double knn = (cosineSimilarity(params.query_vector, doc['embedding']) + 1.0) / 2.0; \
                   return params.bm25_weight * bm25 + params.knn_weight * knn;",
        "params": {
          "query_vector": ctx.query_vector,
          "bm25_weight": BM25_WEIGHT,
          "knn_weight": KNN_WEIGHT,
        }
      }
    }
  })
}

fn bool_query(should: Vec<Value>, filters: Option<&Filters>) -> Value {
  let mut query = json!({
    "bool": {
      "should": should,
      "minimum_should_match": 1,
    }
  });
  let compiled = compile_filters(filters);
  if !compiled.is_empty() {
    query["bool"]["filter"] = Value::Array(compiled);
  }
  query
}

// ============================================================================
// Lexical clauses
// ============================================================================

fn lexical_clauses(request: &SearchRequest) -> Vec<Value> {
  let mut clauses = vec![primary_multi_match(request)];
  clauses.extend(secondary_clauses(request));
  clauses
}

fn primary_multi_match(request: &SearchRequest) -> Value {
  json!({
    "multi_match": {
      "query": request.query,
      "fields": boosted_fields(request),
      "type": "best_fields",
      "tie_breaker": TIE_BREAKER,
      "fuzziness": "AUTO",
    }
  })
}

fn secondary_clauses(request: &SearchRequest) -> Vec<Value> {
  let mut clauses = vec![
    json!({ "match": { "subject_area": { "query": request.query, "boost": 2.0 } } }),
    json!({ "match": { "field_associated": { "query": request.query, "boost": 1.5 } } }),
  ];
  if let Some(phrase) = phrase_clause(&request.query) {
    clauses.push(phrase);
  }
  clauses
}

/// Phrase boost for multi-word queries only.
fn phrase_clause(query: &str) -> Option<Value> {
  if query.trim().split_whitespace().count() < 2 {
    return None;
  }
  Some(json!({
    "multi_match": {
      "query": query,
      "fields": ["title^5", "abstract^2"],
      "type": "phrase",
      "slop": 2,
      "boost": BOOST_PHRASE,
    }
  }))
}

/// Concrete weighted fields for the selected logical fields.
pub fn boosted_fields(request: &SearchRequest) -> Vec<String> {
  let multiplier = if request.has_explicit_search_in() {
    SEARCH_IN_MULTIPLIER
  } else {
    1.0
  };
  let mut fields = Vec::new();
  for field in request.effective_search_in() {
    let concrete: &[(&str, f64)] = match field {
      SearchField::Title => &[("title", BOOST_TITLE), ("title.exact", BOOST_TITLE_EXACT)],
      SearchField::Abstract => &[("abstract", BOOST_ABSTRACT)],
      SearchField::SubjectArea => &[
        ("subject_area", BOOST_SUBJECT),
        ("subject_area.ngram", BOOST_SUBJECT_NGRAM),
      ],
      SearchField::Author => &[
        ("author_names", BOOST_AUTHOR_NAMES),
        ("author_names.ngram", BOOST_AUTHOR_NAMES_NGRAM),
        ("author_name_variants", BOOST_VARIANTS),
        ("author_name_variants.ngram", BOOST_VARIANTS_NGRAM),
      ],
      SearchField::Field => &[
        ("field_associated", BOOST_FIELD),
        ("field_associated.ngram", BOOST_FIELD_NGRAM),
      ],
    };
    for (name, boost) in concrete {
      fields.push(format!("{}^{}", name, boost * multiplier));
    }
  }
  fields
}

// ============================================================================
// Filters
// ============================================================================

/// Compile the enumerated filter options into engine filter clauses.
/// Unset and empty-string entries produce nothing.
pub fn compile_filters(filters: Option<&Filters>) -> Vec<Value> {
  let Some(filters) = filters else {
    return Vec::new();
  };
  let mut clauses = Vec::new();

  if filters.year_from.is_some() || filters.year_to.is_some() {
    let mut range = serde_json::Map::new();
    if let Some(from) = filters.year_from {
      range.insert("gte".into(), json!(from));
    }
    if let Some(to) = filters.year_to {
      range.insert("lte".into(), json!(to));
    }
    clauses.push(json!({ "range": { "publication_year": range } }));
  }

  if let Some(field) = non_empty(&filters.field_associated) {
    clauses.push(json!({ "term": { "field_associated.keyword": field } }));
  }
  if let Some(doc_type) = non_empty(&filters.document_type) {
    clauses.push(json!({ "term": { "document_type": doc_type } }));
  }
  if let Some(types) = filters.document_types.as_ref().filter(|v| !v.is_empty()) {
    clauses.push(json!({ "terms": { "document_type": types } }));
  }
  if let Some(areas) = filters.subject_area.as_ref().filter(|v| !v.is_empty()) {
    clauses.push(json!({ "terms": { "subject_area.keyword": areas } }));
  }

  if let Some(author_id) = non_empty(&filters.author_id) {
    clauses.push(nested_author(json!({ "term": { "authors.author_id": author_id } })));
  }
  if let Some(affiliation) = non_empty(&filters.affiliation) {
    clauses.push(nested_author(json!({
      "match": { "authors.author_affiliation": affiliation }
    })));
  }
  if filters.first_author_only == Some(true) {
    clauses.push(nested_author(json!({ "term": { "authors.author_position": 1 } })));
  }

  if filters.interdisciplinary == Some(true) {
    clauses.push(json!({ "range": { "subject_area_count": { "gte": 3 } } }));
  }

  clauses
}

fn nested_author(query: Value) -> Value {
  json!({ "nested": { "path": "authors", "query": query } })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// Facets
// ============================================================================

/// Facet aggregations included with every search.
pub fn aggregations() -> Value {
  json!({
    "years": {
      "terms": { "field": "publication_year", "size": 30, "order": { "_key": "desc" } }
    },
    "year_ranges": {
      "range": {
        "field": "publication_year",
        "ranges": [
          { "key": "<2000", "to": 2000 },
          { "key": "2000-2009", "from": 2000, "to": 2010 },
          { "key": "2010-2019", "from": 2010, "to": 2020 },
          { "key": "2020-Present", "from": 2020 },
        ]
      }
    },
    "document_types": { "terms": { "field": "document_type", "size": 15 } },
    "fields": { "terms": { "field": "field_associated.keyword", "size": 30 } },
    "subject_areas": { "terms": { "field": "subject_area.keyword", "size": 50 } },
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn ctx(vector: &[f32]) -> PlannerContext<'_> {
    PlannerContext {
      query_vector: vector,
      current_year: 2026,
      min_score: None,
    }
  }

  fn request(query: &str, sort: SortMode) -> SearchRequest {
    SearchRequest {
      query: query.into(),
      sort: Some(sort),
      ..Default::default()
    }
  }

  #[test]
  fn default_boost_table() {
    let fields = boosted_fields(&request("q", SortMode::Relevance));
    assert_eq!(
      fields,
      vec![
        "title^4",
        "title.exact^5",
        "abstract^1.5",
        "author_names^2",
        "author_names.ngram^1.5",
        "author_name_variants^2.5",
        "author_name_variants.ngram^1.5",
        "subject_area^3",
        "subject_area.ngram^2",
        "field_associated^2.5",
        "field_associated.ngram^1.5",
      ]
    );
  }

  #[test]
  fn explicit_search_in_multiplies_boosts() {
    let req = SearchRequest {
      query: "q".into(),
      search_in: Some(vec![SearchField::Title]),
      ..Default::default()
    };
    assert_eq!(boosted_fields(&req), vec!["title^6", "title.exact^7.5"]);
  }

  #[test]
  fn hybrid_includes_knn_and_minimum_should_match() {
    let vector = vec![0.1_f32; 4];
    let body = build_query(&request("carbon nanotubes", SortMode::Relevance), &ctx(&vector));
    let bool_part = &body["query"]["bool"];
    assert_eq!(bool_part["minimum_should_match"], 1);
    let should = bool_part["should"].as_array().unwrap();
    let knn = should.iter().find(|c| c.get("knn").is_some()).unwrap();
    assert_eq!(knn["knn"]["embedding"]["k"], 100);
    assert_eq!(body["min_score"], 5.0);
    assert_eq!(body["track_total_hits"], true);
    assert_eq!(body["_source"], serde_json::json!(["mongo_id"]));
  }

  #[test]
  fn phrase_clause_only_for_multi_word_queries() {
    assert!(phrase_clause("nanotubes").is_none());
    assert!(phrase_clause("  nanotubes  ").is_none());
    let clause = phrase_clause("carbon nanotubes").unwrap();
    assert_eq!(clause["multi_match"]["slop"], 2);
    assert_eq!(clause["multi_match"]["boost"], 2.5);
    assert_eq!(
      clause["multi_match"]["fields"],
      serde_json::json!(["title^5", "abstract^2"])
    );
  }

  #[test]
  fn sort_modes_set_secondary_sort() {
    let vector = vec![0.0_f32; 4];
    let date = build_query(&request("q", SortMode::Date), &ctx(&vector));
    assert_eq!(date["sort"], serde_json::json!([{ "publication_year": "desc" }]));
    let citations = build_query(&request("q", SortMode::Citations), &ctx(&vector));
    assert_eq!(citations["sort"], serde_json::json!([{ "citation_count": "desc" }]));
    let relevance = build_query(&request("q", SortMode::Relevance), &ctx(&vector));
    assert!(relevance.get("sort").is_none());
  }

  #[test]
  fn impact_requires_keyword_match_and_omits_knn() {
    let vector = vec![0.0_f32; 4];
    let body = build_query(&request("quantum dots", SortMode::Impact), &ctx(&vector));
    let function_score = &body["query"]["function_score"];
    assert!(function_score["query"]["bool"]["must"][0]["multi_match"].is_object());
    // No vector clause anywhere in the impact query.
    assert!(!serde_json::to_string(&body["query"]).unwrap().contains("knn"));

    let functions = function_score["functions"].as_array().unwrap();
    assert_eq!(functions[0]["field_value_factor"]["modifier"], "log1p");
    assert_eq!(functions[0]["field_value_factor"]["factor"], 0.3);
    assert_eq!(functions[0]["weight"], 1.2);
    assert_eq!(functions[1]["gauss"]["publication_year"]["origin"], 2026);
    assert_eq!(functions[1]["gauss"]["publication_year"]["scale"], 5);
    assert_eq!(functions[1]["gauss"]["publication_year"]["decay"], 0.5);
    assert_eq!(functions[1]["weight"], 0.8);
    assert_eq!(function_score["score_mode"], "sum");
    assert_eq!(function_score["boost_mode"], "multiply");
    assert_eq!(body["min_score"], 5.0);
  }

  #[test]
  fn normalized_fuses_scores_with_default_weights() {
    let vector = vec![0.5_f32; 4];
    let body = build_query(&request("perovskite solar", SortMode::Normalized), &ctx(&vector));
    let script = &body["query"]["script_score"]["script"];
    assert_eq!(script["params"]["bm25_weight"], 0.4);
    assert_eq!(script["params"]["knn_weight"], 0.6);
    assert!(script["source"].as_str().unwrap().contains("cosineSimilarity"));
    assert_eq!(body["min_score"], 0.3);
  }

  #[test]
  fn min_score_override_wins() {
    let vector = vec![0.0_f32; 4];
    let context = PlannerContext {
      query_vector: &vector,
      current_year: 2026,
      min_score: Some(1.0),
    };
    let body = build_query(&request("q", SortMode::Relevance), &context);
    assert_eq!(body["min_score"], 1.0);
  }

  #[test]
  fn filters_compile_to_expected_clauses() {
    let filters = Filters {
      year_from: Some(2015),
      year_to: Some(2020),
      field_associated: Some("Physics".into()),
      document_type: Some("article".into()),
      subject_area: Some(vec!["PHYS".into()]),
      author_id: Some("AID42".into()),
      affiliation: Some("IIT Delhi".into()),
      first_author_only: Some(true),
      interdisciplinary: Some(true),
      ..Default::default()
    };
    let clauses = compile_filters(Some(&filters));
    let rendered = serde_json::to_string(&clauses).unwrap();

    assert!(rendered.contains("\"publication_year\":{\"gte\":2015,\"lte\":2020}"));
    assert!(rendered.contains("field_associated.keyword"));
    assert!(rendered.contains("\"term\":{\"document_type\":\"article\"}"));
    assert!(rendered.contains("subject_area.keyword"));
    // Author conditions are nested on the authors path.
    let nested: Vec<&Value> = clauses.iter().filter(|c| c.get("nested").is_some()).collect();
    assert_eq!(nested.len(), 3);
    for clause in &nested {
      assert_eq!(clause["nested"]["path"], "authors");
    }
    assert!(rendered.contains("\"authors.author_id\":\"AID42\""));
    assert!(rendered.contains("\"authors.author_position\":1"));
    assert!(rendered.contains("\"subject_area_count\":{\"gte\":3}"));
  }

  #[test]
  fn empty_and_unset_filters_compile_to_nothing() {
    assert!(compile_filters(None).is_empty());
    let filters = Filters {
      field_associated: Some("  ".into()),
      document_types: Some(vec![]),
      first_author_only: Some(false),
      interdisciplinary: Some(false),
      ..Default::default()
    };
    assert!(compile_filters(Some(&filters)).is_empty());
  }

  #[test]
  fn aggregations_cover_all_facets() {
    let aggs = aggregations();
    assert_eq!(aggs["years"]["terms"]["size"], 30);
    assert_eq!(aggs["years"]["terms"]["order"]["_key"], "desc");
    assert_eq!(aggs["document_types"]["terms"]["size"], 15);
    assert_eq!(aggs["fields"]["terms"]["size"], 30);
    assert_eq!(aggs["subject_areas"]["terms"]["size"], 50);
    let ranges = aggs["year_ranges"]["range"]["ranges"].as_array().unwrap();
    assert_eq!(ranges.len(), 4);
    assert_eq!(ranges[0]["key"], "<2000");
    assert_eq!(ranges[3]["key"], "2020-Present");
  }

  #[test]
  fn pagination_computes_from_offset() {
    let vector = vec![0.0_f32; 4];
    let req = SearchRequest {
      query: "q".into(),
      page: Some(3),
      per_page: Some(25),
      ..Default::default()
    };
    let body = build_query(&req, &ctx(&vector));
    assert_eq!(body["from"], 50);
    assert_eq!(body["size"], 25);
  }

  #[test]
  fn precheck_is_bm25_only_with_zero_size() {
    let body = precheck_query("zzzqqq");
    assert_eq!(body["size"], 0);
    assert!(body["query"]["multi_match"].is_object());
    assert!(!serde_json::to_string(&body).unwrap().contains("knn"));
    assert_eq!(
      body["query"]["multi_match"]["fields"],
      serde_json::json!(["title", "abstract", "author_names", "subject_area"])
    );
  }
}
