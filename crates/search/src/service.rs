//! Search orchestration: cache, embed, pre-check, execute, hydrate, shape.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Datelike;
use tracing::{debug, info, warn};

use db::{DocumentStore, RedisKv, SearchEngine};
use embedding::Embedder;
use scholar_core::{Document, Person, config::SearchConfig};

use crate::{
  NO_RESULTS_MESSAGE, SearchError,
  cache_key::cache_key,
  facets::parse_facets,
  planner::{self, PlannerContext},
  result_cache::ResultCache,
  types::{
    AuthorDocumentsResponse, Meta, Pagination, SearchRequest, SearchResponse, SearchResultItem, SortMode,
  },
};

/// The runtime `min_score` committed by the orchestrator for the BM25-scaled
/// modes; the planner defaults are an informational floor. Normalized mode
/// keeps its own [0,1]-scale floor.
const RUNTIME_MIN_SCORE: f64 = 1.0;

const MAX_PER_PAGE: u32 = 100;

/// Top-level search service. One instance per process, handed its
/// collaborators at construction.
pub struct SearchService {
  store: DocumentStore,
  engine: SearchEngine,
  embedder: Arc<dyn Embedder>,
  cache: ResultCache,
  kv: RedisKv,
  config: SearchConfig,
}

impl SearchService {
  pub fn new(
    store: DocumentStore,
    engine: SearchEngine,
    embedder: Arc<dyn Embedder>,
    kv: RedisKv,
    config: SearchConfig,
  ) -> Self {
    let cache = ResultCache::new(kv.clone(), Duration::from_secs(config.result_cache_ttl_secs));
    Self {
      store,
      engine,
      embedder,
      cache,
      kv,
      config,
    }
  }

  pub(crate) fn store(&self) -> &DocumentStore {
    &self.store
  }

  pub(crate) fn engine(&self) -> &SearchEngine {
    &self.engine
  }

  pub(crate) fn embedder(&self) -> &Arc<dyn Embedder> {
    &self.embedder
  }

  pub(crate) fn kv(&self) -> &RedisKv {
    &self.kv
  }

  // ==========================================================================
  // POST /search
  // ==========================================================================

  pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
    let started = Instant::now();
    validate(request)?;

    // Step 1: result cache.
    let key = cache_key(request);
    let bypass = request.bypass_cache.unwrap_or(false);
    if !bypass {
      if let Some(mut cached) = self.cache.get(&key).await {
        cached.meta.cache_hit = true;
        cached.meta.took_ms = started.elapsed().as_millis() as u64;
        return Ok(cached);
      }
    }

    // Step 2: query vector.
    let query_vector = self.embedder.embed_query(&request.query).await?;

    // Step 3: BM25 pre-check. Zero lexical hits short-circuits so the
    // vector path cannot surface unrelated items for unknown terms.
    let precheck = self.engine.search(&planner::precheck_query(&request.query)).await?;
    if precheck.total == 0 {
      debug!(query = %request.query, "pre-check found no lexical matches");
      return Ok(SearchResponse {
        message: Some(NO_RESULTS_MESSAGE.to_string()),
        pagination: Pagination::new(request.page(), request.per_page(), 0),
        meta: Meta {
          took_ms: started.elapsed().as_millis() as u64,
          cache_hit: false,
        },
        ..Default::default()
      });
    }

    // Steps 4-5: plan and execute.
    let context = PlannerContext {
      query_vector: &query_vector,
      current_year: chrono::Utc::now().year(),
      min_score: runtime_min_score(request.sort_mode()),
    };
    let body = planner::build_query(request, &context);
    let results = self.engine.search(&body).await?;

    // Step 6: hydrate in engine order.
    let ids = results.mongo_ids();
    let scores: HashMap<String, f64> = results
      .hits
      .iter()
      .filter_map(|hit| {
        let id = hit.source.get("mongo_id")?.as_str()?;
        Some((id.to_string(), hit.score?))
      })
      .collect();
    let documents = self.store.fetch_by_ids(&ids).await?;
    let (items, dropped) = hydrate_ordered(&ids, &scores, documents);
    if dropped > 0 {
      warn!(dropped, "hits missing from the authoritative store");
    }

    // Step 7: related people enrichment.
    let related_people = if self.config.related_people {
      self.related_people(&items).await
    } else {
      None
    };

    // Step 8: shape, then cache best-effort.
    let response = SearchResponse {
      results: items,
      related_people,
      facets: parse_facets(results.aggregations.as_ref()),
      pagination: Pagination::new(request.page(), request.per_page(), results.total),
      meta: Meta {
        took_ms: started.elapsed().as_millis() as u64,
        cache_hit: false,
      },
      message: None,
    };
    if !bypass {
      self.cache.put(&key, &response).await;
    }
    info!(
      query = %request.query,
      sort = request.sort_mode().as_str(),
      total = response.pagination.total,
      returned = response.results.len(),
      took_ms = response.meta.took_ms,
      "search complete"
    );
    Ok(response)
  }

  /// Collect matched institutional emails from the hydrated authors and
  /// look up the corresponding people records.
  async fn related_people(&self, items: &[SearchResultItem]) -> Option<Vec<Person>> {
    let prefixes = matched_email_prefixes(items.iter().map(|item| &item.document));
    let mut people = if prefixes.is_empty() {
      Vec::new()
    } else {
      match self.store.find_people_by_email_prefixes(&prefixes).await {
        Ok(people) => people,
        Err(e) => {
          warn!(error = %e, "related-people lookup failed");
          return None;
        }
      }
    };

    if people.is_empty() && self.config.related_people_fallback {
      people = self.store.list_people(5).await.unwrap_or_default();
    }
    if people.is_empty() {
      return None;
    }

    // Deduplicate by id, preserving lookup order.
    let mut seen = std::collections::HashSet::new();
    people.retain(|person| seen.insert(person.id.clone()));
    Some(people)
  }

  // ==========================================================================
  // GET /document/{id}, GET /documents/by-author/{author_id}
  // ==========================================================================

  pub async fn document(&self, id: &str) -> Result<Document, SearchError> {
    self.store.get_document(id).await?.ok_or(SearchError::NotFound)
  }

  pub async fn documents_by_author(
    &self,
    author_id: &str,
    page: u32,
    per_page: u32,
  ) -> Result<AuthorDocumentsResponse, SearchError> {
    if !(1..=MAX_PER_PAGE).contains(&per_page) {
      return Err(SearchError::Validation(format!(
        "per_page must be between 1 and {MAX_PER_PAGE}"
      )));
    }
    let (documents, total) = self
      .store
      .find_by_author(author_id, page.max(1) as u64, per_page as i64)
      .await?;
    Ok(AuthorDocumentsResponse {
      author_id: author_id.to_string(),
      documents,
      pagination: Pagination::new(page.max(1), per_page, total),
    })
  }
}

/// The dynamic override applies to the BM25-scaled modes only; normalized
/// scores live on [0,1] where 1.0 would reject everything.
fn runtime_min_score(mode: SortMode) -> Option<f64> {
  match mode {
    SortMode::Normalized => None,
    _ => Some(RUNTIME_MIN_SCORE),
  }
}

fn validate(request: &SearchRequest) -> Result<(), SearchError> {
  if request.query.trim().is_empty() {
    return Err(SearchError::Validation("query must not be empty".into()));
  }
  if let Some(per_page) = request.per_page
    && !(1..=MAX_PER_PAGE).contains(&per_page)
  {
    return Err(SearchError::Validation(format!(
      "per_page must be between 1 and {MAX_PER_PAGE}"
    )));
  }
  if request.page == Some(0) {
    return Err(SearchError::Validation("page must be at least 1".into()));
  }
  Ok(())
}

/// Re-emit hydrated documents in the engine's hit order; ids that failed to
/// hydrate are dropped without disturbing the order of the rest.
pub(crate) fn hydrate_ordered(
  ids: &[String],
  scores: &HashMap<String, f64>,
  documents: Vec<Document>,
) -> (Vec<SearchResultItem>, usize) {
  let mut by_id: HashMap<String, Document> = documents.into_iter().map(|d| (d.id.clone(), d)).collect();
  let mut items = Vec::with_capacity(ids.len());
  let mut dropped = 0;
  for id in ids {
    match by_id.remove(id) {
      Some(document) => {
        let score = scores.get(id).copied();
        items.push(SearchResultItem { document, score });
      }
      None => dropped += 1,
    }
  }
  (items, dropped)
}

/// Email local-parts of authors with a matched profile, deduplicated in
/// first-seen order.
pub(crate) fn matched_email_prefixes<'a>(documents: impl Iterator<Item = &'a Document>) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  let mut prefixes = Vec::new();
  for document in documents {
    for author in &document.authors {
      if author.matched_profile.as_deref().is_none_or(str::is_empty) {
        continue;
      }
      let Some(prefix) = author.author_email.split('@').next().filter(|p| !p.is_empty()) else {
        continue;
      };
      if seen.insert(prefix.to_string()) {
        prefixes.push(prefix.to_string());
      }
    }
  }
  prefixes
}

#[cfg(test)]
mod tests {
  use super::*;
  use scholar_core::Author;

  fn doc(id: &str) -> Document {
    Document {
      id: id.into(),
      title: format!("paper {id}"),
      ..Default::default()
    }
  }

  #[test]
  fn hydration_preserves_engine_order_and_drops_missing() {
    let ids: Vec<String> = ["c", "a", "b"].iter().map(|s| s.to_string()).collect();
    let mut scores = HashMap::new();
    scores.insert("c".to_string(), 0.72);
    scores.insert("a".to_string(), 0.41);
    // "b" failed to hydrate.
    let documents = vec![doc("a"), doc("c")];

    let (items, dropped) = hydrate_ordered(&ids, &scores, documents);
    let order: Vec<&str> = items.iter().map(|i| i.document.id.as_str()).collect();
    assert_eq!(order, vec!["c", "a"]);
    assert_eq!(dropped, 1);
    assert_eq!(items[0].score, Some(0.72));
    assert_eq!(items[1].score, Some(0.41));
  }

  #[test]
  fn validation_rejects_empty_query_and_bad_per_page() {
    let empty = SearchRequest {
      query: "  ".into(),
      ..Default::default()
    };
    assert!(matches!(validate(&empty), Err(SearchError::Validation(_))));

    for (per_page, ok) in [(1, true), (100, true), (101, false), (0, false)] {
      let request = SearchRequest {
        query: "q".into(),
        per_page: Some(per_page),
        ..Default::default()
      };
      assert_eq!(validate(&request).is_ok(), ok, "per_page {per_page}");
    }
  }

  #[test]
  fn runtime_min_score_spares_normalized_mode() {
    assert_eq!(runtime_min_score(SortMode::Relevance), Some(1.0));
    assert_eq!(runtime_min_score(SortMode::Impact), Some(1.0));
    assert_eq!(runtime_min_score(SortMode::Normalized), None);
  }

  #[test]
  fn email_prefixes_require_matched_profile() {
    let mut paper = doc("a");
    paper.authors = vec![
      Author {
        author_email: "jdoe@iitd.ac.in".into(),
        matched_profile: Some("p1".into()),
        ..Default::default()
      },
      Author {
        author_email: "ghost@iitd.ac.in".into(),
        matched_profile: None,
        ..Default::default()
      },
      Author {
        author_email: "jdoe@iitd.ac.in".into(),
        matched_profile: Some("p1".into()),
        ..Default::default()
      },
    ];
    let prefixes = matched_email_prefixes(std::iter::once(&paper));
    assert_eq!(prefixes, vec!["jdoe"]);
  }
}
