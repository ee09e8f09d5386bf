//! Deterministic result-cache keys.
//!
//! The key is `search:` plus the first 16 hex chars of SHA-256 over a
//! canonical JSON rendering of the request: object keys sorted, filter
//! entries with null/empty values dropped, and `search_in` replaced by the
//! effective (default-expanded, sorted) field list.

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use crate::types::SearchRequest;

const KEY_PREFIX: &str = "search:";
const KEY_HASH_LEN: usize = 16;

/// Build the cache key for a request.
pub fn cache_key(request: &SearchRequest) -> String {
  let mut search_in: Vec<&'static str> = request.effective_search_in().iter().map(|f| f.as_str()).collect();
  search_in.sort_unstable();

  let normalized = json!({
    "query": request.query.trim(),
    "filters": request.filters.as_ref().map(|f| serde_json::to_value(f).unwrap_or(Value::Null)),
    "sort": request.sort_mode().as_str(),
    "page": request.page(),
    "per_page": request.per_page(),
    "search_in": search_in,
  });

  let canonical = canonicalize(normalized);
  let encoded = canonical.to_string();
  let digest = Sha256::digest(encoded.as_bytes());
  let hash = hex::encode(digest);
  format!("{KEY_PREFIX}{}", &hash[..KEY_HASH_LEN])
}

/// Sort object keys recursively and drop null/empty-string entries.
fn canonicalize(value: Value) -> Value {
  match value {
    Value::Object(map) => {
      let mut sorted: Vec<(String, Value)> = map.into_iter().collect();
      sorted.sort_by(|a, b| a.0.cmp(&b.0));
      let mut out = Map::new();
      for (key, entry) in sorted {
        if entry.is_null() {
          continue;
        }
        if entry.as_str().is_some_and(|s| s.trim().is_empty()) {
          continue;
        }
        let entry = canonicalize(entry);
        // An all-empty filter object keys the same as no filters at all.
        if entry.as_object().is_some_and(Map::is_empty) {
          continue;
        }
        out.insert(key, entry);
      }
      Value::Object(out)
    }
    Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
    other => other,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{Filters, SearchField, SortMode};

  fn base_request() -> SearchRequest {
    SearchRequest {
      query: "carbon nanotubes".into(),
      filters: Some(Filters {
        year_from: Some(2015),
        author_id: Some("AID42".into()),
        ..Default::default()
      }),
      sort: Some(SortMode::Normalized),
      page: Some(1),
      per_page: Some(10),
      ..Default::default()
    }
  }

  #[test]
  fn key_has_prefix_and_sixteen_hex_chars() {
    let key = cache_key(&base_request());
    assert!(key.starts_with("search:"));
    assert_eq!(key.len(), "search:".len() + 16);
    assert!(key["search:".len()..].chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn key_ignores_null_and_empty_filter_values() {
    let mut with_noise = base_request();
    with_noise.filters = Some(Filters {
      year_from: Some(2015),
      author_id: Some("AID42".into()),
      field_associated: Some(String::new()),
      affiliation: None,
      ..Default::default()
    });
    assert_eq!(cache_key(&base_request()), cache_key(&with_noise));
  }

  #[test]
  fn key_treats_default_and_explicit_search_in_alike() {
    let implicit = base_request();
    let mut explicit = base_request();
    explicit.search_in = Some(vec![
      SearchField::Field,
      SearchField::SubjectArea,
      SearchField::Author,
      SearchField::Abstract,
      SearchField::Title,
    ]);
    assert_eq!(cache_key(&implicit), cache_key(&explicit));
  }

  #[test]
  fn key_changes_with_meaningful_fields() {
    let base = cache_key(&base_request());

    let mut other_query = base_request();
    other_query.query = "graphene".into();
    assert_ne!(base, cache_key(&other_query));

    let mut other_page = base_request();
    other_page.page = Some(2);
    assert_ne!(base, cache_key(&other_page));

    let mut other_sort = base_request();
    other_sort.sort = Some(SortMode::Impact);
    assert_ne!(base, cache_key(&other_sort));

    let mut narrowed = base_request();
    narrowed.search_in = Some(vec![SearchField::Title]);
    assert_ne!(base, cache_key(&narrowed));
  }

  #[test]
  fn empty_filter_object_keys_like_absent_filters() {
    let mut without = base_request();
    without.filters = None;
    let mut empty = base_request();
    empty.filters = Some(Filters::default());
    assert_eq!(cache_key(&without), cache_key(&empty));
  }

  #[test]
  fn key_trims_query_whitespace() {
    let mut padded = base_request();
    padded.query = "  carbon nanotubes ".into();
    assert_eq!(cache_key(&base_request()), cache_key(&padded));
  }

  #[test]
  fn canonicalize_sorts_keys_recursively() {
    let value = json!({ "b": { "z": 1, "a": 2 }, "a": [ { "y": 1, "x": 2 } ] });
    let canonical = canonicalize(value);
    assert_eq!(canonical.to_string(), r#"{"a":[{"x":2,"y":1}],"b":{"a":2,"z":1}}"#);
  }
}
