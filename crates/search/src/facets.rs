//! Shape engine aggregations into response facets.

use serde_json::Value;

use crate::types::{FacetBucket, Facets};

/// Extract the five standard facets from an aggregations payload.
/// Anything missing or malformed becomes an empty list.
pub fn parse_facets(aggregations: Option<&Value>) -> Facets {
  let Some(aggs) = aggregations else {
    return Facets::default();
  };
  Facets {
    years: buckets(&aggs["years"]),
    year_ranges: buckets(&aggs["year_ranges"]),
    document_types: buckets(&aggs["document_types"]),
    fields: buckets(&aggs["fields"]),
    subject_areas: buckets(&aggs["subject_areas"]),
  }
}

fn buckets(agg: &Value) -> Vec<FacetBucket> {
  let Some(items) = agg["buckets"].as_array() else {
    return Vec::new();
  };
  items
    .iter()
    .filter_map(|bucket| {
      let key = match &bucket["key"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
      };
      let count = bucket["doc_count"].as_u64().unwrap_or(0);
      Some(FacetBucket { key, count })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  #[test]
  fn parses_numeric_and_string_keys_in_order() {
    let aggs = json!({
      "years": { "buckets": [
        { "key": 2024, "doc_count": 7 },
        { "key": 2023, "doc_count": 3 },
      ]},
      "year_ranges": { "buckets": [
        { "key": "<2000", "doc_count": 1, "to": 2000.0 },
        { "key": "2020-Present", "doc_count": 9, "from": 2020.0 },
      ]},
      "document_types": { "buckets": [{ "key": "article", "doc_count": 10 }] },
      "fields": { "buckets": [] },
      "subject_areas": { "buckets": [{ "key": "PHYS", "doc_count": 5 }] },
    });

    let facets = parse_facets(Some(&aggs));
    assert_eq!(
      facets.years,
      vec![
        FacetBucket { key: "2024".into(), count: 7 },
        FacetBucket { key: "2023".into(), count: 3 },
      ]
    );
    assert_eq!(facets.year_ranges[1].key, "2020-Present");
    assert_eq!(facets.document_types[0].count, 10);
    assert!(facets.fields.is_empty());
    assert_eq!(facets.subject_areas[0].key, "PHYS");
  }

  #[test]
  fn absent_aggregations_yield_empty_facets() {
    assert_eq!(parse_facets(None), Facets::default());
    assert_eq!(parse_facets(Some(&json!({}))), Facets::default());
  }
}
