//! Co-author aggregation for one author id.

use serde_json::{Value, json};

use crate::{
  SearchError,
  service::SearchService,
  types::{Collaborator, CollaboratorsResponse},
};

const MAX_COLLABORATORS: u32 = 50;

/// Papers containing the author, with a nested terms aggregation over every
/// co-occurring author id and one `top_hits` for the display fields.
pub(crate) fn collaborators_query(author_id: &str) -> Value {
  json!({
    "size": 0,
    "track_total_hits": true,
    "query": {
      "nested": {
        "path": "authors",
        "query": { "term": { "authors.author_id": author_id } }
      }
    },
    "aggs": {
      "authors": {
        "nested": { "path": "authors" },
        "aggs": {
          "collaborators": {
            "terms": {
              "field": "authors.author_id",
              "size": MAX_COLLABORATORS,
              "exclude": author_id,
            },
            "aggs": {
              "info": {
                "top_hits": {
                  "size": 1,
                  "_source": { "includes": ["authors.author_name", "authors.author_affiliation"] }
                }
              }
            }
          }
        }
      }
    }
  })
}

/// Flatten the nested aggregation into collaborator rows.
pub(crate) fn parse_collaborators(aggregations: Option<&Value>) -> Vec<Collaborator> {
  let Some(buckets) = aggregations
    .and_then(|aggs| aggs["authors"]["collaborators"]["buckets"].as_array())
  else {
    return Vec::new();
  };

  buckets
    .iter()
    .filter_map(|bucket| {
      let author_id = bucket["key"].as_str()?.to_string();
      let papers = bucket["doc_count"].as_u64().unwrap_or(0);
      let source = &bucket["info"]["hits"]["hits"][0]["_source"];
      Some(Collaborator {
        author_id,
        name: string_at(source, "author_name"),
        affiliation: string_at(source, "author_affiliation"),
        papers,
      })
    })
    .collect()
}

/// Nested `top_hits` sources may be relative to the nested document or
/// wrapped under the path; accept both.
fn string_at(source: &Value, field: &str) -> String {
  source
    .get(field)
    .or_else(|| source.get("authors").and_then(|a| a.get(field)))
    .and_then(Value::as_str)
    .unwrap_or_default()
    .to_string()
}

impl SearchService {
  /// `GET /author/{id}/collaborators`
  pub async fn collaborators(&self, author_id: &str) -> Result<CollaboratorsResponse, SearchError> {
    if author_id.trim().is_empty() {
      return Err(SearchError::Validation("author id must not be empty".into()));
    }
    let results = self.engine().search(&collaborators_query(author_id)).await?;
    Ok(CollaboratorsResponse {
      author_id: author_id.to_string(),
      total_papers: results.total,
      collaborators: parse_collaborators(results.aggregations.as_ref()),
    })
  }
}
