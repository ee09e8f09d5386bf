//! Authoritative document store (MongoDB).
//!
//! Bson records are kept private to this module; everything crossing the
//! boundary is a domain type with the `_id` rendered as a hex string.

use futures::TryStreamExt;
use mongodb::{
  Client, Collection,
  bson::{Document as BsonDoc, doc, oid::ObjectId},
  options::{UpdateOneModel, WriteModel},
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use scholar_core::{Author, Document, Person, config::MongoConfig};

use crate::{DbError, Result};

// ============================================================================
// Bson records
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct AuthorRecord {
  #[serde(default)]
  author_id: String,
  #[serde(default)]
  author_name: String,
  #[serde(default)]
  author_available_names: Vec<String>,
  #[serde(default)]
  author_position: String,
  #[serde(default)]
  author_affiliation: String,
  #[serde(default)]
  author_email: String,
  #[serde(default)]
  matched_profile: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PaperRecord {
  #[serde(rename = "_id")]
  id: ObjectId,
  #[serde(default)]
  title: String,
  #[serde(rename = "abstract", default)]
  abstract_text: String,
  #[serde(default)]
  authors: Vec<AuthorRecord>,
  #[serde(default)]
  publication_year: i32,
  #[serde(default)]
  field_associated: String,
  #[serde(default)]
  document_type: String,
  #[serde(default)]
  subject_area: Vec<String>,
  #[serde(default)]
  citation_count: i64,
  #[serde(default)]
  reference_count: i64,
  #[serde(default)]
  open_search_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersonRecord {
  #[serde(rename = "_id")]
  id: ObjectId,
  #[serde(default)]
  full_name: String,
  #[serde(default)]
  email: String,
  #[serde(default)]
  department: String,
}

impl From<AuthorRecord> for Author {
  fn from(r: AuthorRecord) -> Self {
    Author {
      author_id: r.author_id,
      author_name: r.author_name,
      author_available_names: r.author_available_names,
      author_position: r.author_position,
      author_affiliation: r.author_affiliation,
      author_email: r.author_email,
      matched_profile: r.matched_profile,
    }
  }
}

impl From<PaperRecord> for Document {
  fn from(r: PaperRecord) -> Self {
    Document {
      id: r.id.to_hex(),
      title: r.title,
      abstract_text: r.abstract_text,
      authors: r.authors.into_iter().map(Author::from).collect(),
      publication_year: r.publication_year,
      field_associated: r.field_associated,
      document_type: r.document_type,
      subject_area: r.subject_area,
      citation_count: r.citation_count,
      reference_count: r.reference_count,
      open_search_id: r.open_search_id.filter(|v| !v.is_empty()),
    }
  }
}

impl From<PersonRecord> for Person {
  fn from(r: PersonRecord) -> Self {
    Person {
      id: r.id.to_hex(),
      full_name: r.full_name,
      email: r.email,
      department: r.department,
    }
  }
}

fn parse_oid(id: &str) -> Result<ObjectId> {
  ObjectId::parse_str(id).map_err(|_| DbError::InvalidId(id.to_string()))
}

/// Filter matching records with no usable cross-reference id.
fn unsynced_filter() -> BsonDoc {
  doc! {
    "$or": [
      { "open_search_id": { "$exists": false } },
      { "open_search_id": mongodb::bson::Bson::Null },
      { "open_search_id": "" },
    ]
  }
}

// ============================================================================
// Store
// ============================================================================

/// Client for the authoritative paper/people collections.
#[derive(Debug, Clone)]
pub struct DocumentStore {
  client: Client,
  documents: Collection<PaperRecord>,
  people: Collection<PersonRecord>,
}

impl DocumentStore {
  pub async fn connect(config: &MongoConfig) -> Result<Self> {
    let client = Client::with_uri_str(&config.uri).await?;
    let database = client.database(&config.database);
    Ok(Self {
      documents: database.collection(&config.documents_collection),
      people: database.collection(&config.people_collection),
      client,
    })
  }

  /// Liveness probe.
  pub async fn ping(&self) -> Result<()> {
    self
      .documents
      .clone_with_type::<BsonDoc>()
      .find_one(doc! {})
      .await?;
    Ok(())
  }

  pub async fn count_documents(&self) -> Result<u64> {
    Ok(self.documents.count_documents(doc! {}).await?)
  }

  /// Records still missing a cross-reference id (phase-2 reconciliation).
  pub async fn count_unsynced(&self) -> Result<u64> {
    Ok(self.documents.count_documents(unsynced_filter()).await?)
  }

  /// Stream documents through a bounded channel in cursor order.
  ///
  /// Back-pressure is the channel: when downstream is full, the cursor read
  /// blocks. Returns the number of documents sent. Stops early (without
  /// error) when the receiver goes away or cancellation fires.
  pub async fn stream_documents(
    &self,
    batch_size: u32,
    limit: Option<i64>,
    tx: mpsc::Sender<Document>,
    cancel: CancellationToken,
  ) -> Result<u64> {
    let mut find = self.documents.find(doc! {}).batch_size(batch_size);
    if let Some(limit) = limit {
      find = find.limit(limit);
    }
    let mut cursor = find.await?;
    let mut sent = 0u64;

    loop {
      let next = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          debug!(sent, "document stream cancelled");
          return Ok(sent);
        }
        next = cursor.try_next() => next?,
      };

      let Some(record) = next else { break };
      let document = Document::from(record);

      tokio::select! {
        biased;
        _ = cancel.cancelled() => {
          debug!(sent, "document stream cancelled");
          return Ok(sent);
        }
        result = tx.send(document) => {
          if result.is_err() {
            debug!(sent, "document stream receiver dropped");
            return Ok(sent);
          }
        }
      }
      sent += 1;
    }

    debug!(sent, "document stream complete");
    Ok(sent)
  }

  pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
    let oid = parse_oid(id)?;
    let record = self.documents.find_one(doc! { "_id": oid }).await?;
    Ok(record.map(Document::from))
  }

  /// Batch hydration fetch. Unknown ids are silently absent from the result.
  pub async fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<Document>> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }
    let oids: Vec<ObjectId> = ids.iter().filter_map(|id| ObjectId::parse_str(id).ok()).collect();
    let mut cursor = self.documents.find(doc! { "_id": { "$in": oids } }).await?;
    let mut documents = Vec::with_capacity(ids.len());
    while let Some(record) = cursor.try_next().await? {
      documents.push(Document::from(record));
    }
    Ok(documents)
  }

  /// Paged query over the nested author id, newest papers first.
  pub async fn find_by_author(&self, author_id: &str, page: u64, per_page: i64) -> Result<(Vec<Document>, u64)> {
    let filter = doc! { "authors.author_id": author_id };
    let total = self.documents.count_documents(filter.clone()).await?;
    let skip = page.saturating_sub(1) * per_page as u64;
    let mut cursor = self
      .documents
      .find(filter)
      .sort(doc! { "publication_year": -1 })
      .skip(skip)
      .limit(per_page)
      .await?;
    let mut documents = Vec::new();
    while let Some(record) = cursor.try_next().await? {
      documents.push(Document::from(record));
    }
    Ok((documents, total))
  }

  /// Set cross-reference ids as one unordered bulk write.
  ///
  /// Updates are idempotent set-field upserts by id; ordering across the
  /// batch is not meaningful.
  pub async fn set_engine_ids(&self, pairs: &[(String, String)]) -> Result<u64> {
    if pairs.is_empty() {
      return Ok(0);
    }
    let namespace = self.documents.namespace();
    let mut models = Vec::with_capacity(pairs.len());
    for (id, engine_id) in pairs {
      let oid = parse_oid(id)?;
      models.push(WriteModel::UpdateOne(
        UpdateOneModel::builder()
          .namespace(namespace.clone())
          .filter(doc! { "_id": oid })
          .update(doc! { "$set": { "open_search_id": engine_id } })
          .build(),
      ));
    }
    let result = self.client.bulk_write(models).ordered(false).await?;
    debug!(updated = result.modified_count, "back-synced engine ids");
    Ok(result.modified_count as u64)
  }

  /// Remove every cross-reference id (full reindex prep).
  pub async fn clear_engine_ids(&self) -> Result<u64> {
    let result = self
      .documents
      .update_many(doc! {}, doc! { "$unset": { "open_search_id": "" } })
      .await?;
    Ok(result.modified_count)
  }

  /// Look up people whose email starts with any of the given prefixes.
  pub async fn find_people_by_email_prefixes(&self, prefixes: &[String]) -> Result<Vec<Person>> {
    if prefixes.is_empty() {
      return Ok(Vec::new());
    }
    let clauses: Vec<BsonDoc> = prefixes
      .iter()
      .map(|p| doc! { "email": { "$regex": format!("^{}", regex_escape(p)) } })
      .collect();
    let mut cursor = self.people.find(doc! { "$or": clauses }).await?;
    let mut people = Vec::new();
    while let Some(record) = cursor.try_next().await? {
      people.push(Person::from(record));
    }
    Ok(people)
  }

  /// Arbitrary people records; only used by the opt-in fallback path.
  pub async fn list_people(&self, limit: i64) -> Result<Vec<Person>> {
    let mut cursor = self.people.find(doc! {}).limit(limit).await?;
    let mut people = Vec::new();
    while let Some(record) = cursor.try_next().await? {
      people.push(Person::from(record));
    }
    if !people.is_empty() {
      warn!(count = people.len(), "related-people fallback returned arbitrary records");
    }
    Ok(people)
  }
}

/// Escape regex metacharacters in a literal prefix.
fn regex_escape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    if ".^$*+?()[]{}|\\".contains(c) {
      out.push('\\');
    }
    out.push(c);
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn regex_escape_handles_metacharacters() {
    assert_eq!(regex_escape("j.doe+x"), "j\\.doe\\+x");
    assert_eq!(regex_escape("plain"), "plain");
  }

  #[test]
  fn unsynced_filter_covers_missing_null_and_empty() {
    let filter = unsynced_filter();
    let arms = filter.get_array("$or").unwrap();
    assert_eq!(arms.len(), 3);
  }

  #[test]
  fn paper_record_converts_to_domain() {
    let oid = ObjectId::new();
    let record = PaperRecord {
      id: oid,
      title: "T".into(),
      abstract_text: "A".into(),
      authors: vec![AuthorRecord {
        author_id: "AID1".into(),
        author_name: "Jane Doe".into(),
        author_available_names: vec!["J. Doe".into()],
        author_position: "1".into(),
        author_affiliation: "Dept".into(),
        author_email: "jane@example.edu".into(),
        matched_profile: Some("p1".into()),
      }],
      publication_year: 2021,
      field_associated: "Physics".into(),
      document_type: "article".into(),
      subject_area: vec!["PHYS".into()],
      citation_count: 3,
      reference_count: 10,
      open_search_id: Some(String::new()),
    };
    let document = Document::from(record);
    assert_eq!(document.id, oid.to_hex());
    assert_eq!(document.authors[0].author_position, "1");
    // Empty cross-reference ids normalize to None.
    assert_eq!(document.open_search_id, None);
  }
}
