//! Cache entry → engine document projection. Pure, no I/O.

use scholar_core::{Author, CacheEntry, EngineAuthor, EngineDocument};

/// Build the denormalized engine document for a checkpointed entry.
pub fn to_engine_document(entry: &CacheEntry) -> EngineDocument {
  let document = &entry.document;

  let author_names = document.authors.iter().map(|a| a.author_name.clone()).collect();
  // Union across authors; duplicates stay, the analyzer dedups tokens.
  let author_name_variants = document
    .authors
    .iter()
    .flat_map(|a| a.author_available_names.iter().cloned())
    .collect();
  let authors = document.authors.iter().map(to_engine_author).collect();

  EngineDocument {
    mongo_id: document.id.clone(),
    title: document.title.clone(),
    abstract_text: document.abstract_text.clone(),
    author_names,
    author_name_variants,
    authors,
    publication_year: document.publication_year,
    field_associated: document.field_associated.clone(),
    document_type: document.document_type.clone(),
    subject_area: document.subject_area.clone(),
    subject_area_count: document.subject_area.len(),
    citation_count: document.citation_count,
    reference_count: document.reference_count,
    embedding: entry.embedding.clone(),
  }
}

fn to_engine_author(author: &Author) -> EngineAuthor {
  EngineAuthor {
    author_id: author.author_id.clone(),
    author_name: author.author_name.clone(),
    author_available_names: author.author_available_names.clone(),
    author_position: author.author_position.trim().parse().unwrap_or(0),
    author_affiliation: author.author_affiliation.clone(),
    author_email: author.author_email.clone(),
    has_matched_profile: author.matched_profile.as_deref().is_some_and(|p| !p.is_empty()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use scholar_core::Document;

  fn author(id: &str, name: &str, position: &str) -> Author {
    Author {
      author_id: id.into(),
      author_name: name.into(),
      author_position: position.into(),
      ..Default::default()
    }
  }

  fn entry() -> CacheEntry {
    let document = Document {
      id: "64f0c2a1b7".into(),
      title: "Graphene oxide membranes".into(),
      abstract_text: "Filtration study.".into(),
      authors: vec![
        Author {
          author_available_names: vec!["J. Doe".into(), "Jane D.".into()],
          matched_profile: Some("profile-9".into()),
          ..author("A1", "Jane Doe", "1")
        },
        Author {
          author_available_names: vec!["R. Roe".into()],
          ..author("A2", "Rick Roe", "2")
        },
      ],
      publication_year: 2019,
      subject_area: vec!["MATS".into(), "CHEM".into(), "PHYS".into()],
      citation_count: 12,
      reference_count: 40,
      ..Default::default()
    };
    CacheEntry::new(document, vec![0.0; 4])
  }

  #[test]
  fn flattened_lists_project_from_nested_authors() {
    let engine_doc = to_engine_document(&entry());
    assert_eq!(engine_doc.author_names, vec!["Jane Doe", "Rick Roe"]);
    assert_eq!(engine_doc.author_name_variants, vec!["J. Doe", "Jane D.", "R. Roe"]);
    // Order-preserving projection of the nested list.
    let nested: Vec<&str> = engine_doc.authors.iter().map(|a| a.author_name.as_str()).collect();
    assert_eq!(nested, vec!["Jane Doe", "Rick Roe"]);
  }

  #[test]
  fn subject_area_count_matches_list() {
    let engine_doc = to_engine_document(&entry());
    assert_eq!(engine_doc.subject_area_count, engine_doc.subject_area.len());
    assert_eq!(engine_doc.subject_area_count, 3);
  }

  #[test]
  fn position_parses_with_zero_fallback() {
    let mut e = entry();
    e.document.authors[0].author_position = " 1 ".into();
    e.document.authors[1].author_position = "second".into();
    let engine_doc = to_engine_document(&e);
    assert_eq!(engine_doc.authors[0].author_position, 1);
    assert_eq!(engine_doc.authors[1].author_position, 0);
  }

  #[test]
  fn matched_profile_flag_requires_non_empty_reference() {
    let mut e = entry();
    e.document.authors[1].matched_profile = Some(String::new());
    let engine_doc = to_engine_document(&e);
    assert!(engine_doc.authors[0].has_matched_profile);
    assert!(!engine_doc.authors[1].has_matched_profile);
  }

  #[test]
  fn identifiers_and_embedding_carry_over() {
    let e = entry();
    let engine_doc = to_engine_document(&e);
    assert_eq!(engine_doc.mongo_id, e.document.id);
    assert_eq!(engine_doc.embedding, e.embedding);
  }
}
