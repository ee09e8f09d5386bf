//! Route table and handlers for the `/api/v1` surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use search::types::{AuthorDocumentsResponse, CollaboratorsResponse, HealthReport, SimilarResponse};
use search::{SearchRequest, SearchResponse, SearchService};

use crate::error::ApiError;

type AppState = Arc<SearchService>;

pub fn router(service: AppState) -> Router {
  Router::new()
    .route("/api/v1/search", post(search))
    .route("/api/v1/search/health", get(health))
    .route("/api/v1/document/{id}", get(document))
    .route("/api/v1/document/{id}/similar", get(similar))
    .route("/api/v1/documents/by-author/{author_id}", get(documents_by_author))
    .route("/api/v1/author/{id}/collaborators", get(collaborators))
    .with_state(service)
}

async fn search(
  State(service): State<AppState>,
  Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
  Ok(Json(service.search(&request).await?))
}

async fn document(
  State(service): State<AppState>,
  Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
  let document = service.document(&id).await?;
  Ok(Json(json!({ "document": document })))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
  page: Option<u32>,
  per_page: Option<u32>,
}

async fn documents_by_author(
  State(service): State<AppState>,
  Path(author_id): Path<String>,
  Query(query): Query<PageQuery>,
) -> Result<Json<AuthorDocumentsResponse>, ApiError> {
  let response = service
    .documents_by_author(&author_id, query.page.unwrap_or(1), query.per_page.unwrap_or(10))
    .await?;
  Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct SimilarQuery {
  limit: Option<u32>,
}

async fn similar(
  State(service): State<AppState>,
  Path(id): Path<String>,
  Query(query): Query<SimilarQuery>,
) -> Result<Json<SimilarResponse>, ApiError> {
  Ok(Json(service.similar(&id, query.limit).await?))
}

async fn collaborators(
  State(service): State<AppState>,
  Path(id): Path<String>,
) -> Result<Json<CollaboratorsResponse>, ApiError> {
  Ok(Json(service.collaborators(&id).await?))
}

async fn health(State(service): State<AppState>) -> Json<HealthReport> {
  Json(service.health().await)
}
