//! HTTP error mapping.
//!
//! User-visible messages are fixed strings; error detail stays in the logs.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, warn};

use search::SearchError;

pub struct ApiError {
  status: StatusCode,
  message: String,
}

impl ApiError {
  pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
    Self {
      status,
      message: message.into(),
    }
  }
}

impl From<SearchError> for ApiError {
  fn from(e: SearchError) -> Self {
    match e {
      SearchError::Validation(detail) => ApiError::new(StatusCode::BAD_REQUEST, detail),
      SearchError::NotFound => ApiError::new(StatusCode::NOT_FOUND, "not found"),
      SearchError::EmbeddingUnavailable => {
        warn!("embedding service unavailable");
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "embedding service unavailable")
      }
      SearchError::Engine(detail) => {
        error!(error = %detail, "engine error");
        ApiError::new(StatusCode::BAD_GATEWAY, "search engine unavailable")
      }
      SearchError::Store(detail) => {
        error!(error = %detail, "document store error");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
      }
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status, Json(json!({ "error": self.message }))).into_response()
  }
}
