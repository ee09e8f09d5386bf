use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

/// Errors from any of the external-store clients.
#[derive(Debug, Error)]
pub enum DbError {
  #[error("mongodb error: {0}")]
  Mongo(#[from] mongodb::error::Error),
  #[error("redis error: {0}")]
  Redis(#[from] redis::RedisError),
  #[error("engine request error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("engine returned {status}: {body}")]
  Engine { status: u16, body: String },
  #[error("invalid document id: {0}")]
  InvalidId(String),
  #[error("decode error: {0}")]
  Decode(String),
  #[error("cancelled")]
  Cancelled,
}

impl DbError {
  pub fn engine(status: u16, body: impl Into<String>) -> Self {
    Self::Engine {
      status,
      body: body.into(),
    }
  }
}
