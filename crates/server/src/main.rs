//! scholar-api - HTTP surface for the hybrid paper search service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use db::{DocumentStore, RedisKv, SearchEngine};
use embedding::{CachedEmbedder, Embedder, HttpEmbedder, RedisEmbeddingCache};
use scholar_core::Config;
use search::SearchService;

mod error;
mod routes;

/// Whole-request deadline at the edge; slow collaborators inside still get
/// their own shorter timeouts.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = Config::from_env();
  let address = format!("{}:{}", config.server.host, config.server.port);

  let store = DocumentStore::connect(&config.mongo)
    .await
    .context("connecting to the document store")?;
  let kv = RedisKv::connect(&config.redis.url)
    .await
    .context("connecting to redis")?;
  let engine = SearchEngine::new(&config.engine);

  let embedder: Arc<dyn Embedder> = Arc::new(CachedEmbedder::new(
    HttpEmbedder::new(&config.embedding),
    Arc::new(RedisEmbeddingCache::new(kv.clone())),
    Duration::from_secs(config.embedding.query_cache_ttl_secs),
  ));

  let service = Arc::new(SearchService::new(
    store,
    engine,
    embedder,
    kv,
    config.search.clone(),
  ));

  let app = routes::router(service)
    .layer(TraceLayer::new_for_http())
    .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
    .layer(CorsLayer::permissive());

  let listener = tokio::net::TcpListener::bind(&address)
    .await
    .with_context(|| format!("binding {address}"))?;
  info!(%address, "scholar-api listening");

  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("serving")?;

  info!("scholar-api stopped");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    let _ = tokio::signal::ctrl_c().await;
  };

  #[cfg(unix)]
  let terminate = async {
    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
      Ok(mut signal) => {
        signal.recv().await;
      }
      Err(_) => std::future::pending().await,
    }
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    _ = ctrl_c => {},
    _ = terminate => {},
  }
  info!("shutdown signal received");
}
