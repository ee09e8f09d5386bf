//! Subcommand implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::info;

use db::{DocumentStore, SearchEngine};
use embedding::{Embedder, HttpEmbedder};
use index::{
  DocumentCache, Phase1Options, RunOptions, run_phase1, run_phase2, run_streaming, schema,
};
use scholar_core::Config;

async fn connect_store(config: &Config) -> Result<DocumentStore> {
  DocumentStore::connect(&config.mongo)
    .await
    .context("connecting to the document store")
}

fn embedder(config: &Config) -> Arc<dyn Embedder> {
  Arc::new(HttpEmbedder::new(&config.embedding))
}

pub async fn phase1(
  config: &Config,
  limit: Option<i64>,
  reindex_all: bool,
  workers: Option<usize>,
  quiet: bool,
  cancel: CancellationToken,
) -> Result<()> {
  let store = connect_store(config).await?;
  let report = run_phase1(
    &store,
    embedder(config),
    &config.indexer,
    Phase1Options {
      limit,
      reindex_all,
      workers,
      quiet,
    },
    cancel,
  )
  .await?;
  println!(
    "phase 1: processed={} skipped={} errors={} cached={}",
    report.processed, report.skipped, report.errors, report.cached_entries
  );
  if report.errors > 0 {
    bail!("phase 1 finished with {} batch errors", report.errors);
  }
  Ok(())
}

pub async fn phase2(config: &Config, quiet: bool, cancel: CancellationToken) -> Result<()> {
  let store = connect_store(config).await?;
  let engine = SearchEngine::new(&config.engine);
  let report = run_phase2(&store, &engine, &config.indexer, quiet, cancel).await?;
  println!(
    "phase 2: indexed={} synced={} errors={}",
    report.indexed, report.synced, report.errors
  );
  if report.errors > 0 {
    bail!("phase 2 finished with {} errors", report.errors);
  }
  Ok(())
}

pub async fn run(
  config: &Config,
  limit: Option<i64>,
  reindex_all: bool,
  workers: Option<usize>,
  cancel: CancellationToken,
) -> Result<()> {
  let store = connect_store(config).await?;
  let engine = SearchEngine::new(&config.engine);
  let report = run_streaming(
    &store,
    &engine,
    embedder(config),
    &config.indexer,
    RunOptions {
      limit,
      reindex_all,
      workers,
      quiet: false,
    },
    cancel,
  )
  .await?;
  println!(
    "run: fetched={} skipped={} embedded={} indexed={} synced={} errors={}",
    report.fetched, report.skipped, report.embedded, report.indexed, report.synced, report.errors
  );
  if report.errors > 0 {
    bail!("run finished with {} errors", report.errors);
  }
  Ok(())
}

pub async fn status(config: &Config) -> Result<()> {
  let cache_dir = Path::new(&config.indexer.cache_dir);
  if DocumentCache::exists(cache_dir) {
    let cache = DocumentCache::load(cache_dir).await?;
    let stats = cache.stats().await;
    println!("cache: {} entries (of {} targeted)", stats.entries, stats.total_documents);
    println!("  created:  {}", stats.created_at.to_rfc3339());
    println!("  modified: {}", stats.last_modified.to_rfc3339());
    if stats.reindex_all {
      println!("  reindex-all run in progress");
    }
  } else {
    println!("cache: none at {}", cache_dir.display());
  }

  let store = connect_store(config).await?;
  let total = store.count_documents().await?;
  let unsynced = store.count_unsynced().await?;
  println!("store: {} documents, {} without engine id", total, unsynced);

  let engine = SearchEngine::new(&config.engine);
  if engine.index_exists().await? {
    println!("engine: index '{}' with {} documents", engine.index_name(), engine.count().await?);
  } else {
    println!("engine: index '{}' does not exist", engine.index_name());
  }
  Ok(())
}

pub async fn clean(config: &Config) -> Result<()> {
  let cache = DocumentCache::load(&config.indexer.cache_dir).await?;
  cache.clear().await?;
  println!("cache cleared");
  Ok(())
}

pub async fn create_index(config: &Config) -> Result<()> {
  let engine = SearchEngine::new(&config.engine);
  if schema::ensure_index(&engine).await? {
    println!("index '{}' created", engine.index_name());
  } else {
    println!("index '{}' already exists", engine.index_name());
  }
  Ok(())
}

/// Full rebuild: drop index, recreate it, clear cross-reference ids and the
/// cache, then run both phases with reindex-all.
pub async fn reindex_full(config: &Config, cancel: CancellationToken) -> Result<()> {
  let store = connect_store(config).await?;
  let engine = SearchEngine::new(&config.engine);

  info!("recreating index");
  schema::recreate_index(&engine).await?;

  info!("clearing cross-reference ids");
  let cleared = store.clear_engine_ids().await?;
  println!("cleared engine ids on {} documents", cleared);

  let cache = DocumentCache::load(&config.indexer.cache_dir).await?;
  cache.clear().await?;

  let report1 = run_phase1(
    &store,
    embedder(config),
    &config.indexer,
    Phase1Options {
      reindex_all: true,
      ..Default::default()
    },
    cancel.clone(),
  )
  .await?;
  println!(
    "phase 1: processed={} skipped={} errors={}",
    report1.processed, report1.skipped, report1.errors
  );
  if cancel.is_cancelled() {
    bail!("cancelled before phase 2");
  }

  let report2 = run_phase2(&store, &engine, &config.indexer, false, cancel).await?;
  println!(
    "phase 2: indexed={} synced={} errors={}",
    report2.indexed, report2.synced, report2.errors
  );
  if report1.errors + report2.errors > 0 {
    bail!("reindex finished with {} errors", report1.errors + report2.errors);
  }
  Ok(())
}
