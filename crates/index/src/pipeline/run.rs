//! Single-shot streaming pipeline: fetch → embed → index → back-sync with
//! no cache checkpoint in between.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use db::{DocumentStore, SearchEngine};
use embedding::{Embedder, EmbeddingError};
use scholar_core::{CacheEntry, Document, config::IndexerConfig};

use crate::{IndexError, schema};

use super::{
  PipelineStats, StageGauges, StatsSnapshot, embed_batch, phase2, send_or_cancelled, spawn_progress,
};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
  pub limit: Option<i64>,
  /// Re-process documents that already carry a cross-reference id.
  pub reindex_all: bool,
  pub workers: Option<usize>,
  pub quiet: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RunReport {
  pub fetched: u64,
  pub skipped: u64,
  pub embedded: u64,
  pub indexed: u64,
  pub synced: u64,
  pub errors: u64,
}

impl From<StatsSnapshot> for RunReport {
  fn from(s: StatsSnapshot) -> Self {
    Self {
      fetched: s.fetched,
      skipped: s.skipped,
      embedded: s.embedded,
      indexed: s.indexed,
      synced: s.synced,
      errors: s.errors,
    }
  }
}

/// Run all stages concurrently with bounded channels between them.
pub async fn run_streaming(
  store: &DocumentStore,
  engine: &SearchEngine,
  embedder: Arc<dyn Embedder>,
  config: &IndexerConfig,
  options: RunOptions,
  cancel: CancellationToken,
) -> Result<RunReport, IndexError> {
  schema::ensure_index(engine).await?;

  let stats = Arc::new(PipelineStats::default());
  let gauges = Arc::new(StageGauges::default());
  let workers = options.workers.unwrap_or(config.num_workers).max(2);
  let batch_size = config.mongo_batch_size.max(1);
  let bulk_size = config.bulk_size.max(1);
  info!(workers, "streaming pipeline starting");

  let (doc_tx, mut doc_rx) = mpsc::channel::<Document>(batch_size * 2);
  let (batch_tx, batch_rx) = mpsc::channel::<Vec<Document>>(workers * 2);
  let batch_rx = Arc::new(Mutex::new(batch_rx));
  let (entries_tx, entries_rx) = mpsc::channel::<Vec<CacheEntry>>(workers * 2);
  let entries_rx = Arc::new(Mutex::new(entries_rx));
  let (pair_tx, pair_rx) = mpsc::channel::<(String, String)>(bulk_size * 2);

  // Fetcher.
  let fetcher = {
    let store = store.clone();
    let cancel = cancel.clone();
    let limit = options.limit;
    tokio::spawn(async move { store.stream_documents(batch_size as u32, limit, doc_tx, cancel).await })
  };

  // Batcher: without a cache, "already processed" means the record already
  // carries a cross-reference id.
  let batcher = {
    let stats = stats.clone();
    let reindex_all = options.reindex_all;
    let cancel = cancel.clone();
    tokio::spawn(async move {
      let mut current = Vec::with_capacity(batch_size);
      while let Some(document) = doc_rx.recv().await {
        stats.fetched.fetch_add(1, Ordering::Relaxed);
        if !reindex_all && document.open_search_id.is_some() {
          stats.skipped.fetch_add(1, Ordering::Relaxed);
          continue;
        }
        current.push(document);
        if current.len() >= batch_size {
          if send_or_cancelled(&batch_tx, std::mem::take(&mut current), &cancel).await {
            return;
          }
          current.reserve(batch_size);
        }
      }
      if !current.is_empty() {
        let _ = send_or_cancelled(&batch_tx, current, &cancel).await;
      }
    })
  };

  // Embed workers.
  let mut embed_handles = Vec::with_capacity(workers);
  for worker_id in 0..workers {
    let rx = batch_rx.clone();
    let tx = entries_tx.clone();
    let embedder = embedder.clone();
    let stats = stats.clone();
    let gauges = gauges.clone();
    let cancel = cancel.clone();
    let embed_batch_size = config.embed_batch_size.max(1);
    embed_handles.push(tokio::spawn(async move {
      loop {
        let batch = {
          let mut rx = rx.lock().await;
          tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            batch = rx.recv() => batch,
          }
        };
        let Some(batch) = batch else {
          debug!(worker_id, "embed stage: input exhausted");
          break;
        };

        gauges.embedding.fetch_add(batch.len() as i64, Ordering::Relaxed);
        let result = embed_batch(&embedder, &batch, embed_batch_size, &cancel).await;
        gauges.embedding.fetch_sub(batch.len() as i64, Ordering::Relaxed);

        match result {
          Ok(entries) => {
            stats.embedded.fetch_add(entries.len() as u64, Ordering::Relaxed);
            tokio::select! {
              biased;
              _ = cancel.cancelled() => break,
              result = tx.send(entries) => {
                if result.is_err() {
                  break;
                }
              }
            }
          }
          Err(EmbeddingError::Cancelled) => break,
          Err(e) => {
            warn!(worker_id, batch_len = batch.len(), error = %e, "dropping batch after embedding failure");
            stats.errors.fetch_add(1, Ordering::Relaxed);
          }
        }
      }
    }));
  }
  drop(entries_tx);
  drop(batch_rx);

  // Index workers.
  let mut index_handles = Vec::with_capacity(workers);
  for worker_id in 0..workers {
    let rx = entries_rx.clone();
    let engine = engine.clone();
    let stats = stats.clone();
    let gauges = gauges.clone();
    let cancel = cancel.clone();
    let pair_tx = pair_tx.clone();
    index_handles.push(tokio::spawn(async move {
      loop {
        let entries = {
          let mut rx = rx.lock().await;
          tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            entries = rx.recv() => entries,
          }
        };
        let Some(entries) = entries else {
          debug!(worker_id, "index stage: input exhausted");
          break;
        };

        gauges.indexing.fetch_add(entries.len() as i64, Ordering::Relaxed);
        for slice in entries.chunks(bulk_size) {
          phase2::index_slice(&engine, slice, &stats, &pair_tx).await;
        }
        gauges.indexing.fetch_sub(entries.len() as i64, Ordering::Relaxed);
      }
    }));
  }
  drop(pair_tx);
  drop(entries_rx);

  // Single back-sync worker.
  let syncer = {
    let store = store.clone();
    let stats = stats.clone();
    let gauges = gauges.clone();
    let delay = Duration::from_millis(config.mongo_bulk_delay_ms);
    tokio::spawn(async move {
      let mut pair_rx = pair_rx;
      let mut pending: Vec<(String, String)> = Vec::with_capacity(bulk_size);
      while let Some(pair) = pair_rx.recv().await {
        gauges.syncing.store(pending.len() as i64 + 1, Ordering::Relaxed);
        pending.push(pair);
        if pending.len() >= bulk_size {
          phase2::sync_pairs(&store, &mut pending, &stats, delay).await;
        }
      }
      if !pending.is_empty() {
        phase2::sync_pairs(&store, &mut pending, &stats, delay).await;
      }
      gauges.syncing.store(0, Ordering::Relaxed);
    })
  };

  let progress_done = CancellationToken::new();
  let progress = (!options.quiet).then(|| {
    spawn_progress("run", stats.clone(), Some(gauges.clone()), progress_done.clone())
  });

  let fetch_result = fetcher.await.map_err(|e| IndexError::Join(e.to_string()))?;
  batcher.await.map_err(|e| IndexError::Join(e.to_string()))?;
  for handle in embed_handles {
    handle.await.map_err(|e| IndexError::Join(e.to_string()))?;
  }
  for handle in index_handles {
    handle.await.map_err(|e| IndexError::Join(e.to_string()))?;
  }
  syncer.await.map_err(|e| IndexError::Join(e.to_string()))?;
  progress_done.cancel();
  if let Some(progress) = progress {
    let _ = progress.await;
  }

  if let Err(e) = fetch_result {
    return Err(e.into());
  }

  let report = RunReport::from(stats.snapshot());
  info!(
    fetched = report.fetched,
    skipped = report.skipped,
    embedded = report.embedded,
    indexed = report.indexed,
    synced = report.synced,
    errors = report.errors,
    "streaming pipeline complete"
  );
  Ok(report)
}
