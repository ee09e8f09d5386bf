//! Phase 2: bulk-index cached entries and back-sync engine ids.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use db::{DocumentStore, SearchEngine};
use scholar_core::{CacheEntry, EngineDocument, config::IndexerConfig};

use crate::{DocumentCache, IndexError, mapper, schema};

use super::{PipelineStats, spawn_progress};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Phase2Report {
  /// Entries accepted by the engine (per-item 2xx).
  pub indexed: u64,
  /// Cross-reference updates written back to the authoritative store.
  pub synced: u64,
  /// Per-item rejections, failed slices, and failed back-sync batches.
  pub errors: u64,
}

/// Run phase 2: load cache, ensure index, bulk-index, back-sync ids.
///
/// Engine slice failures are counted and skipped. Back-sync failures are
/// counted and never unwind the engine write; the next phase 2 run
/// reconciles whatever is still unmarked.
pub async fn run_phase2(
  store: &DocumentStore,
  engine: &SearchEngine,
  config: &IndexerConfig,
  quiet: bool,
  cancel: CancellationToken,
) -> Result<Phase2Report, IndexError> {
  // Step 1: load the checkpoint cache.
  let cache = DocumentCache::load(&config.cache_dir).await?;
  let entries = cache.entries().await;
  if entries.is_empty() {
    info!("document cache is empty, nothing to index");
    return Ok(Phase2Report::default());
  }

  // Step 2: the index must exist before any bulk write. Fatal on error.
  schema::ensure_index(engine).await?;
  info!(entries = entries.len(), "phase 2 starting");

  let stats = Arc::new(PipelineStats::default());
  let workers = config.workers();
  let bulk_size = config.bulk_size.max(1);

  let (slice_tx, slice_rx) = mpsc::channel::<Vec<CacheEntry>>(workers * 2);
  let slice_rx = Arc::new(Mutex::new(slice_rx));
  let (pair_tx, pair_rx) = mpsc::channel::<(String, String)>(bulk_size * 2);

  // Feeder: split cache entries into bulk slices.
  let feeder = {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      for slice in entries.chunks(bulk_size) {
        let slice = slice.to_vec();
        tokio::select! {
          biased;
          _ = cancel.cancelled() => return,
          result = slice_tx.send(slice) => {
            if result.is_err() {
              return;
            }
          }
        }
      }
    })
  };

  // Step 3: index workers.
  let mut worker_handles = Vec::with_capacity(workers);
  for worker_id in 0..workers {
    let rx = slice_rx.clone();
    let engine = engine.clone();
    let stats = stats.clone();
    let cancel = cancel.clone();
    let pair_tx = pair_tx.clone();
    worker_handles.push(tokio::spawn(async move {
      loop {
        let slice = {
          let mut rx = rx.lock().await;
          tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            slice = rx.recv() => slice,
          }
        };
        let Some(slice) = slice else {
          debug!(worker_id, "index worker: input exhausted");
          break;
        };

        index_slice(&engine, &slice, &stats, &pair_tx).await;
      }
    }));
  }
  drop(pair_tx);
  drop(slice_rx);

  // Step 4: a single back-sync worker protects the store's write quota.
  let syncer = {
    let store = store.clone();
    let stats = stats.clone();
    let delay = Duration::from_millis(config.mongo_bulk_delay_ms);
    tokio::spawn(async move {
      let mut pair_rx = pair_rx;
      let mut pending: Vec<(String, String)> = Vec::with_capacity(bulk_size);
      while let Some(pair) = pair_rx.recv().await {
        pending.push(pair);
        if pending.len() >= bulk_size {
          sync_pairs(&store, &mut pending, &stats, delay).await;
        }
      }
      if !pending.is_empty() {
        sync_pairs(&store, &mut pending, &stats, delay).await;
      }
    })
  };

  let progress_done = CancellationToken::new();
  let progress = (!quiet).then(|| spawn_progress("phase2", stats.clone(), None, progress_done.clone()));

  feeder.await.map_err(|e| IndexError::Join(e.to_string()))?;
  for handle in worker_handles {
    handle.await.map_err(|e| IndexError::Join(e.to_string()))?;
  }
  syncer.await.map_err(|e| IndexError::Join(e.to_string()))?;
  progress_done.cancel();
  if let Some(progress) = progress {
    let _ = progress.await;
  }

  let snapshot = stats.snapshot();
  let report = Phase2Report {
    indexed: snapshot.indexed,
    synced: snapshot.synced,
    errors: snapshot.errors,
  };
  info!(
    indexed = report.indexed,
    synced = report.synced,
    errors = report.errors,
    "phase 2 complete"
  );
  Ok(report)
}

/// Bulk-index one slice; push (authoritative id, engine id) pairs for every
/// per-item 2xx. A failed request counts the whole slice as errors.
pub(crate) async fn index_slice(
  engine: &SearchEngine,
  slice: &[CacheEntry],
  stats: &PipelineStats,
  pair_tx: &mpsc::Sender<(String, String)>,
) {
  let documents: Vec<EngineDocument> = slice.iter().map(mapper::to_engine_document).collect();
  match engine.bulk_index(&documents).await {
    Ok(outcomes) => {
      for (entry, outcome) in slice.iter().zip(outcomes) {
        match (outcome.ok, outcome.engine_id) {
          (true, Some(engine_id)) => {
            stats.indexed.fetch_add(1, Ordering::Relaxed);
            if pair_tx.send((entry.document.id.clone(), engine_id)).await.is_err() {
              return;
            }
          }
          _ => {
            warn!(id = %entry.document.id, status = outcome.status, "engine rejected document");
            stats.errors.fetch_add(1, Ordering::Relaxed);
          }
        }
      }
    }
    Err(e) => {
      warn!(slice_len = slice.len(), error = %e, "bulk index request failed, skipping slice");
      stats.errors.fetch_add(slice.len() as u64, Ordering::Relaxed);
    }
  }
}

/// Apply one unordered back-sync batch, then throttle.
pub(crate) async fn sync_pairs(
  store: &DocumentStore,
  pending: &mut Vec<(String, String)>,
  stats: &PipelineStats,
  delay: Duration,
) {
  let batch = std::mem::take(pending);
  let count = batch.len() as u64;
  match store.set_engine_ids(&batch).await {
    Ok(_) => {
      stats.synced.fetch_add(count, Ordering::Relaxed);
    }
    Err(e) => {
      warn!(batch = count, error = %e, "back-sync batch failed");
      stats.errors.fetch_add(count, Ordering::Relaxed);
    }
  }
  if !delay.is_zero() {
    tokio::time::sleep(delay).await;
  }
}
