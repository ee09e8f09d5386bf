//! Phase 1: fetch documents and generate embeddings into the cache.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use db::DocumentStore;
use embedding::{Embedder, EmbeddingError};
use scholar_core::{Document, config::IndexerConfig};

use crate::{DocumentCache, IndexError};

use super::{PipelineStats, embed_batch, send_or_cancelled, spawn_progress};

#[derive(Debug, Clone, Default)]
pub struct Phase1Options {
  /// Cap on documents pulled from the cursor.
  pub limit: Option<i64>,
  /// Clear the cache first and re-embed everything.
  pub reindex_all: bool,
  /// Override the configured worker count.
  pub workers: Option<usize>,
  /// Suppress the progress tick.
  pub quiet: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Phase1Report {
  /// Documents embedded and cached by this run.
  pub processed: u64,
  /// Documents dropped because the cache already held them.
  pub skipped: u64,
  /// Outer batches dropped after an embedding failure.
  pub errors: u64,
  /// Cache size after the final save.
  pub cached_entries: usize,
}

/// Run phase 1: load cache, count work, stream, embed, persist.
///
/// Embedding failures drop the affected batch and continue; cache save
/// failures are fatal. On cancellation in-flight batches drain and the
/// cache is saved before returning.
pub async fn run_phase1(
  store: &DocumentStore,
  embedder: Arc<dyn Embedder>,
  config: &IndexerConfig,
  options: Phase1Options,
  cancel: CancellationToken,
) -> Result<Phase1Report, IndexError> {
  // Step 1: load (or reset) the checkpoint cache.
  let cache = Arc::new(DocumentCache::load(&config.cache_dir).await?);
  if options.reindex_all {
    cache.clear().await?;
    cache.set_reindex_all(true).await;
  }

  // Step 2: count remaining work.
  let total = store.count_documents().await?;
  cache.set_total_documents(total).await;
  let cached = cache.len().await;
  info!(total, cached, "phase 1 starting");

  let stats = Arc::new(PipelineStats::default());
  let workers = options.workers.unwrap_or(config.num_workers).max(2);
  let batch_size = config.mongo_batch_size.max(1);

  let (doc_tx, mut doc_rx) = mpsc::channel::<Document>(batch_size * 2);
  let (batch_tx, batch_rx) = mpsc::channel::<Vec<Document>>(workers * 2);
  let batch_rx = Arc::new(Mutex::new(batch_rx));

  // Step 3: stream documents from the authoritative cursor.
  let fetcher = {
    let store = store.clone();
    let cancel = cancel.clone();
    let limit = options.limit;
    tokio::spawn(async move { store.stream_documents(batch_size as u32, limit, doc_tx, cancel).await })
  };

  // Batcher: drop already-processed ids, form outer batches.
  let batcher = {
    let cache = cache.clone();
    let stats = stats.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move {
      let mut current = Vec::with_capacity(batch_size);
      while let Some(document) = doc_rx.recv().await {
        stats.fetched.fetch_add(1, Ordering::Relaxed);
        if cache.is_processed(&document.id) {
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

  // Step 4: embed workers, all-or-nothing per outer batch.
  let mut worker_handles = Vec::with_capacity(workers);
  for worker_id in 0..workers {
    let rx = batch_rx.clone();
    let embedder = embedder.clone();
    let cache = cache.clone();
    let stats = stats.clone();
    let cancel = cancel.clone();
    let embed_batch_size = config.embed_batch_size.max(1);
    worker_handles.push(tokio::spawn(async move {
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
          debug!(worker_id, "embed worker: input exhausted");
          break;
        };

        match embed_batch(&embedder, &batch, embed_batch_size, &cancel).await {
          Ok(entries) => {
            stats.embedded.fetch_add(entries.len() as u64, Ordering::Relaxed);
            cache.add_entries(entries).await;
            // Save failures abort phase 1.
            cache.maybe_autosave().await?;
          }
          Err(EmbeddingError::Cancelled) => {
            debug!(worker_id, "embed worker cancelled");
            break;
          }
          Err(e) => {
            warn!(worker_id, batch_len = batch.len(), error = %e, "dropping batch after embedding failure");
            stats.errors.fetch_add(1, Ordering::Relaxed);
          }
        }
      }
      Ok::<(), IndexError>(())
    }));
  }
  // Workers own the only receiver handles now; if they all exit early the
  // channel closes and upstream sends fail instead of blocking.
  drop(batch_rx);

  let progress_done = CancellationToken::new();
  let progress = (!options.quiet).then(|| spawn_progress("phase1", stats.clone(), None, progress_done.clone()));

  // Drain all stages.
  let fetch_result = fetcher.await.map_err(|e| IndexError::Join(e.to_string()))?;
  batcher.await.map_err(|e| IndexError::Join(e.to_string()))?;
  let mut worker_error = None;
  for handle in worker_handles {
    match handle.await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => worker_error = Some(e),
      Err(e) => worker_error = Some(IndexError::Join(e.to_string())),
    }
  }
  progress_done.cancel();
  if let Some(progress) = progress {
    let _ = progress.await;
  }

  // Step 5: final save, never skipped once phase 1 has started.
  cache.save().await?;

  if let Some(e) = worker_error {
    return Err(e);
  }
  if let Err(e) = fetch_result {
    return Err(e.into());
  }

  let snapshot = stats.snapshot();
  let report = Phase1Report {
    processed: snapshot.embedded,
    skipped: snapshot.skipped,
    errors: snapshot.errors,
    cached_entries: cache.len().await,
  };
  info!(
    processed = report.processed,
    skipped = report.skipped,
    errors = report.errors,
    cached = report.cached_entries,
    "phase 1 complete"
  );
  Ok(report)
}

// ============================================================================
// In-process harness over the batcher + embed workers
// ============================================================================

/// Embed pre-fetched documents into a cache, reusing the phase-1 batcher
/// and worker semantics. The fetch stage is replaced by the caller's list.
#[cfg(test)]
async fn embed_documents_into_cache(
  documents: Vec<Document>,
  embedder: Arc<dyn Embedder>,
  cache: Arc<DocumentCache>,
  batch_size: usize,
  embed_batch_size: usize,
  stats: Arc<PipelineStats>,
) {
  let cancel = CancellationToken::new();
  for batch in documents.chunks(batch_size) {
    let fresh: Vec<Document> = batch.iter().filter(|d| !cache.is_processed(&d.id)).cloned().collect();
    let skipped = batch.len() - fresh.len();
    stats.skipped.fetch_add(skipped as u64, Ordering::Relaxed);
    if fresh.is_empty() {
      continue;
    }
    match embed_batch(&embedder, &fresh, embed_batch_size, &cancel).await {
      Ok(entries) => {
        stats.embedded.fetch_add(entries.len() as u64, Ordering::Relaxed);
        cache.add_entries(entries).await;
      }
      Err(_) => {
        stats.errors.fetch_add(1, Ordering::Relaxed);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::super::tests::FlakyEmbedder;
  use super::*;

  fn doc(id: &str) -> Document {
    Document {
      id: id.into(),
      title: format!("title {id}"),
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn failed_sub_batch_drops_whole_batch_and_restart_picks_it_up() {
    let dir = tempfile::tempdir().unwrap();
    let stats = Arc::new(PipelineStats::default());
    let cache = Arc::new(DocumentCache::load(dir.path()).await.unwrap());

    // Batch {A,B,C} with EmbedBatchSize=2: sub-batches {A,B} and {C}; C fails.
    let embedder: Arc<dyn Embedder> = Arc::new(FlakyEmbedder::failing_on("title c"));
    embed_documents_into_cache(
      vec![doc("a"), doc("b"), doc("c")],
      embedder,
      cache.clone(),
      3,
      2,
      stats.clone(),
    )
    .await;

    // The whole outer batch was dropped: nothing cached, one error.
    assert_eq!(cache.len().await, 0);
    assert_eq!(stats.snapshot().errors, 1);
    cache.save().await.unwrap();

    // Second run with only {A,B} in a clean batch embeds them.
    let stats2 = Arc::new(PipelineStats::default());
    let embedder2: Arc<dyn Embedder> = Arc::new(FlakyEmbedder::failing_on("title c"));
    embed_documents_into_cache(vec![doc("a"), doc("b")], embedder2, cache.clone(), 2, 2, stats2.clone()).await;
    assert_eq!(cache.len().await, 2);
    assert!(cache.is_processed("a") && cache.is_processed("b"));
    cache.save().await.unwrap();

    // Restart: cached ids are skipped, only C is attempted.
    let reloaded = Arc::new(DocumentCache::load(dir.path()).await.unwrap());
    assert_eq!(reloaded.len().await, 2);
    let stats3 = Arc::new(PipelineStats::default());
    let counting: Arc<FlakyEmbedder> = Arc::new(FlakyEmbedder::ok());
    let embedder3: Arc<dyn Embedder> = counting.clone();
    embed_documents_into_cache(
      vec![doc("a"), doc("b"), doc("c")],
      embedder3,
      reloaded.clone(),
      3,
      2,
      stats3.clone(),
    )
    .await;

    let snapshot = stats3.snapshot();
    assert_eq!(snapshot.skipped, 2);
    assert_eq!(snapshot.embedded, 1);
    assert_eq!(reloaded.len().await, 3);
    // Only the one fresh document went to the service.
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn all_batches_cached_when_embedding_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let stats = Arc::new(PipelineStats::default());
    let cache = Arc::new(DocumentCache::load(dir.path()).await.unwrap());
    let embedder: Arc<dyn Embedder> = Arc::new(FlakyEmbedder::ok());

    let documents: Vec<Document> = (0..10).map(|i| doc(&format!("d{i}"))).collect();
    embed_documents_into_cache(documents, embedder, cache.clone(), 4, 2, stats.clone()).await;

    assert_eq!(cache.len().await, 10);
    assert_eq!(stats.snapshot().embedded, 10);
    assert_eq!(stats.snapshot().errors, 0);
  }
}
