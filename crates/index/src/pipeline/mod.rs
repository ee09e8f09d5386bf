//! Staged concurrent pipelines for moving documents into the search engine.
//!
//! ```text
//! phase 1:  cursor → batcher → [N embed workers] → document cache
//! phase 2:  cache  → [N index workers] → engine → single back-sync worker
//! run:      cursor → batcher → [N embed] → [N index] → single back-sync
//! ```
//!
//! Stages are connected by bounded mpsc channels; back-pressure is the
//! channel. A shared `CancellationToken` is checked on every blocking
//! receive and send. Counters are plain atomics shared across stages.

mod phase1;
mod phase2;
mod run;

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use embedding::{Embedder, EmbeddingError};
use scholar_core::{CacheEntry, Document};

pub use phase1::{Phase1Options, Phase1Report, run_phase1};
pub use phase2::{Phase2Report, run_phase2};
pub use run::{RunOptions, RunReport, run_streaming};

/// Interval between progress log lines.
const PROGRESS_TICK: Duration = Duration::from_secs(2);

// ============================================================================
// Counters
// ============================================================================

/// Shared pipeline counters. Documents, not batches.
#[derive(Debug, Default)]
pub struct PipelineStats {
  pub fetched: AtomicU64,
  pub skipped: AtomicU64,
  pub embedded: AtomicU64,
  pub indexed: AtomicU64,
  pub synced: AtomicU64,
  pub errors: AtomicU64,
}

impl PipelineStats {
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      fetched: self.fetched.load(Ordering::Relaxed),
      skipped: self.skipped.load(Ordering::Relaxed),
      embedded: self.embedded.load(Ordering::Relaxed),
      indexed: self.indexed.load(Ordering::Relaxed),
      synced: self.synced.load(Ordering::Relaxed),
      errors: self.errors.load(Ordering::Relaxed),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSnapshot {
  pub fetched: u64,
  pub skipped: u64,
  pub embedded: u64,
  pub indexed: u64,
  pub synced: u64,
  pub errors: u64,
}

/// Per-stage in-flight document counts, exposed by the streaming run.
#[derive(Debug, Default)]
pub struct StageGauges {
  pub embedding: AtomicI64,
  pub indexing: AtomicI64,
  pub syncing: AtomicI64,
}

// ============================================================================
// Shared stage logic
// ============================================================================

/// Embed one outer batch, sub-batch by sub-batch.
///
/// All-or-nothing: a failed sub-batch fails the whole call and any partial
/// vectors are discarded by the caller. Order within the batch is kept.
pub(crate) async fn embed_batch(
  embedder: &Arc<dyn Embedder>,
  batch: &[Document],
  embed_batch_size: usize,
  cancel: &CancellationToken,
) -> Result<Vec<CacheEntry>, EmbeddingError> {
  let mut entries = Vec::with_capacity(batch.len());
  for chunk in batch.chunks(embed_batch_size.max(1)) {
    let texts: Vec<String> = chunk.iter().map(Document::embedding_text).collect();
    let vectors = embedder.embed_cancellable(&texts, cancel).await?;
    for (document, vector) in chunk.iter().zip(vectors) {
      entries.push(CacheEntry::new(document.clone(), vector));
    }
  }
  Ok(entries)
}

/// Send into a bounded stage channel, giving up on cancellation or when the
/// receiving stage is gone. Returns true when the pipeline should stop.
pub(crate) async fn send_or_cancelled<T>(
  tx: &tokio::sync::mpsc::Sender<T>,
  item: T,
  cancel: &CancellationToken,
) -> bool {
  tokio::select! {
    biased;
    _ = cancel.cancelled() => true,
    result = tx.send(item) => result.is_err(),
  }
}

/// Periodic progress logger; stops when `done` is cancelled.
pub(crate) fn spawn_progress(
  label: &'static str,
  stats: Arc<PipelineStats>,
  gauges: Option<Arc<StageGauges>>,
  done: CancellationToken,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut interval = tokio::time::interval(PROGRESS_TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
      tokio::select! {
        biased;
        _ = done.cancelled() => break,
        _ = interval.tick() => {
          let s = stats.snapshot();
          match &gauges {
            Some(g) => info!(
              target: "pipeline",
              fetched = s.fetched,
              skipped = s.skipped,
              embedded = s.embedded,
              indexed = s.indexed,
              synced = s.synced,
              errors = s.errors,
              in_embed = g.embedding.load(Ordering::Relaxed),
              in_index = g.indexing.load(Ordering::Relaxed),
              in_sync = g.syncing.load(Ordering::Relaxed),
              "{label} progress"
            ),
            None => info!(
              target: "pipeline",
              fetched = s.fetched,
              skipped = s.skipped,
              embedded = s.embedded,
              indexed = s.indexed,
              synced = s.synced,
              errors = s.errors,
              "{label} progress"
            ),
          }
        }
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::sync::atomic::AtomicUsize;

  /// Embedder that fails any sub-batch containing a text with the marker.
  pub(crate) struct FlakyEmbedder {
    pub calls: AtomicUsize,
    pub fail_marker: Option<String>,
  }

  impl FlakyEmbedder {
    pub(crate) fn ok() -> Self {
      Self {
        calls: AtomicUsize::new(0),
        fail_marker: None,
      }
    }

    pub(crate) fn failing_on(marker: &str) -> Self {
      Self {
        calls: AtomicUsize::new(0),
        fail_marker: Some(marker.to_string()),
      }
    }
  }

  #[async_trait]
  impl Embedder for FlakyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(marker) = &self.fail_marker
        && texts.iter().any(|t| t.contains(marker.as_str()))
      {
        return Err(EmbeddingError::Unavailable("synthetic failure".into()));
      }
      Ok(texts.iter().map(|_| vec![0.25; 4]).collect())
    }

    async fn is_available(&self) -> bool {
      true
    }
  }

  fn doc(id: &str) -> Document {
    Document {
      id: id.into(),
      title: format!("title {id}"),
      ..Default::default()
    }
  }

  #[tokio::test]
  async fn embed_batch_splits_into_sub_batches() {
    let embedder: Arc<dyn Embedder> = Arc::new(FlakyEmbedder::ok());
    let batch = vec![doc("a"), doc("b"), doc("c")];
    let entries = embed_batch(&embedder, &batch, 2, &CancellationToken::new()).await.unwrap();
    assert_eq!(entries.len(), 3);
    let ids: Vec<&str> = entries.iter().map(|e| e.document.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
  }

  #[tokio::test]
  async fn embed_batch_fails_whole_batch_on_any_sub_batch() {
    let embedder: Arc<dyn Embedder> = Arc::new(FlakyEmbedder::failing_on("title c"));
    let batch = vec![doc("a"), doc("b"), doc("c")];
    let result = embed_batch(&embedder, &batch, 2, &CancellationToken::new()).await;
    assert!(result.is_err());
  }

  #[test]
  fn snapshot_reads_all_counters() {
    let stats = PipelineStats::default();
    stats.fetched.store(5, Ordering::Relaxed);
    stats.errors.store(2, Ordering::Relaxed);
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.fetched, 5);
    assert_eq!(snapshot.errors, 2);
    assert_eq!(snapshot.embedded, 0);
  }
}
