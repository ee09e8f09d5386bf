//! On-disk checkpoint of fetched documents and their embeddings.
//!
//! Two bincode blobs under the cache directory: `embeddings.bin` (entries)
//! and `metadata.bin`. Saves are write-then-rename, so a half-written file
//! is never decodable in place; an undecodable blob on load is treated as
//! absent. Appends are serialized by a state mutex; the processed-id set is
//! readable without it and is populated before new entries become visible.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use scholar_core::CacheEntry;

use crate::IndexError;

const CACHE_VERSION: u32 = 1;
const ENTRIES_FILE: &str = "embeddings.bin";
const METADATA_FILE: &str = "metadata.bin";

/// Minimum wall-clock gap between autosaves during phase 1.
pub const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
  version: u32,
  created_at: DateTime<Utc>,
  last_modified: DateTime<Utc>,
  total_documents: u64,
  reindex_all: bool,
}

impl Default for CacheMetadata {
  fn default() -> Self {
    let now = Utc::now();
    Self {
      version: CACHE_VERSION,
      created_at: now,
      last_modified: now,
      total_documents: 0,
      reindex_all: false,
    }
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntriesBlob {
  version: u32,
  entries: Vec<CacheEntry>,
}

#[derive(Debug)]
struct CacheState {
  entries: Vec<CacheEntry>,
  metadata: CacheMetadata,
  last_save: Instant,
}

/// Snapshot of cache contents for `status` output.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
  pub entries: usize,
  pub created_at: DateTime<Utc>,
  pub last_modified: DateTime<Utc>,
  pub total_documents: u64,
  pub reindex_all: bool,
}

/// Thread-safe checkpoint store for phase-1 output.
#[derive(Debug)]
pub struct DocumentCache {
  dir: PathBuf,
  state: Mutex<CacheState>,
  processed: RwLock<HashSet<String>>,
}

impl DocumentCache {
  /// Load the cache from `dir`, starting fresh (with a warning) when the
  /// blobs are missing or undecodable. The directory is created if needed.
  pub async fn load(dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
    let dir = dir.into();
    tokio::fs::create_dir_all(&dir).await?;

    let entries = match Self::read_entries(&dir.join(ENTRIES_FILE)).await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(error = %e, "unreadable cache entries, starting fresh");
        Vec::new()
      }
    };
    let metadata = match Self::read_metadata(&dir.join(METADATA_FILE)).await {
      Ok(metadata) => metadata,
      Err(e) => {
        warn!(error = %e, "unreadable cache metadata, starting fresh");
        CacheMetadata::default()
      }
    };

    let processed: HashSet<String> = entries.iter().map(|e| e.document.id.clone()).collect();
    debug!(entries = entries.len(), dir = %dir.display(), "document cache loaded");

    Ok(Self {
      dir,
      state: Mutex::new(CacheState {
        entries,
        metadata,
        last_save: Instant::now(),
      }),
      processed: RwLock::new(processed),
    })
  }

  /// Whether a cache exists on disk at `dir`.
  pub fn exists(dir: &Path) -> bool {
    dir.join(ENTRIES_FILE).is_file()
  }

  async fn read_entries(path: &Path) -> Result<Vec<CacheEntry>, IndexError> {
    if !path.is_file() {
      return Ok(Vec::new());
    }
    let bytes = tokio::fs::read(path).await?;
    let (blob, _): (EntriesBlob, usize) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
      .map_err(|e| IndexError::CacheEncode(e.to_string()))?;
    if blob.version != CACHE_VERSION {
      return Err(IndexError::CacheEncode(format!(
        "unsupported cache version {}",
        blob.version
      )));
    }
    Ok(blob.entries)
  }

  async fn read_metadata(path: &Path) -> Result<CacheMetadata, IndexError> {
    if !path.is_file() {
      return Ok(CacheMetadata::default());
    }
    let bytes = tokio::fs::read(path).await?;
    let (metadata, _): (CacheMetadata, usize) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
      .map_err(|e| IndexError::CacheEncode(e.to_string()))?;
    Ok(metadata)
  }

  /// Persist both blobs atomically (write to a temp file, then rename).
  ///
  /// Once started, a save always runs to completion; there is no
  /// cancellation point inside.
  pub async fn save(&self) -> Result<(), IndexError> {
    let mut state = self.state.lock().await;
    state.metadata.last_modified = Utc::now();

    let entries_bytes = bincode::serde::encode_to_vec(
      &EntriesBlob {
        version: CACHE_VERSION,
        entries: state.entries.clone(),
      },
      bincode::config::standard(),
    )
    .map_err(|e| IndexError::CacheEncode(e.to_string()))?;
    let metadata_bytes = bincode::serde::encode_to_vec(&state.metadata, bincode::config::standard())
      .map_err(|e| IndexError::CacheEncode(e.to_string()))?;

    write_atomic(&self.dir.join(ENTRIES_FILE), &entries_bytes).await?;
    write_atomic(&self.dir.join(METADATA_FILE), &metadata_bytes).await?;

    state.last_save = Instant::now();
    debug!(entries = state.entries.len(), "document cache saved");
    Ok(())
  }

  /// Save when at least [`AUTOSAVE_INTERVAL`] has elapsed since the last
  /// save. Returns whether a save happened.
  pub async fn maybe_autosave(&self) -> Result<bool, IndexError> {
    let due = {
      let state = self.state.lock().await;
      state.last_save.elapsed() >= AUTOSAVE_INTERVAL
    };
    if due {
      self.save().await?;
      info!("autosaved document cache");
    }
    Ok(due)
  }

  pub async fn add_entry(&self, entry: CacheEntry) {
    self.add_entries(vec![entry]).await;
  }

  /// Append entries. The processed set covers every new id before the
  /// entries themselves are observable through `entries()`.
  pub async fn add_entries(&self, new_entries: Vec<CacheEntry>) {
    if new_entries.is_empty() {
      return;
    }
    let mut state = self.state.lock().await;
    {
      let mut processed = self.processed.write().unwrap_or_else(|e| e.into_inner());
      for entry in &new_entries {
        processed.insert(entry.document.id.clone());
      }
    }
    state.entries.extend(new_entries);
    state.metadata.last_modified = Utc::now();
  }

  /// O(1) membership check against the in-memory processed set.
  pub fn is_processed(&self, id: &str) -> bool {
    self
      .processed
      .read()
      .unwrap_or_else(|e| e.into_inner())
      .contains(id)
  }

  /// Defensive copy of all entries.
  pub async fn entries(&self) -> Vec<CacheEntry> {
    self.state.lock().await.entries.clone()
  }

  pub async fn len(&self) -> usize {
    self.state.lock().await.entries.len()
  }

  pub async fn is_empty(&self) -> bool {
    self.len().await == 0
  }

  /// Drop all entries and remove the blobs from disk.
  pub async fn clear(&self) -> Result<(), IndexError> {
    let mut state = self.state.lock().await;
    state.entries.clear();
    state.metadata = CacheMetadata::default();
    self.processed.write().unwrap_or_else(|e| e.into_inner()).clear();

    for file in [ENTRIES_FILE, METADATA_FILE] {
      let path = self.dir.join(file);
      match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
      }
    }
    info!("document cache cleared");
    Ok(())
  }

  pub async fn stats(&self) -> CacheStats {
    let state = self.state.lock().await;
    CacheStats {
      entries: state.entries.len(),
      created_at: state.metadata.created_at,
      last_modified: state.metadata.last_modified,
      total_documents: state.metadata.total_documents,
      reindex_all: state.metadata.reindex_all,
    }
  }

  pub async fn set_total_documents(&self, total: u64) {
    self.state.lock().await.metadata.total_documents = total;
  }

  pub async fn set_reindex_all(&self, reindex_all: bool) {
    self.state.lock().await.metadata.reindex_all = reindex_all;
  }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
  let tmp = path.with_extension("bin.tmp");
  tokio::fs::write(&tmp, bytes).await?;
  tokio::fs::rename(&tmp, path).await?;
  Ok(())
}
