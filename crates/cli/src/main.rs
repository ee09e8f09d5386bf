//! scholar-indexer - batch pipeline driver for the paper search engine.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scholar_core::Config;

mod commands;

#[derive(Parser)]
#[command(name = "scholar-indexer")]
#[command(about = "Index research documents into the search engine")]
#[command(after_help = "\
TYPICAL FLOW:
  scholar-indexer phase1          # Fetch documents and cache embeddings
  scholar-indexer phase2          # Bulk-index cache and back-sync ids
  scholar-indexer status          # Inspect cache/store/engine state

FULL REBUILD:
  scholar-indexer reindex-full    # Drop index, clear state, run both phases")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Fetch documents and generate embeddings into the on-disk cache
  Phase1 {
    /// Only process the first N documents
    #[arg(long, value_name = "N")]
    limit: Option<i64>,
    /// Clear the cache and re-embed everything
    #[arg(long)]
    reindex_all: bool,
    /// Embed worker count (minimum 2)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
    /// Suppress the progress tick
    #[arg(long)]
    quiet: bool,
  },
  /// Bulk-index cached entries and back-sync engine ids
  Phase2 {
    /// Suppress the progress tick
    #[arg(long)]
    quiet: bool,
  },
  /// Streaming pipeline: fetch, embed, index, and back-sync with no cache
  Run {
    /// Only process the first N documents
    #[arg(long, value_name = "N")]
    limit: Option<i64>,
    /// Re-process documents that already carry a cross-reference id
    #[arg(long)]
    reindex_all: bool,
    /// Worker count per stage (minimum 2)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,
  },
  /// Show cache, store, and engine state
  Status,
  /// Remove the on-disk document cache
  Clean,
  /// Create the search index if it does not exist
  CreateIndex,
  /// Drop everything and rebuild: index, cross-references, cache, both phases
  ReindexFull,
}

#[tokio::main]
async fn main() -> Result<()> {
  dotenvy::dotenv().ok();
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let cli = Cli::parse();
  let config = Config::from_env();

  // Ctrl-C unwinds the pipeline through the shared token; a second Ctrl-C
  // kills the process the default way.
  let cancel = CancellationToken::new();
  {
    let cancel = cancel.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, draining pipeline");
        cancel.cancel();
      }
    });
  }

  match cli.command {
    Commands::Phase1 {
      limit,
      reindex_all,
      workers,
      quiet,
    } => commands::phase1(&config, limit, reindex_all, workers, quiet, cancel).await?,
    Commands::Phase2 { quiet } => commands::phase2(&config, quiet, cancel).await?,
    Commands::Run {
      limit,
      reindex_all,
      workers,
    } => commands::run(&config, limit, reindex_all, workers, cancel).await?,
    Commands::Status => commands::status(&config).await?,
    Commands::Clean => commands::clean(&config).await?,
    Commands::CreateIndex => commands::create_index(&config).await?,
    Commands::ReindexFull => commands::reindex_full(&config, cancel).await?,
  }

  info!("done");
  Ok(())
}
