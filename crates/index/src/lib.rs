//! Batch indexing: the on-disk document cache, the engine-document mapper,
//! the index schema, and the two-phase / streaming pipelines.

pub mod cache;
pub mod mapper;
pub mod pipeline;
pub mod schema;

mod error;

pub use cache::{CacheStats, DocumentCache};
pub use error::IndexError;
pub use pipeline::{
  Phase1Options, Phase1Report, Phase2Report, RunOptions, RunReport, run_phase1, run_phase2, run_streaming,
};
