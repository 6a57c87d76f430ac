//! Deterministic text chunking and content hashing.
//!
//! Both operations are pure functions: identical input always yields identical
//! chunk boundaries and identical digests, which is what makes reprocessing
//! idempotent further down the pipeline.

pub mod hashing;
pub mod splitter;

pub use hashing::content_hash;
pub use splitter::{ChunkSlice, ChunkingConfig, ChunkingError, chunk};
