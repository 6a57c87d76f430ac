#![deny(missing_docs)]

//! Core library for the chunkmill ingestion engine.
//!
//! Documents flow through a deterministic chunker into a relational chunk
//! store, a transactionally-consistent keyword index, and an eventually
//! consistent vector index, coordinated by a per-document pipeline.

/// Deterministic text splitting and content hashing.
pub mod chunking;
/// Environment-driven configuration.
pub mod config;
/// Embedding client abstraction, retry policy, and offline client.
pub mod embedding;
/// Per-chunk metadata enrichment seam.
pub mod enrich;
/// Document extraction seam and the plain-text extractor.
pub mod extract;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics counters.
pub mod metrics;
/// Pipeline orchestration, sessions, and batch runs.
pub mod pipeline;
/// Chunk storage and the keyword search index.
pub mod store;
/// Vector storage and cosine ranking.
pub mod vector;
