//! evidex-ingestion — PubMed evidence ingestion pipeline.
//!
//! Batch system that turns medical topic queries (or local PubMed XML dumps)
//! into a corpus of context-prefixed, embedded evidence chunks in a
//! pgvector-enabled Postgres store:
//! - E-utilities search + fetch (rate limited)
//! - PubMed XML parsing, incl. a streaming splitter for bulk dumps
//! - CEBM evidence classification
//! - Medical-context-aware chunking
//! - Batched embedding with adaptive parallelism
//! - Upsert storage keyed by (pmid, chunk_index)
//! - Checkpointed, cancellable worker pool for 1M+ article runs

pub mod checkpoint;
pub mod chunker;
pub mod classify;
pub mod embedding;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod pool;
pub mod pubmed;
pub mod storage;
pub mod stream;
