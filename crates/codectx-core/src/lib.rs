//! # codectx core
//!
//! Runtime-agnostic logic for codectx: data models, the recursive chunker,
//! the batched embedding client, the [`store::Store`] abstraction, the
//! ingestion pipeline, and retrieval plus context rendering.
//!
//! This crate contains no tokio, sqlx, network, or filesystem I/O. The
//! application crate supplies concrete stores, embedding providers, source
//! adapters, and the rate-limit throttle.
//!
//! ## Data Flow
//!
//! ```text
//! SourceAdapter ──▶ chunk ──▶ EmbeddingClient ──▶ Store (upsert)
//!                                   ▲
//! query ────────────────────────────┘──▶ Store (similarity) ──▶ render
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod models;
pub mod render;
pub mod search;
pub mod source;
pub mod store;

pub use error::{EmbeddingFailure, Error, Result};
