//! Error taxonomy shared by the pipeline stages.

use thiserror::Error;

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by ingestion and retrieval.
#[derive(Error, Debug)]
pub enum Error {
    /// A required credential, identifier, or parameter is missing or invalid.
    /// Raised before any work starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// One document could not be read. The pipeline skips it.
    #[error("failed to read source {path}: {message}")]
    SourceRead { path: String, message: String },

    /// The embedding provider failed for a batch.
    #[error(transparent)]
    Embedding(#[from] EmbeddingFailure),

    /// A read or write against the vector store failed.
    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    pub fn store(err: anyhow::Error) -> Self {
        Error::Store(format!("{:#}", err))
    }
}

/// An embedding request failed; `offset` is the index of the first input
/// of the failed batch.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("embedding batch starting at offset {offset} failed: {message}")]
pub struct EmbeddingFailure {
    pub offset: usize,
    pub message: String,
}
