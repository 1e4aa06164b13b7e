//! Crate-wide error type
//!
//! Every subsystem keeps its own focused error enum (`EmbedError`,
//! `VectorStoreError`) and converts into `EngineError` at the Repository
//! boundary.

use crate::embeddings::EmbedError;
use crate::storage::{RelationalStoreError, VectorStoreError};

/// Engine-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error kind
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// R (relational store) is unavailable; retry at caller
    #[error("relational store unavailable: {0}")]
    StoreUnavailable(String),

    /// Embedder transient failure
    #[error("embedder unavailable: {0}")]
    EmbedUnavailable(String),

    /// Embedder permanent failure (e.g. empty text)
    #[error("invalid embedding input: {0}")]
    EmbedInvalid(String),

    /// Semantic search degraded/unavailable; caller should fall back to exact
    #[error("semantic search unavailable: {0}")]
    SemanticUnavailable(String),

    /// No memory with that id
    #[error("memory not found: {0}")]
    NotFound(String),

    /// Id collision on insert
    #[error("conflict: memory already exists: {0}")]
    Conflict(String),

    /// Bad caller input
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Row excluded from sweeps/retrieval after repeated failures
    #[error("memory quarantined: {0}")]
    Quarantined(String),

    /// Caller-supplied deadline exceeded before the operation completed
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Underlying SQLite error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Underlying IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EmbedError> for EngineError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::Unavailable(msg) => EngineError::EmbedUnavailable(msg),
            EmbedError::Invalid(msg) => EngineError::EmbedInvalid(msg),
        }
    }
}

impl From<VectorStoreError> for EngineError {
    fn from(e: VectorStoreError) -> Self {
        EngineError::StoreUnavailable(e.to_string())
    }
}

impl From<RelationalStoreError> for EngineError {
    fn from(e: RelationalStoreError) -> Self {
        match e {
            RelationalStoreError::NotFound(id) => EngineError::NotFound(id),
            RelationalStoreError::Conflict(id) => EngineError::Conflict(id),
            RelationalStoreError::Database(err) => EngineError::Database(err),
        }
    }
}
