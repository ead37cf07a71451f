use thiserror::Error;

use crate::types::{VersionId, VersionStatus};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    /// Header validation failed; no row was parsed.
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("No products found in catalog file")]
    NoProducts,

    #[error("Row {row}: {reason}")]
    RowParsing { row: usize, reason: String },

    #[error("Invalid product: {0}")]
    InvalidProduct(String),

    #[error("Score {0} is outside [0.0, 1.0]")]
    ScoreOutOfRange(f32),

    #[error("Embedding provider unavailable (retryable): {0}")]
    EmbeddingRetryable(String),

    #[error("Embedding provider failed: {0}")]
    EmbeddingFatal(String),

    #[error("Index consistency check failed for '{collection}': expected {expected} documents, found {actual}")]
    IndexConsistency { collection: String, expected: usize, actual: usize },

    #[error("Failed to persist version metadata: {0}")]
    PersistenceUpdate(String),

    #[error("Version {id}: cannot move from {from} to {to}")]
    InvalidTransition { id: VersionId, from: VersionStatus, to: VersionStatus },

    #[error("Version {0} is active and cannot be deleted")]
    ActiveVersionDeletion(VersionId),

    #[error("A reindex job is already running")]
    ReindexInProgress,

    #[error("Vector store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),
}

impl Error {
    pub fn store(e: impl std::fmt::Display) -> Self { Self::Store(e.to_string()) }

    pub fn operation(e: impl std::fmt::Display) -> Self { Self::Operation(e.to_string()) }

    /// Transient failures that a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingRetryable(_) | Self::Store(_) | Self::Io(_))
    }

    /// Errors that make continuing a reindex pointless (misconfiguration).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EmbeddingFatal(_) | Self::InvalidConfig(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
