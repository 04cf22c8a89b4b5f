//! Error types for the store crate.

use thiserror::Error;

/// Errors surfaced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Embedding dimension differs from the store's configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the store was built with.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// No memory row with the given id.
    #[error("memory not found: {0}")]
    MemoryNotFound(i64),

    /// No story row with the given id.
    #[error("story not found: {0}")]
    StoryNotFound(i64),

    /// No message row with the given id.
    #[error("message not found: {0}")]
    MessageNotFound(i64),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
