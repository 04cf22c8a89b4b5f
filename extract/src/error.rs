//! Error types for the extraction pipeline.

use thiserror::Error;

/// Errors that abort an extraction run.
///
/// None of these leave side effects behind: every variant occurs either
/// before the commit or rolls it back, so the pending batch stays loadable
/// and the run is safe to retry.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The completion failed or its output did not conform to the schema.
    #[error("completion failed: {0}")]
    Completion(#[source] anyhow::Error),

    /// Embedding one or more texts failed.
    #[error("embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),

    /// A store operation failed.
    #[error("store operation failed: {0}")]
    Store(#[source] anyhow::Error),

    /// A story names a handler missing from the registry.
    ///
    /// Fatal for the whole batch: messages are left pending rather than
    /// silently marked extracted.
    #[error("unknown handler: {name}")]
    UnknownHandler {
        /// The unregistered handler name.
        name: String,
    },
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
