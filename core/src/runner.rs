//! Seam between the scheduler and the extraction pipeline.

use core::future::Future;
use std::sync::Arc;

use crate::types::ExtractionStats;

/// Runs one extraction for a user.
///
/// Implemented by the extraction pipeline and invoked by scheduler workers;
/// the indirection keeps the scheduler free of pipeline types so either side
/// can be tested against a mock.
pub trait ExtractionRunner: Send + Sync {
    /// Consumes the user's pending messages and commits the derived memory
    /// decisions.
    ///
    /// # Errors
    /// Surfaces pipeline failures; a failed run leaves the pending batch
    /// untouched and is safe to retry.
    fn extract(
        &self,
        user_id: &str,
    ) -> impl Future<Output = crate::Result<ExtractionStats>> + Send;
}

impl<R: ExtractionRunner> ExtractionRunner for Arc<R> {
    fn extract(
        &self,
        user_id: &str,
    ) -> impl Future<Output = crate::Result<ExtractionStats>> + Send {
        R::extract(self, user_id)
    }
}
