//! Error types for the scheduler crate.

use thiserror::Error;

/// Errors surfaced to `schedule` callers.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The scheduler has shut down and accepts no further jobs.
    #[error("scheduler is shut down")]
    ShutDown,
}

/// Result type alias for scheduling operations.
pub type Result<T> = std::result::Result<T, ScheduleError>;
