//! Engine configuration.
//!
//! One configuration object covers everything the engine reads from its
//! environment: connection strings for the external collaborators, the
//! embedding dimension shared between the model and the store, and the
//! scheduler's operational profile. The profile carries the timings that
//! differ between production and tests; both presets are plain data the
//! caller can override field by field.

use core::time::Duration;

/// Token-bucket cap on global extraction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Extractions permitted per window.
    pub max: u32,
    /// Refill window.
    pub window: Duration,
}

/// Operational timings for the extraction scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerProfile {
    /// Quiet period after the last `schedule` call before a job fires.
    pub debounce: Duration,
    /// Ceiling on how long continued scheduling may postpone a job.
    pub max_wait: Duration,
    /// Worker pool size.
    pub workers: usize,
    /// Total execution attempts per job, including the first.
    pub attempts: u32,
    /// Base delay of the exponential retry backoff.
    pub backoff_base: Duration,
    /// Global rate limit on extraction starts.
    pub rate: RateLimit,
}

impl SchedulerProfile {
    /// Production timings: 30 s debounce, 5 min maximum wait.
    #[must_use]
    pub const fn production() -> Self {
        Self {
            debounce: Duration::from_secs(30),
            max_wait: Duration::from_secs(300),
            workers: 5,
            attempts: 3,
            backoff_base: Duration::from_secs(2),
            rate: RateLimit {
                max: 10,
                window: Duration::from_secs(1),
            },
        }
    }

    /// Test timings: 100 ms debounce, 500 ms maximum wait, tight backoff.
    #[must_use]
    pub const fn testing() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            max_wait: Duration::from_millis(500),
            workers: 2,
            attempts: 3,
            backoff_base: Duration::from_millis(20),
            rate: RateLimit {
                max: 100,
                window: Duration::from_secs(1),
            },
        }
    }
}

impl Default for SchedulerProfile {
    fn default() -> Self {
        Self::production()
    }
}

/// The single configuration object the engine reads.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relational store connection string.
    pub database_url: String,
    /// Queue backend connection string.
    pub queue_url: String,
    /// Credential for the language-model provider.
    pub llm_api_key: String,
    /// Embedding dimension, shared between the model and the store DDL.
    pub embedding_dim: usize,
    /// Scheduler timings.
    pub scheduler: SchedulerProfile,
}

impl EngineConfig {
    /// Default embedding dimension (`text-embedding-3-small` class models).
    pub const DEFAULT_EMBEDDING_DIM: usize = 1536;

    /// Creates a configuration from the three connection credentials, with
    /// the default embedding dimension and production scheduler timings.
    #[must_use]
    pub fn new(
        database_url: impl Into<String>,
        queue_url: impl Into<String>,
        llm_api_key: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            queue_url: queue_url.into(),
            llm_api_key: llm_api_key.into(),
            embedding_dim: Self::DEFAULT_EMBEDDING_DIM,
            scheduler: SchedulerProfile::production(),
        }
    }

    /// Overrides the embedding dimension.
    #[must_use]
    pub const fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    /// Overrides the scheduler profile.
    #[must_use]
    pub const fn with_scheduler(mut self, profile: SchedulerProfile) -> Self {
        self.scheduler = profile;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_profile_values() {
        let profile = SchedulerProfile::production();
        assert_eq!(profile.debounce, Duration::from_secs(30));
        assert_eq!(profile.max_wait, Duration::from_secs(300));
        assert_eq!(profile.workers, 5);
        assert_eq!(profile.attempts, 3);
    }

    #[test]
    fn testing_profile_is_subsecond() {
        let profile = SchedulerProfile::testing();
        assert!(profile.debounce < Duration::from_secs(1));
        assert!(profile.max_wait < Duration::from_secs(1));
        assert!(profile.debounce < profile.max_wait);
    }

    #[test]
    fn config_builder() {
        let config = EngineConfig::new("postgres://localhost/mnemo", "redis://localhost", "sk-x")
            .with_embedding_dim(768)
            .with_scheduler(SchedulerProfile::testing());

        assert_eq!(config.embedding_dim, 768);
        assert_eq!(config.scheduler, SchedulerProfile::testing());
    }
}
