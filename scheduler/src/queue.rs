//! Per-user deduplicated job table.
//!
//! Each user has at most one non-terminal job, keyed `extract:{user_id}`.
//! Scheduling while a job is `Delayed` postpones its firing time
//! (replace-on-enqueue debounce) until the job has existed for the maximum
//! wait, at which point it is promoted to immediate firing. Terminal
//! transitions remove the key and retain a bounded-TTL record.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use mnemo_core::ExtractionStats;

/// Lifecycle position of a non-terminal job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Queued with a firing time in the future.
    Delayed,
    /// Due and handed to the worker pool.
    Waiting,
    /// A worker is running the extraction.
    Active,
}

/// Terminal result of a job.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The extraction committed.
    Completed(ExtractionStats),
    /// Every attempt failed; the last error message is retained.
    Failed(String),
}

/// Record retained after a job reaches a terminal state.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// The job's user.
    pub user_id: String,
    /// How the job ended.
    pub outcome: JobOutcome,
    /// Executions consumed, including the final one.
    pub attempts: u32,
    /// When the terminal transition happened.
    pub finished_at: Instant,
}

#[derive(Debug)]
struct Job {
    state: JobState,
    fire_at: Instant,
    first_queued_at: Instant,
    attempt: u32,
}

/// Effect of a `schedule` call on the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScheduleOutcome {
    /// A fresh job was queued.
    Queued,
    /// An existing delayed job had its firing time pushed out.
    Postponed,
    /// The job exceeded the maximum wait and fires immediately.
    Promoted,
    /// The job is already due or running; the run observes the fresh rows.
    Ignored,
}

pub(crate) struct JobTable {
    jobs: HashMap<String, Job>,
    history: HashMap<String, JobRecord>,
    history_ttl: Duration,
}

fn key(user_id: &str) -> String {
    format!("extract:{user_id}")
}

impl JobTable {
    pub(crate) fn new(history_ttl: Duration) -> Self {
        Self {
            jobs: HashMap::new(),
            history: HashMap::new(),
            history_ttl,
        }
    }

    pub(crate) fn schedule(
        &mut self,
        user_id: &str,
        debounce: Duration,
        max_wait: Duration,
        now: Instant,
    ) -> ScheduleOutcome {
        match self.jobs.get_mut(&key(user_id)) {
            None => {
                self.jobs.insert(
                    key(user_id),
                    Job {
                        state: JobState::Delayed,
                        fire_at: now + debounce,
                        first_queued_at: now,
                        attempt: 0,
                    },
                );
                ScheduleOutcome::Queued
            }
            Some(job) if job.state == JobState::Delayed => {
                if now.duration_since(job.first_queued_at) >= max_wait {
                    job.fire_at = now;
                    ScheduleOutcome::Promoted
                } else {
                    job.fire_at = now + debounce;
                    ScheduleOutcome::Postponed
                }
            }
            Some(_) => ScheduleOutcome::Ignored,
        }
    }

    /// Earliest firing time among delayed jobs.
    pub(crate) fn next_fire_at(&self) -> Option<Instant> {
        self.jobs
            .values()
            .filter(|job| job.state == JobState::Delayed)
            .map(|job| job.fire_at)
            .min()
    }

    /// Moves every due delayed job to `Waiting` and returns their users.
    pub(crate) fn take_due(&mut self, now: Instant) -> Vec<String> {
        let mut due = Vec::new();
        for (job_key, job) in &mut self.jobs {
            if job.state == JobState::Delayed && job.fire_at <= now {
                job.state = JobState::Waiting;
                due.push(
                    job_key
                        .strip_prefix("extract:")
                        .unwrap_or(job_key)
                        .to_owned(),
                );
            }
        }
        due
    }

    /// Marks the user's job as running and returns its attempt index.
    pub(crate) fn begin(&mut self, user_id: &str) -> u32 {
        self.jobs.get_mut(&key(user_id)).map_or(0, |job| {
            job.state = JobState::Active;
            job.attempt
        })
    }

    /// Removes the job and records a successful terminal transition.
    pub(crate) fn complete(&mut self, user_id: &str, stats: ExtractionStats, now: Instant) {
        if let Some(job) = self.jobs.remove(&key(user_id)) {
            self.history.insert(
                key(user_id),
                JobRecord {
                    user_id: user_id.to_owned(),
                    outcome: JobOutcome::Completed(stats),
                    attempts: job.attempt + 1,
                    finished_at: now,
                },
            );
        }
    }

    /// Removes the job and records a failed terminal transition.
    pub(crate) fn fail(&mut self, user_id: &str, error: String, now: Instant) {
        if let Some(job) = self.jobs.remove(&key(user_id)) {
            self.history.insert(
                key(user_id),
                JobRecord {
                    user_id: user_id.to_owned(),
                    outcome: JobOutcome::Failed(error),
                    attempts: job.attempt + 1,
                    finished_at: now,
                },
            );
        }
    }

    /// Puts a failed attempt back in the delayed state with a backoff.
    /// The dedup key and `first_queued_at` survive, so the maximum-wait
    /// clock keeps running across retries.
    pub(crate) fn retry(&mut self, user_id: &str, backoff: Duration, now: Instant) {
        if let Some(job) = self.jobs.get_mut(&key(user_id)) {
            job.state = JobState::Delayed;
            job.attempt += 1;
            job.fire_at = now + backoff;
        }
    }

    pub(crate) fn state(&self, user_id: &str) -> Option<JobState> {
        self.jobs.get(&key(user_id)).map(|job| job.state)
    }

    /// Number of non-terminal jobs.
    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Looks up the retained terminal record for a user, pruning expired
    /// history on the way.
    pub(crate) fn record(&mut self, user_id: &str, now: Instant) -> Option<JobRecord> {
        self.prune(now);
        self.history.get(&key(user_id)).cloned()
    }

    fn prune(&mut self, now: Instant) {
        let ttl = self.history_ttl;
        self.history
            .retain(|_, record| now.duration_since(record.finished_at) < ttl);
    }
}

impl std::fmt::Debug for JobTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTable")
            .field("jobs", &self.jobs.len())
            .field("history", &self.history.len())
            .finish()
    }
}
