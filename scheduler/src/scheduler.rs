//! Debounced extraction scheduling and the worker pool.
//!
//! [`ExtractionScheduler::schedule`] is the synchronous entry point handlers
//! call right after persisting a turn; it only mutates the job table and
//! returns. A dispatcher task sleeps until the earliest firing time and
//! hands due jobs to a bounded pool of workers over a channel; each worker
//! takes a rate-limit permit, runs the extraction to completion, and records
//! the terminal transition. Failed runs retry with exponential backoff
//! within the profile's attempt budget.
//!
//! The per-user dedup key guarantees at most one non-terminal job per user,
//! and therefore at most one concurrent extraction per user; jobs for
//! distinct users run in parallel up to the worker count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use mnemo_core::{ExtractionRunner, SchedulerProfile};

use crate::error::ScheduleError;
use crate::queue::{JobRecord, JobState, JobTable, ScheduleOutcome};
use crate::rate::TokenBucket;

/// How long terminal job records stay inspectable.
const HISTORY_TTL: Duration = Duration::from_secs(600);

struct Shared<R> {
    runner: R,
    profile: SchedulerProfile,
    table: Mutex<JobTable>,
    timer: Notify,
    stop: Notify,
    stopping: AtomicBool,
    bucket: TokenBucket,
    ready_tx: async_channel::Sender<String>,
    ready_rx: async_channel::Receiver<String>,
}

/// Per-user debounced scheduler driving an [`ExtractionRunner`].
///
/// Construct with [`start`](Self::start) during process startup and release
/// with [`shutdown`](Self::shutdown) on the graceful-shutdown path.
pub struct ExtractionScheduler<R> {
    shared: Arc<Shared<R>>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

impl<R> std::fmt::Debug for ExtractionScheduler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionScheduler")
            .field("profile", &self.shared.profile)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl<R: ExtractionRunner + 'static> ExtractionScheduler<R> {
    /// Spawns the dispatcher and worker tasks on the current runtime.
    #[must_use]
    pub fn start(runner: R, profile: SchedulerProfile) -> Self {
        let (ready_tx, ready_rx) = async_channel::unbounded();
        let shared = Arc::new(Shared {
            runner,
            profile,
            table: Mutex::new(JobTable::new(HISTORY_TTL)),
            timer: Notify::new(),
            stop: Notify::new(),
            stopping: AtomicBool::new(false),
            bucket: TokenBucket::new(profile.rate),
            ready_tx,
            ready_rx,
        });

        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&shared)));
        let workers = (0..profile.workers.max(1))
            .map(|index| tokio::spawn(worker_loop(Arc::clone(&shared), index)))
            .collect();

        Self {
            shared,
            dispatcher,
            workers,
        }
    }

    /// Queues (or coalesces into) the user's pending extraction job.
    ///
    /// Fast and non-blocking: the extraction itself always runs on a worker.
    /// Repeated calls within the debounce window collapse into one job whose
    /// firing time keeps moving out, until the job has waited the profile's
    /// maximum and is promoted to immediate execution instead.
    ///
    /// # Errors
    /// Fails only after [`shutdown`](Self::shutdown) has begun.
    pub fn schedule(&self, user_id: &str) -> crate::error::Result<()> {
        if self.shared.stopping.load(Ordering::SeqCst) {
            return Err(ScheduleError::ShutDown);
        }

        let outcome = self.shared.table.lock().expect("job table poisoned").schedule(
            user_id,
            self.shared.profile.debounce,
            self.shared.profile.max_wait,
            Instant::now(),
        );
        debug!(user_id, ?outcome, "extraction scheduled");

        if outcome != ScheduleOutcome::Ignored {
            self.shared.timer.notify_one();
        }
        Ok(())
    }

    /// Current state of the user's non-terminal job, if any.
    #[must_use]
    pub fn job_state(&self, user_id: &str) -> Option<JobState> {
        self.shared
            .table
            .lock()
            .expect("job table poisoned")
            .state(user_id)
    }

    /// Number of non-terminal jobs across all users.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.shared.table.lock().expect("job table poisoned").len()
    }

    /// Terminal record of the user's most recent job, while retained.
    #[must_use]
    pub fn last_record(&self, user_id: &str) -> Option<JobRecord> {
        self.shared
            .table
            .lock()
            .expect("job table poisoned")
            .record(user_id, Instant::now())
    }

    /// Stops accepting jobs, drains in-flight extractions, and joins every
    /// task. Delayed jobs that have not fired are dropped.
    pub async fn shutdown(self) {
        self.shared.stopping.store(true, Ordering::SeqCst);
        self.shared.stop.notify_one();
        self.shared.ready_tx.close();

        let _ = self.dispatcher.await;
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("extraction scheduler stopped");
    }
}

async fn dispatch_loop<R: ExtractionRunner>(shared: Arc<Shared<R>>) {
    loop {
        if shared.stopping.load(Ordering::SeqCst) {
            break;
        }

        let due = shared
            .table
            .lock()
            .expect("job table poisoned")
            .take_due(Instant::now());
        for user_id in due {
            if shared.ready_tx.send(user_id).await.is_err() {
                return;
            }
        }

        let next = shared
            .table
            .lock()
            .expect("job table poisoned")
            .next_fire_at();
        match next {
            Some(at) => {
                tokio::select! {
                    () = sleep_until(at) => {}
                    () = shared.timer.notified() => {}
                    () = shared.stop.notified() => {}
                }
            }
            None => {
                tokio::select! {
                    () = shared.timer.notified() => {}
                    () = shared.stop.notified() => {}
                }
            }
        }
    }
}

async fn worker_loop<R: ExtractionRunner>(shared: Arc<Shared<R>>, index: usize) {
    while let Ok(user_id) = shared.ready_rx.recv().await {
        shared.bucket.acquire().await;

        let attempt = shared
            .table
            .lock()
            .expect("job table poisoned")
            .begin(&user_id);
        debug!(worker = index, user_id, attempt, "extraction started");

        match shared.runner.extract(&user_id).await {
            Ok(stats) => {
                info!(
                    worker = index,
                    user_id,
                    facts = stats.facts_extracted,
                    added = stats.memories_added,
                    updated = stats.memories_updated,
                    messages = stats.messages_extracted,
                    "extraction job completed"
                );
                shared
                    .table
                    .lock()
                    .expect("job table poisoned")
                    .complete(&user_id, stats, Instant::now());
            }
            Err(err) => {
                if attempt + 1 < shared.profile.attempts {
                    let backoff = shared
                        .profile
                        .backoff_base
                        .saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        worker = index,
                        user_id,
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "extraction failed; retrying"
                    );
                    shared
                        .table
                        .lock()
                        .expect("job table poisoned")
                        .retry(&user_id, backoff, Instant::now());
                    shared.timer.notify_one();
                } else {
                    error!(
                        worker = index,
                        user_id,
                        attempts = shared.profile.attempts,
                        error = %err,
                        "extraction failed; giving up"
                    );
                    shared
                        .table
                        .lock()
                        .expect("job table poisoned")
                        .fail(&user_id, err.to_string(), Instant::now());
                }
            }
        }
    }
}
