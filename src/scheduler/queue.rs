//! In-process job queue with crash-recovery snapshots.
//!
//! `JobQueue` owns every job record and is the only place records change
//! state. It supports:
//!
//! - Strict priority scheduling with FIFO tie-break (see `PriorityScheduler`)
//! - Bounded retries: a failed attempt goes back to pending until the
//!   job's retry budget is spent
//! - A timeout sweeper that evicts jobs running past their timeout
//! - A periodic snapshotter that writes the whole job set to disk
//!
//! # Locking
//!
//! All job collections live in one `QueueState` behind a single mutex. The
//! lock is held only while records move between collections and is never
//! held across an `.await`; executors run entirely outside it.
//!
//! # Shutdown
//!
//! Shutdown runs in two phases. While draining, no new jobs are admitted or
//! dispatched but running jobs may still report, and the sweeper keeps
//! evicting overdue ones. Once the running set is empty (or the shutdown
//! timeout passes) the queue closes: the phase flips under the state lock,
//! the final snapshot is copied under that same lock, and every later
//! mutation is rejected.
//!
//! # Waiting for results
//!
//! Every terminal transition wakes a shared `Notify`. `get_result` re-checks
//! the job after each wake-up and gives up at its deadline, so it returns
//! within its timeout whether or not the job ever finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::{JobRecord, JobRequest, JobStatus};
use super::priority::PriorityScheduler;
use super::store::{SnapshotState, SnapshotStore};
use crate::config::{ConfigError, QueueConfig};
use crate::error::StoreError;
use crate::metrics::{JobEvent, MetricsCollector};

/// Error text recorded on jobs that were running when the process stopped.
pub const INTERRUPTED_ERROR: &str = "interrupted by restart";

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue has been shut down and no longer accepts changes.
    #[error("Queue is shut down")]
    ShutDown,

    /// The job is not in the running set (finished, timed out, or unknown).
    #[error("Job {0} is not running")]
    NotRunning(Uuid),

    /// No job with this id exists.
    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    /// The job reached a failed terminal state.
    #[error("Job {id} failed: {error}")]
    JobFailed { id: Uuid, error: String },

    /// The job was cancelled before it ran.
    #[error("Job {0} was cancelled")]
    JobCancelled(Uuid),

    /// `get_result` gave up waiting.
    #[error("Timed out after {0:?} waiting for job result")]
    ResultTimeout(Duration),

    /// The job request was rejected.
    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    /// The queue configuration is invalid.
    #[error("Invalid queue configuration: {0}")]
    Config(#[from] ConfigError),

    /// Writing the snapshot failed.
    #[error("Snapshot failed: {0}")]
    Store(#[from] StoreError),
}

/// What `fail_job` did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The job went back to pending. `attempt` is the retry number it will run as.
    Retrying { attempt: u32, max_retries: u32 },
    /// The retry budget was spent; the job is terminally failed.
    Failed,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    /// Terminally failed jobs, timed-out ones included.
    pub failed: usize,
    pub cancelled: usize,
    /// The subset of `failed` evicted by the sweeper.
    pub timed_out: usize,
    /// Mean processing time of jobs completed since the queue started.
    #[serde(with = "secs_f64")]
    pub avg_processing_time: Duration,
}

/// Number of records removed by `cleanup_old_jobs`, per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// Lifecycle of the queue itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Open,
    /// Shutdown started: no admission or dispatch, reports still accepted.
    Draining,
    /// Final snapshot taken: nothing changes any more.
    Closed,
}

/// All job collections. Each job id is in exactly one of them.
#[derive(Debug, Default)]
struct QueueState {
    phase: Phase,
    pending: PriorityScheduler,
    running: HashMap<Uuid, JobRecord>,
    completed: HashMap<Uuid, JobRecord>,
    failed: HashMap<Uuid, JobRecord>,
    cancelled: HashMap<Uuid, JobRecord>,
    next_sequence: u64,
    completed_count: u64,
    avg_processing_secs: f64,
}

impl QueueState {
    /// Rebuilds state from a snapshot. Jobs that were running are orphans:
    /// nobody holds them any more, so the interrupted attempt counts as a
    /// failed one.
    fn restore(snapshot: SnapshotState, now: DateTime<Utc>) -> Self {
        let mut state = Self::default();
        let mut max_sequence = None;
        let mut note_sequence = |job: &JobRecord| {
            max_sequence = max_sequence.max(Some(job.sequence));
        };

        for job in snapshot.pending {
            note_sequence(&job);
            state.pending.push(job);
        }
        for job in snapshot.completed {
            note_sequence(&job);
            state.completed.insert(job.id, job);
        }
        for job in snapshot.failed {
            note_sequence(&job);
            state.failed.insert(job.id, job);
        }
        for job in snapshot.cancelled {
            note_sequence(&job);
            state.cancelled.insert(job.id, job);
        }
        for mut job in snapshot.running {
            note_sequence(&job);
            if job.can_retry() {
                job.requeue_for_retry(INTERRUPTED_ERROR);
                warn!(
                    job_id = %job.id,
                    attempt = job.retry_count,
                    "Requeued job interrupted by restart"
                );
                state.pending.push(job);
            } else {
                job.mark_failed(INTERRUPTED_ERROR, now);
                warn!(job_id = %job.id, "Failed job interrupted by restart");
                state.failed.insert(job.id, job);
            }
        }

        state.next_sequence = max_sequence.map_or(0, |s| s + 1);
        state
    }

    fn lookup(&self, id: &Uuid) -> Option<&JobRecord> {
        self.pending
            .get(id)
            .or_else(|| self.running.get(id))
            .or_else(|| self.completed.get(id))
            .or_else(|| self.failed.get(id))
            .or_else(|| self.cancelled.get(id))
    }

    fn len(&self) -> usize {
        self.pending.len()
            + self.running.len()
            + self.completed.len()
            + self.failed.len()
            + self.cancelled.len()
    }

    fn records(&self) -> Vec<JobRecord> {
        let mut records = Vec::with_capacity(self.len());
        records.extend(self.pending.iter().cloned());
        records.extend(self.running.values().cloned());
        records.extend(self.completed.values().cloned());
        records.extend(self.failed.values().cloned());
        records.extend(self.cancelled.values().cloned());
        records.sort_by_key(|job| job.sequence);
        records
    }

    fn record_processing_time(&mut self, elapsed: Duration) {
        self.completed_count += 1;
        let secs = elapsed.as_secs_f64();
        self.avg_processing_secs += (secs - self.avg_processing_secs) / self.completed_count as f64;
    }
}

/// Thread-safe job queue shared by producers, workers and background loops.
///
/// Create with [`JobQueue::open`] for a persistent queue or
/// [`JobQueue::in_memory`] for tests and embedding.
pub struct JobQueue {
    state: Mutex<QueueState>,
    store: Option<SnapshotStore>,
    config: QueueConfig,
    notify: Notify,
    shutdown_tx: broadcast::Sender<()>,
    background: Mutex<Vec<JoinHandle<()>>>,
    metrics: MetricsCollector,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("store", &self.store)
            .field("phase", &self.lock().phase)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    /// Creates an empty queue without loading anything or starting
    /// background loops. Snapshots go to `config.snapshot_path()` if set.
    pub fn new(config: QueueConfig) -> Arc<Self> {
        Arc::new(Self::with_state(config, QueueState::default()))
    }

    /// Creates an empty queue that never touches the filesystem.
    pub fn in_memory() -> Arc<Self> {
        Self::new(QueueConfig::in_memory())
    }

    /// Opens a queue: validates the config, restores the snapshot (if a
    /// storage path is configured) and starts the sweeper and snapshotter.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Config` if the configuration is invalid. A
    /// missing or corrupt snapshot is not an error.
    pub async fn open(config: QueueConfig) -> Result<Arc<Self>, QueueError> {
        config.validate()?;

        let state = match config.snapshot_path() {
            Some(path) => {
                let snapshot = SnapshotStore::new(path).load().await;
                QueueState::restore(snapshot, Utc::now())
            }
            None => QueueState::default(),
        };

        let queue = Arc::new(Self::with_state(config, state));
        {
            let state = queue.lock();
            queue.record_depth(&state);
            info!(
                jobs = state.len(),
                pending = state.pending.len(),
                "Job queue opened"
            );
        }
        queue.start_background();
        Ok(queue)
    }

    fn with_state(config: QueueConfig, state: QueueState) -> Self {
        let store = config.snapshot_path().map(SnapshotStore::new);
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            state: Mutex::new(state),
            store,
            config,
            notify: Notify::new(),
            shutdown_tx,
            background: Mutex::new(Vec::new()),
            metrics: MetricsCollector::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns whether `shutdown` has been called. True from the start of
    /// draining on, so workers stop asking for jobs.
    pub fn is_shut_down(&self) -> bool {
        self.lock().phase != Phase::Open
    }

    /// Starts the timeout sweeper and, when persistence is enabled, the
    /// periodic snapshotter. Does nothing if they are already running or
    /// the queue is shut down.
    pub fn start_background(self: &Arc<Self>) {
        if self.is_shut_down() {
            return;
        }
        let mut handles = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !handles.is_empty() {
            return;
        }

        handles.push(self.spawn_sweeper());
        if self.store.is_some() {
            handles.push(self.spawn_snapshotter());
        }
        debug!(tasks = handles.len(), "Queue background tasks started");
    }

    fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::downgrade(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = ticker(self.config.sweep_interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let Some(queue) = Weak::upgrade(&queue) else { break };
                        queue.sweep_timeouts();
                    }
                }
            }
            debug!("Timeout sweeper stopped");
        })
    }

    fn spawn_snapshotter(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::downgrade(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut ticker = ticker(self.config.snapshot_interval);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        let Some(queue) = Weak::upgrade(&queue) else { break };
                        if let Err(e) = queue.save_snapshot().await {
                            error!(error = %e, "Periodic snapshot failed");
                        }
                    }
                }
            }
            debug!("Snapshotter stopped");
        })
    }

    /// Admits a new pending job and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ShutDown` once `shutdown` has started and
    /// `QueueError::InvalidRequest` for a zero timeout.
    pub fn add_job(&self, request: JobRequest) -> Result<Uuid, QueueError> {
        if request.timeout.is_zero() {
            return Err(QueueError::InvalidRequest(
                "timeout must be greater than 0".to_string(),
            ));
        }

        let mut state = self.lock();
        if state.phase != Phase::Open {
            return Err(QueueError::ShutDown);
        }
        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let job = JobRecord::from_request(request, sequence);
        let id = job.id;
        info!(
            job_id = %id,
            target = %job.target,
            priority = %job.priority,
            "Job added"
        );
        state.pending.push(job);

        self.metrics.record_job_event(JobEvent::Enqueued, 1);
        self.record_depth(&state);
        Ok(id)
    }

    /// Takes the next pending job for `worker_id` and marks it running.
    ///
    /// Never blocks: returns `None` when nothing is pending or the queue is
    /// shut down.
    pub fn get_job(&self, worker_id: &str) -> Option<JobRecord> {
        let mut state = self.lock();
        if state.phase != Phase::Open {
            return None;
        }
        let mut job = state.pending.pop()?;
        job.mark_running(worker_id, Utc::now());
        state.running.insert(job.id, job.clone());

        debug!(
            job_id = %job.id,
            worker_id = %worker_id,
            attempt = job.retry_count + 1,
            "Job dispatched"
        );
        self.metrics.record_job_event(JobEvent::Started, 1);
        self.record_depth(&state);
        Some(job)
    }

    /// Marks a running job completed with `result`.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::NotRunning` if the job is not running, which
    /// happens on duplicate reports and after a sweeper eviction, and
    /// `QueueError::ShutDown` once the queue has closed.
    pub fn complete_job(&self, id: Uuid, result: serde_json::Value) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.phase == Phase::Closed {
            return Err(QueueError::ShutDown);
        }
        let Some(mut job) = state.running.remove(&id) else {
            warn!(job_id = %id, "Completion reported for job that is not running");
            return Err(QueueError::NotRunning(id));
        };

        job.mark_completed(result, Utc::now());
        if let Some(elapsed) = job.processing_time() {
            state.record_processing_time(elapsed);
        }
        info!(job_id = %id, retries = job.retry_count, "Job completed");
        state.completed.insert(id, job);

        self.metrics.record_job_event(JobEvent::Completed, 1);
        self.record_depth(&state);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Records a failed attempt of a running job. The job is retried while
    /// its budget lasts, otherwise it fails terminally.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::NotRunning` if the job is not running and
    /// `QueueError::ShutDown` once the queue has closed.
    pub fn fail_job(&self, id: Uuid, error: &str) -> Result<FailOutcome, QueueError> {
        let mut state = self.lock();
        if state.phase == Phase::Closed {
            return Err(QueueError::ShutDown);
        }
        let Some(mut job) = state.running.remove(&id) else {
            warn!(job_id = %id, "Failure reported for job that is not running");
            return Err(QueueError::NotRunning(id));
        };

        if job.can_retry() {
            job.requeue_for_retry(error);
            let outcome = FailOutcome::Retrying {
                attempt: job.retry_count,
                max_retries: job.max_retries,
            };
            warn!(
                job_id = %id,
                attempt = job.retry_count,
                max_retries = job.max_retries,
                error = %error,
                "Job failed, requeueing for retry"
            );
            state.pending.push(job);

            self.metrics.record_job_event(JobEvent::Retried, 1);
            self.record_depth(&state);
            drop(state);
            // The running set shrank; a draining shutdown may be waiting on it.
            self.notify.notify_waiters();
            return Ok(outcome);
        }

        job.mark_failed(error, Utc::now());
        error!(
            job_id = %id,
            retries = job.retry_count,
            error = %error,
            "Job failed permanently"
        );
        state.failed.insert(id, job);

        self.metrics.record_job_event(JobEvent::Failed, 1);
        self.record_depth(&state);
        drop(state);
        self.notify.notify_waiters();
        Ok(FailOutcome::Failed)
    }

    /// Cancels a pending job. Returns `false` if the job is running, already
    /// finished, unknown, or the queue is closed.
    pub fn cancel_job(&self, id: Uuid) -> bool {
        let mut state = self.lock();
        if state.phase == Phase::Closed {
            return false;
        }
        let Some(mut job) = state.pending.remove(&id) else {
            debug!(job_id = %id, "Cancel ignored, job is not pending");
            return false;
        };

        job.mark_cancelled(Utc::now());
        info!(job_id = %id, "Job cancelled");
        state.cancelled.insert(id, job);

        self.metrics.record_job_event(JobEvent::Cancelled, 1);
        self.record_depth(&state);
        drop(state);
        self.notify.notify_waiters();
        true
    }

    /// Returns a copy of the job, whatever its state.
    pub fn get_job_status(&self, id: Uuid) -> Option<JobRecord> {
        self.lock().lookup(&id).cloned()
    }

    /// Waits up to `timeout` for the job to finish and returns its result.
    ///
    /// # Errors
    ///
    /// - `JobFailed` if the job failed or timed out
    /// - `JobCancelled` if it was cancelled
    /// - `JobNotFound` if no such job exists
    /// - `ResultTimeout` if it is still pending or running at the deadline
    pub async fn get_result(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> Result<serde_json::Value, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a transition in between is not missed.
            notified.as_mut().enable();

            {
                let state = self.lock();
                let Some(job) = state.lookup(&id) else {
                    return Err(QueueError::JobNotFound(id));
                };
                match job.status {
                    JobStatus::Completed => {
                        return Ok(job.result.clone().unwrap_or(serde_json::Value::Null));
                    }
                    JobStatus::Failed | JobStatus::TimedOut => {
                        return Err(QueueError::JobFailed {
                            id,
                            error: job.error.clone().unwrap_or_default(),
                        });
                    }
                    JobStatus::Cancelled => return Err(QueueError::JobCancelled(id)),
                    JobStatus::Pending | JobStatus::Running => {}
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::ResultTimeout(timeout));
            }
        }
    }

    /// Returns current counters.
    pub fn get_stats(&self) -> QueueStats {
        let state = self.lock();
        let timed_out = state
            .failed
            .values()
            .filter(|job| job.status == JobStatus::TimedOut)
            .count();

        QueueStats {
            total: state.len(),
            pending: state.pending.len(),
            running: state.running.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            cancelled: state.cancelled.len(),
            timed_out,
            avg_processing_time: Duration::from_secs_f64(state.avg_processing_secs),
        }
    }

    /// Returns copies of all jobs, oldest admission first. A `Failed`
    /// filter also matches timed-out jobs.
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<JobRecord> {
        let mut records = self.lock().records();
        if let Some(wanted) = status {
            records.retain(|job| job.status == wanted || job.status.reported() == wanted);
        }
        records
    }

    /// One sweeper pass: moves every running job past its timeout to the
    /// failed set as `TimedOut`. Timeouts do not consume retries. Returns
    /// the evicted ids.
    pub fn sweep_timeouts(&self) -> Vec<Uuid> {
        let now = Utc::now();
        let mut state = self.lock();
        if state.phase == Phase::Closed {
            return Vec::new();
        }

        let overdue: Vec<Uuid> = state
            .running
            .values()
            .filter(|job| job.is_overdue(now))
            .map(|job| job.id)
            .collect();
        if overdue.is_empty() {
            return overdue;
        }

        for id in &overdue {
            if let Some(mut job) = state.running.remove(id) {
                warn!(
                    job_id = %id,
                    worker_id = ?job.worker_id,
                    timeout_ms = job.timeout.as_millis() as u64,
                    "Job timed out"
                );
                job.mark_timed_out(now);
                state.failed.insert(*id, job);
            }
        }

        self.metrics
            .record_job_event(JobEvent::TimedOut, overdue.len() as u64);
        self.record_depth(&state);
        drop(state);
        self.notify.notify_waiters();
        overdue
    }

    /// Purges terminal jobs that finished more than `retention` ago.
    pub fn cleanup_old_jobs(&self, retention: chrono::Duration) -> CleanupReport {
        let cutoff = Utc::now() - retention;
        let expired = |job: &JobRecord| job.completed_at.unwrap_or(job.created_at) < cutoff;

        let mut state = self.lock();
        let before = (
            state.completed.len(),
            state.failed.len(),
            state.cancelled.len(),
        );
        state.completed.retain(|_, job| !expired(job));
        state.failed.retain(|_, job| !expired(job));
        state.cancelled.retain(|_, job| !expired(job));

        let report = CleanupReport {
            completed: before.0 - state.completed.len(),
            failed: before.1 - state.failed.len(),
            cancelled: before.2 - state.cancelled.len(),
        };

        if report.total() > 0 {
            info!(
                completed = report.completed,
                failed = report.failed,
                cancelled = report.cancelled,
                "Purged old jobs"
            );
            self.metrics
                .record_job_event(JobEvent::Purged, report.total() as u64);
            self.record_depth(&state);
        }
        report
    }

    /// Copies of every record, oldest admission first.
    pub fn snapshot_records(&self) -> Vec<JobRecord> {
        self.lock().records()
    }

    /// Writes the current state to the snapshot file. A no-op for
    /// in-memory queues.
    pub async fn save_snapshot(&self) -> Result<(), QueueError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let records = self.snapshot_records();
        store.save(&records).await?;
        Ok(())
    }

    /// Shuts the queue down.
    ///
    /// Admission and dispatch stop at once. Jobs already running may still
    /// complete or fail until the running set is empty or
    /// `shutdown_timeout` passes; jobs still running then are persisted as
    /// running and handled as orphans on the next open. Afterwards the
    /// background loops stop, a final snapshot is written and further
    /// changes are rejected. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Store` if the final snapshot cannot be written.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        {
            let mut state = self.lock();
            if state.phase != Phase::Open {
                return Ok(());
            }
            state.phase = Phase::Draining;
            info!(running = state.running.len(), "Shutting down job queue");
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        if !self.drain_running(deadline).await {
            let running = self.lock().running.len();
            warn!(
                timeout = ?self.config.shutdown_timeout,
                running,
                "Running jobs did not finish before shutdown"
            );
        }

        // Ignore send error - background tasks may not have been started
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let join_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Queue background task panicked");
                }
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, join_all)
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "Background tasks did not stop in time"
            );
        }

        let records = {
            let mut state = self.lock();
            state.phase = Phase::Closed;
            state.records()
        };
        if let Some(store) = &self.store {
            store.save(&records).await?;
        }

        info!(jobs = records.len(), "Job queue shut down");
        Ok(())
    }

    /// Waits until no job is running. Returns `false` at the deadline.
    async fn drain_running(&self, deadline: tokio::time::Instant) -> bool {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock().running.is_empty() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }

    fn record_depth(&self, state: &QueueState) {
        self.metrics
            .update_queue_depth("pending", state.pending.len());
        self.metrics
            .update_queue_depth("running", state.running.len());
        self.metrics
            .update_queue_depth("completed", state.completed.len());
        self.metrics.update_queue_depth("failed", state.failed.len());
        self.metrics
            .update_queue_depth("cancelled", state.cancelled.len());
    }
}

/// Interval whose first tick is one full period away.
fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

mod secs_f64 {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
