//! Worker pool for processing jobs from the shared queue.
//!
//! This module provides a pool of workers that process jobs from a shared
//! `JobQueue`. Each worker runs as an independent async task, pulls one job
//! at a time and hands it to the injected `Executor`.
//!
//! # Features
//!
//! - Configurable number of workers with stable ids (`worker-01`, ...)
//! - Graceful shutdown with broadcast channel
//! - Per-attempt deadline equal to the job's timeout
//! - Executor panics are caught and reported as failed attempts
//! - Optional bounded worker lifetime (`max_jobs_per_worker`)
//! - Per-worker and pool-wide statistics

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::job::JobRecord;
use super::queue::{FailOutcome, JobQueue};
use crate::config::{ConfigError, WorkerPoolConfig};
use crate::executor::Executor;
use crate::metrics::MetricsCollector;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// Workers detached by a timed-out stop have not exited yet.
    #[error("{0} worker(s) from the previous run are still finishing")]
    WorkersStillRunning(usize),

    /// The pool configuration is invalid.
    #[error("Invalid pool configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Point-in-time view of one worker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    /// Whether the worker loop is still alive.
    pub running: bool,
    /// Job being executed right now, if any.
    pub current_job: Option<Uuid>,
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub total_processing_time: Duration,
    pub average_processing_time: Duration,
    pub started_at: Option<DateTime<Utc>>,
    pub last_job_at: Option<DateTime<Utc>>,
}

impl WorkerSnapshot {
    /// Returns whether the worker is executing a job.
    pub fn is_busy(&self) -> bool {
        self.current_job.is_some()
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    /// Configured number of workers.
    pub num_workers: usize,
    /// Whether the pool has been started and not stopped.
    pub running: bool,
    /// Live workers waiting for a job.
    pub idle_workers: usize,
    /// Live workers executing a job.
    pub busy_workers: usize,
    /// Total number of jobs handled (succeeded + failed).
    pub jobs_processed: u64,
    /// Jobs whose result was accepted by the queue.
    pub jobs_succeeded: u64,
    /// Jobs whose attempt failed, timed out or panicked.
    pub jobs_failed: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
    /// Per-worker detail.
    pub workers: Vec<WorkerSnapshot>,
}

impl PoolStats {
    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.jobs_processed == 0 {
            return 0.0;
        }
        (self.jobs_succeeded as f64 / self.jobs_processed as f64) * 100.0
    }

    fn from_workers(num_workers: usize, running: bool, workers: Vec<WorkerSnapshot>) -> Self {
        let live = workers.iter().filter(|w| w.running);
        let busy_workers = live.clone().filter(|w| w.is_busy()).count();
        let idle_workers = live.count() - busy_workers;

        let jobs_succeeded = workers.iter().map(|w| w.jobs_succeeded).sum();
        let jobs_failed = workers.iter().map(|w| w.jobs_failed).sum();
        let jobs_processed: u64 = workers.iter().map(|w| w.jobs_processed).sum();
        let total: Duration = workers.iter().map(|w| w.total_processing_time).sum();
        let average_job_duration = if jobs_processed > 0 {
            total / jobs_processed as u32
        } else {
            Duration::ZERO
        };

        Self {
            num_workers,
            running,
            idle_workers,
            busy_workers,
            jobs_processed,
            jobs_succeeded,
            jobs_failed,
            average_job_duration,
            workers,
        }
    }
}

#[derive(Debug, Default)]
struct WorkerActivity {
    current_job: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    last_job_at: Option<DateTime<Utc>>,
}

/// Shared state for tracking one worker's statistics.
#[derive(Debug)]
struct WorkerStats {
    worker_id: String,
    running: AtomicBool,
    jobs_processed: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    activity: Mutex<WorkerActivity>,
}

impl WorkerStats {
    fn new(worker_id: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            running: AtomicBool::new(false),
            jobs_processed: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            activity: Mutex::new(WorkerActivity::default()),
        }
    }

    fn activity(&self) -> std::sync::MutexGuard<'_, WorkerActivity> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_started(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.activity().started_at = Some(Utc::now());
    }

    fn mark_stopped(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.activity().current_job = None;
    }

    fn begin_job(&self, job_id: Uuid) {
        self.activity().current_job = Some(job_id);
    }

    fn finish_job(&self, success: bool, duration: Duration) {
        self.jobs_processed.fetch_add(1, Ordering::SeqCst);
        if success {
            self.jobs_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);

        let mut activity = self.activity();
        activity.current_job = None;
        activity.last_job_at = Some(Utc::now());
    }

    fn processed(&self) -> u64 {
        self.jobs_processed.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> WorkerSnapshot {
        let processed = self.processed();
        let total = Duration::from_millis(self.total_duration_ms.load(Ordering::SeqCst));
        let average = if processed > 0 {
            total / processed as u32
        } else {
            Duration::ZERO
        };
        let activity = self.activity();

        WorkerSnapshot {
            worker_id: self.worker_id.clone(),
            running: self.running.load(Ordering::SeqCst),
            current_job: activity.current_job,
            jobs_processed: processed,
            jobs_succeeded: self.jobs_succeeded.load(Ordering::SeqCst),
            jobs_failed: self.jobs_failed.load(Ordering::SeqCst),
            total_processing_time: total,
            average_processing_time: average,
            started_at: activity.started_at,
            last_job_at: activity.last_job_at,
        }
    }
}

/// Worker pool that manages multiple workers processing jobs from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<JobQueue>,
    executor: Arc<dyn Executor>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    workers: Vec<Arc<WorkerStats>>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a worker pool over a shared queue.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Config` if the configuration is invalid.
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<JobQueue>,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            queue,
            executor,
            shutdown_tx,
            worker_handles: Vec::new(),
            workers: Vec::new(),
            is_running: AtomicBool::new(false),
        })
    }

    /// Starts all workers in the pool.
    ///
    /// Workers will begin polling the queue for jobs immediately. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running
    /// and `PoolError::WorkersStillRunning` while workers left behind by a
    /// timed-out `stop` are still alive.
    pub fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        self.worker_handles.retain(|handle| !handle.is_finished());
        if !self.worker_handles.is_empty() {
            return Err(PoolError::WorkersStillRunning(self.worker_handles.len()));
        }

        // Fresh channel per run: the previous one has already fired.
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = shutdown_tx;
        self.workers.clear();

        for i in 0..self.config.num_workers {
            let worker = Worker::new(
                format!("worker-{:02}", i + 1),
                Arc::clone(&self.queue),
                Arc::clone(&self.executor),
                self.shutdown_tx.subscribe(),
                &self.config,
            );
            self.workers.push(Arc::clone(&worker.stats));

            let handle = tokio::spawn(async move {
                worker.run().await;
            });
            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.config.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully stops all workers.
    ///
    /// Sends a shutdown signal to all workers and waits for them to finish
    /// their current jobs. Workers still busy at the timeout are detached,
    /// not aborted, and the pool cannot be restarted until they exit.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NotRunning` if the pool was not started and
    /// `PoolError::ShutdownTimeout` if workers don't stop within the
    /// configured timeout.
    pub async fn stop(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error - workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_timeout = self.config.shutdown_timeout;
        let handles = &mut self.worker_handles;
        let shutdown_future = async {
            while let Some(handle) = handles.last_mut() {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
                handles.pop();
            }
        };

        let result = tokio::time::timeout(shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                warn!(
                    timeout = ?self.config.shutdown_timeout,
                    detached = self.worker_handles.len(),
                    "Workers did not stop in time"
                );
                Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let workers = self.workers.iter().map(|w| w.snapshot()).collect();
        PoolStats::from_workers(self.config.num_workers, self.is_running(), workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// Returns a reference to the job queue.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.config)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// A single worker that processes jobs from the queue.
pub struct Worker {
    /// Unique identifier for this worker.
    id: String,
    /// Reference to the job queue.
    queue: Arc<JobQueue>,
    /// Performs the scrape.
    executor: Arc<dyn Executor>,
    /// Receiver for shutdown signal.
    shutdown_rx: broadcast::Receiver<()>,
    /// Interval between poll attempts when queue is empty.
    poll_interval: Duration,
    /// Retire after this many jobs.
    max_jobs: Option<u64>,
    stats: Arc<WorkerStats>,
    metrics: MetricsCollector,
}

impl Worker {
    /// Creates a worker. It does nothing until [`Worker::run`] is awaited.
    pub fn new(
        id: impl Into<String>,
        queue: Arc<JobQueue>,
        executor: Arc<dyn Executor>,
        shutdown_rx: broadcast::Receiver<()>,
        config: &WorkerPoolConfig,
    ) -> Self {
        let id = id.into();
        let stats = Arc::new(WorkerStats::new(&id));
        Self {
            id,
            queue,
            executor,
            shutdown_rx,
            poll_interval: config.poll_interval,
            max_jobs: config.max_jobs_per_worker,
            stats,
            metrics: MetricsCollector::new(),
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the worker's current statistics.
    pub fn stats(&self) -> WorkerSnapshot {
        self.stats.snapshot()
    }

    /// Main worker loop.
    ///
    /// Polls for jobs and processes them until a shutdown signal is
    /// received, the queue shuts down, or the job limit is reached.
    pub async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");
        self.stats.mark_started();
        self.metrics.inc_workers();

        loop {
            // Check for shutdown signal (non-blocking)
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    // We missed some signals, but since it's shutdown, just check again
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            if let Some(max_jobs) = self.max_jobs {
                if self.stats.processed() >= max_jobs {
                    info!(worker_id = %self.id, max_jobs, "Worker reached job limit");
                    break;
                }
            }

            match self.queue.get_job(&self.id) {
                Some(job) => self.process_job(job).await,
                None if self.queue.is_shut_down() => {
                    info!(worker_id = %self.id, "Queue shut down, worker exiting");
                    break;
                }
                None => {
                    debug!(worker_id = %self.id, "No jobs available");
                    tokio::select! {
                        _ = tokio::time::sleep(self.poll_interval) => {}
                        _ = self.shutdown_rx.recv() => {
                            info!(worker_id = %self.id, "Worker received shutdown signal");
                            break;
                        }
                    }
                }
            }
        }

        self.stats.mark_stopped();
        self.metrics.dec_workers();
        info!(
            worker_id = %self.id,
            jobs_processed = self.stats.processed(),
            "Worker stopped"
        );
    }

    /// Processes a single job and reports the outcome to the queue.
    async fn process_job(&self, job: JobRecord) {
        let job_id = job.id;
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            target = %job.target,
            attempt = job.retry_count + 1,
            "Processing job"
        );

        self.stats.begin_job(job_id);
        self.metrics.inc_jobs_in_progress();

        let result = self.execute(&job).await;
        let duration = start_time.elapsed();

        self.metrics.dec_jobs_in_progress();
        self.metrics
            .record_execution(result.is_ok(), duration.as_secs_f64());

        let succeeded = match result {
            Ok(value) => match self.queue.complete_job(job_id, value) {
                Ok(()) => {
                    info!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        duration_ms = duration.as_millis() as u64,
                        "Job completed successfully"
                    );
                    true
                }
                Err(e) => {
                    warn!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        "Result discarded by queue"
                    );
                    false
                }
            },
            Err(message) => {
                match self.queue.fail_job(job_id, &message) {
                    Ok(FailOutcome::Retrying { attempt, max_retries }) => {
                        warn!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            error = %message,
                            attempt,
                            max_retries,
                            "Job attempt failed, queued for retry"
                        );
                    }
                    Ok(FailOutcome::Failed) => {
                        error!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            error = %message,
                            "Job failed permanently"
                        );
                    }
                    Err(e) => {
                        warn!(
                            worker_id = %self.id,
                            job_id = %job_id,
                            error = %e,
                            "Failure report rejected by queue"
                        );
                    }
                }
                false
            }
        };

        self.stats.finish_job(succeeded, duration);
    }

    /// Runs the executor under the job's deadline, turning panics and
    /// overruns into error messages.
    async fn execute(&self, job: &JobRecord) -> Result<serde_json::Value, String> {
        let execution = AssertUnwindSafe(self.executor.execute(&job.target, &job.config))
            .catch_unwind();

        match tokio::time::timeout(job.timeout, execution).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(panic_info)) => {
                let panic_msg = extract_panic_message(&panic_info);
                error!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    panic = %panic_msg,
                    "Executor panicked"
                );
                self.metrics.record_executor_panic();
                Err(format!("executor panicked: {}", panic_msg))
            }
            Err(_) => Err(format!(
                "execution deadline exceeded after {:?}",
                job.timeout
            )),
        }
    }
}

/// Extract a human-readable message from a panic payload.
fn extract_panic_message(panic_info: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic_info.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic_info.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();

        assert_eq!(stats.num_workers, 0);
        assert_eq!(stats.busy_workers, 0);
        assert_eq!(stats.jobs_processed, 0);
        assert_eq!(stats.average_job_duration, Duration::ZERO);
        assert!((stats.success_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_worker_stats_snapshot() {
        let stats = WorkerStats::new("worker-01");
        stats.mark_started();

        let job_id = Uuid::new_v4();
        stats.begin_job(job_id);
        assert_eq!(stats.snapshot().current_job, Some(job_id));
        assert!(stats.snapshot().is_busy());

        stats.finish_job(true, Duration::from_secs(10));
        stats.finish_job(true, Duration::from_secs(20));
        stats.finish_job(false, Duration::from_secs(6));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.worker_id, "worker-01");
        assert!(snapshot.running);
        assert_eq!(snapshot.current_job, None);
        assert_eq!(snapshot.jobs_processed, 3);
        assert_eq!(snapshot.jobs_succeeded, 2);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.average_processing_time, Duration::from_secs(12));
        assert!(snapshot.started_at.is_some());
        assert!(snapshot.last_job_at.is_some());

        stats.mark_stopped();
        assert!(!stats.snapshot().running);
    }

    #[test]
    fn test_pool_stats_aggregation() {
        let busy = WorkerStats::new("worker-01");
        busy.mark_started();
        busy.finish_job(true, Duration::from_secs(8));
        busy.begin_job(Uuid::new_v4());

        let idle = WorkerStats::new("worker-02");
        idle.mark_started();
        idle.finish_job(false, Duration::from_secs(2));
        idle.finish_job(true, Duration::from_secs(2));

        let stopped = WorkerStats::new("worker-03");

        let stats = PoolStats::from_workers(
            3,
            true,
            vec![busy.snapshot(), idle.snapshot(), stopped.snapshot()],
        );

        assert_eq!(stats.busy_workers, 1);
        assert_eq!(stats.idle_workers, 1);
        assert_eq!(stats.jobs_processed, 3);
        assert_eq!(stats.jobs_succeeded, 2);
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.average_job_duration, Duration::from_secs(4));
        assert!((stats.success_rate() - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_extract_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(extract_panic_message(&payload), "static message");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(extract_panic_message(&payload), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_u32);
        assert_eq!(extract_panic_message(&payload), "unknown panic");
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = PoolError::NotRunning;
        assert!(err.to_string().contains("not running"));

        let err = PoolError::ShutdownTimeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));

        let err = PoolError::WorkersStillRunning(2);
        assert!(err.to_string().contains("still finishing"));
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let queue = JobQueue::in_memory();
        let executor: Arc<dyn Executor> = Arc::new(crate::executor::HttpExecutor::default());

        let result = WorkerPool::new(WorkerPoolConfig::new(0), queue, executor);
        assert!(matches!(result, Err(PoolError::Config(_))));
    }
}
