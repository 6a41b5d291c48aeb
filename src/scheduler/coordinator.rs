//! High-level façade tying a queue and a worker pool together.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::job::{JobConfig, JobPriority, JobRecord, JobRequest};
use super::queue::{CleanupReport, JobQueue, QueueError, QueueStats};
use super::worker_pool::{PoolError, PoolStats, WorkerPool};
use crate::config::{QueueConfig, WorkerPoolConfig};
use crate::executor::Executor;

/// Errors from coordinator operations that touch both subsystems.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Owns a queue and the pool draining it.
#[derive(Debug)]
pub struct ScrapeCoordinator {
    queue: Arc<JobQueue>,
    pool: WorkerPool,
}

impl ScrapeCoordinator {
    /// Builds a coordinator around an existing queue. Workers are not
    /// started.
    pub fn new(
        queue: Arc<JobQueue>,
        pool_config: WorkerPoolConfig,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, PoolError> {
        let pool = WorkerPool::new(pool_config, Arc::clone(&queue), executor)?;
        Ok(Self { queue, pool })
    }

    /// Opens the queue described by `queue_config` and builds a coordinator
    /// around it.
    pub async fn open(
        queue_config: QueueConfig,
        pool_config: WorkerPoolConfig,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, CoordinatorError> {
        let queue = JobQueue::open(queue_config).await?;
        Ok(Self::new(queue, pool_config, executor)?)
    }

    /// Enqueues one job per URL, all sharing `config`, `priority` and
    /// `tags`. Retry budget and timeout come from the queue config. An
    /// unrecognized priority name falls back to normal.
    pub fn add_jobs<I, S>(
        &self,
        urls: I,
        config: &JobConfig,
        priority: &str,
        tags: &[String],
    ) -> Result<Vec<Uuid>, QueueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let priority = priority.parse::<JobPriority>().unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to normal priority");
            JobPriority::Normal
        });
        let defaults = self.queue.config();

        let ids = urls
            .into_iter()
            .map(|url| {
                let request = JobRequest::new(url)
                    .with_config(config.clone())
                    .with_priority(priority)
                    .with_tags(tags.to_vec())
                    .with_max_retries(defaults.default_max_retries)
                    .with_timeout(defaults.default_job_timeout);
                self.queue.add_job(request)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(count = ids.len(), priority = %priority, "Added jobs");
        Ok(ids)
    }

    pub fn start_workers(&mut self) -> Result<(), PoolError> {
        self.pool.start()
    }

    pub async fn stop_workers(&mut self) -> Result<(), PoolError> {
        self.pool.stop().await
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.get_stats()
    }

    pub fn worker_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn job_status(&self, id: Uuid) -> Option<JobRecord> {
        self.queue.get_job_status(id)
    }

    pub fn cancel_job(&self, id: Uuid) -> bool {
        self.queue.cancel_job(id)
    }

    /// Purges terminal jobs older than `days`.
    pub fn cleanup_old_jobs(&self, days: u32) -> CleanupReport {
        self.queue
            .cleanup_old_jobs(chrono::Duration::days(i64::from(days)))
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Stops the workers (if running), then shuts the queue down. A worker
    /// stop timeout is logged and does not prevent the queue shutdown.
    pub async fn shutdown(&mut self) -> Result<(), CoordinatorError> {
        if self.pool.is_running() {
            if let Err(e) = self.pool.stop().await {
                warn!(error = %e, "Worker pool did not stop cleanly");
            }
        }
        self.queue.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FnExecutor;
    use crate::scheduler::job::JobStatus;
    use std::time::Duration;

    fn echo_executor() -> Arc<dyn Executor> {
        Arc::new(FnExecutor::new(|target: String, _config: JobConfig| async move {
            Ok(serde_json::json!({ "url": target }))
        }))
    }

    fn coordinator() -> ScrapeCoordinator {
        let queue = JobQueue::new(
            QueueConfig::in_memory()
                .with_default_max_retries(1)
                .with_default_job_timeout(Duration::from_secs(5)),
        );
        let pool_config = WorkerPoolConfig::new(2).with_poll_interval(Duration::from_millis(10));
        ScrapeCoordinator::new(queue, pool_config, echo_executor()).unwrap()
    }

    #[test]
    fn test_add_jobs_applies_defaults() {
        let coordinator = coordinator();
        let tags = vec!["books".to_string()];

        let ids = coordinator
            .add_jobs(
                ["https://a.example", "https://b.example"],
                &JobConfig::new(),
                "HIGH",
                &tags,
            )
            .unwrap();
        assert_eq!(ids.len(), 2);

        let job = coordinator.job_status(ids[0]).unwrap();
        assert_eq!(job.priority, JobPriority::High);
        assert_eq!(job.max_retries, 1);
        assert_eq!(job.timeout, Duration::from_secs(5));
        assert_eq!(job.tags, tags);
    }

    #[test]
    fn test_unknown_priority_falls_back_to_normal() {
        let coordinator = coordinator();
        let ids = coordinator
            .add_jobs(["https://a.example"], &JobConfig::new(), "critical", &[])
            .unwrap();

        assert_eq!(
            coordinator.job_status(ids[0]).unwrap().priority,
            JobPriority::Normal
        );
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let mut coordinator = coordinator();
        let ids = coordinator
            .add_jobs(
                ["https://a.example", "https://b.example", "https://c.example"],
                &JobConfig::new(),
                "normal",
                &[],
            )
            .unwrap();

        coordinator.start_workers().unwrap();
        for id in &ids {
            let result = coordinator
                .queue()
                .get_result(*id, Duration::from_secs(5))
                .await
                .unwrap();
            assert!(result["url"].as_str().is_some());
        }

        assert_eq!(coordinator.queue_stats().completed, 3);
        assert_eq!(coordinator.worker_stats().jobs_succeeded, 3);

        coordinator.shutdown().await.unwrap();
        assert!(!coordinator.worker_stats().running);
        assert!(coordinator.queue().is_shut_down());
        assert_eq!(
            coordinator.job_status(ids[0]).unwrap().status,
            JobStatus::Completed
        );
    }
}
