//! Job scheduling: queue, persistence and worker pool.
//!
//! This module provides the core of scrape-queue:
//!
//! - **JobQueue**: owns every job, schedules by priority then arrival,
//!   retries failed attempts, evicts timed-out jobs and snapshots state
//! - **SnapshotStore**: atomic JSON snapshots with corrupt-file recovery
//! - **PriorityScheduler**: indexed ordering over pending jobs
//! - **WorkerPool**: workers that pull jobs and run them through an `Executor`
//! - **ScrapeCoordinator**: a queue and a pool behind one handle
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │   Producer   │
//!                      │  (API/CLI)   │
//!                      └──────┬───────┘
//!                             │ add_job
//!                      ┌──────▼───────┐      ┌──────────────┐
//!                      │   JobQueue   │─────▶│ SnapshotStore│
//!                      │  (sweeper)   │      │  jobs.json   │
//!                      └──────┬───────┘      └──────────────┘
//!                             │ get_job / complete_job / fail_job
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │worker-01│         │worker-02│         │worker-NN│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         └───────────── Executor ────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use scrape_queue::config::{QueueConfig, WorkerPoolConfig};
//! use scrape_queue::executor::HttpExecutor;
//! use scrape_queue::scheduler::{JobQueue, JobRequest, JobPriority, WorkerPool};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let queue = JobQueue::open(QueueConfig::default()).await?;
//! let id = queue.add_job(
//!     JobRequest::new("https://example.com").with_priority(JobPriority::High),
//! )?;
//!
//! let mut pool = WorkerPool::new(
//!     WorkerPoolConfig::new(4),
//!     Arc::clone(&queue),
//!     Arc::new(HttpExecutor::default()),
//! )?;
//! pool.start()?;
//!
//! let page = queue.get_result(id, Duration::from_secs(60)).await?;
//!
//! pool.stop().await?;
//! queue.shutdown().await?;
//! ```
//!
//! # Reliability Features
//!
//! - **Bounded retries**: a failed attempt is re-admitted at its original place in line
//! - **Timeout sweeper**: jobs stuck in running are evicted to the failed set
//! - **Crash recovery**: running jobs found in a snapshot are requeued or failed
//! - **Graceful shutdown**: workers finish current jobs before stopping

pub mod coordinator;
pub mod job;
pub mod priority;
pub mod queue;
pub mod store;
pub mod worker_pool;

// Re-export main types for convenience
pub use coordinator::{CoordinatorError, ScrapeCoordinator};
pub use job::{JobConfig, JobMetadata, JobPriority, JobRecord, JobRequest, JobStatus};
pub use priority::PriorityScheduler;
pub use queue::{CleanupReport, FailOutcome, JobQueue, QueueError, QueueStats};
pub use store::{SnapshotState, SnapshotStore};
pub use worker_pool::{PoolError, PoolStats, Worker, WorkerPool, WorkerSnapshot};
