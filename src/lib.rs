//! scrape-queue: prioritized, persistent job queue and worker pool for
//! web scraping.
//!
//! This library provides an in-process job queue with strict priority
//! scheduling, bounded retries, timeout eviction and crash-recovery
//! snapshots, plus a pool of async workers that run jobs through a
//! pluggable [`executor::Executor`].

// Core modules
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used types
pub use config::{ConfigError, QueueConfig, WorkerPoolConfig};
pub use error::{ExecutorError, StoreError};
pub use executor::{Executor, FnExecutor, HttpExecutor};
pub use scheduler::{
    JobPriority, JobQueue, JobRecord, JobRequest, JobStatus, PoolError, QueueError,
    ScrapeCoordinator, WorkerPool,
};
