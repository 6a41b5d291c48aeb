//! Runtime configuration for the job queue and worker pool.
//!
//! Both configs have sensible defaults, `with_*` builders, and can be
//! overridden from `SCRAPE_QUEUE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::job::{DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRIES};

/// Name of the snapshot file inside the storage directory.
pub const SNAPSHOT_FILE_NAME: &str = "jobs.json";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the job queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Directory holding the snapshot file. `None` keeps state in memory only.
    pub storage_path: Option<PathBuf>,
    /// How often the timeout sweeper runs.
    pub sweep_interval: Duration,
    /// How often the full state is snapshotted.
    pub snapshot_interval: Duration,
    /// How long `shutdown` waits for the background loops to stop.
    pub shutdown_timeout: Duration,
    /// Retry budget applied by `ScrapeCoordinator::add_jobs`.
    pub default_max_retries: u32,
    /// Running timeout applied by `ScrapeCoordinator::add_jobs`.
    pub default_job_timeout: Duration,
    /// Default age after which the `cleanup` command purges terminal jobs.
    pub retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            storage_path: Some(PathBuf::from("data/job_queue")),
            sweep_interval: Duration::from_secs(30),
            snapshot_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
            default_max_retries: DEFAULT_MAX_RETRIES,
            default_job_timeout: DEFAULT_JOB_TIMEOUT,
            retention: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

impl QueueConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            storage_path: None,
            ..Default::default()
        }
    }

    /// Sets the storage directory.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Sets the sweeper interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the snapshot interval.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Sets the default retry budget.
    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Sets the default job timeout.
    pub fn with_default_job_timeout(mut self, timeout: Duration) -> Self {
        self.default_job_timeout = timeout;
        self
    }

    /// Sets the retention window.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Full path of the snapshot file, if persistence is enabled.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.storage_path
            .as_ref()
            .map(|dir| dir.join(SNAPSHOT_FILE_NAME))
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SCRAPE_QUEUE_STORAGE_PATH`: Snapshot directory, empty for in-memory (default: data/job_queue)
    /// - `SCRAPE_QUEUE_SWEEP_INTERVAL_SECS`: Timeout sweeper interval (default: 30)
    /// - `SCRAPE_QUEUE_SNAPSHOT_INTERVAL_SECS`: Snapshot interval (default: 60)
    /// - `SCRAPE_QUEUE_SHUTDOWN_TIMEOUT_SECS`: Background loop stop timeout (default: 10)
    /// - `SCRAPE_QUEUE_MAX_RETRIES`: Default retry budget (default: 3)
    /// - `SCRAPE_QUEUE_JOB_TIMEOUT_SECS`: Default job timeout (default: 300)
    /// - `SCRAPE_QUEUE_RETENTION_DAYS`: Retention of terminal jobs (default: 7)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_STORAGE_PATH") {
            config.storage_path = if val.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_SWEEP_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "SCRAPE_QUEUE_SWEEP_INTERVAL_SECS")?;
            config.sweep_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_SNAPSHOT_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "SCRAPE_QUEUE_SNAPSHOT_INTERVAL_SECS")?;
            config.snapshot_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "SCRAPE_QUEUE_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_MAX_RETRIES") {
            config.default_max_retries = parse_env_value(&val, "SCRAPE_QUEUE_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_JOB_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "SCRAPE_QUEUE_JOB_TIMEOUT_SECS")?;
            config.default_job_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_RETENTION_DAYS") {
            let days: u64 = parse_env_value(&val, "SCRAPE_QUEUE_RETENTION_DAYS")?;
            config.retention = Duration::from_secs(days * 24 * 60 * 60);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sweep_interval must be greater than 0".to_string(),
            ));
        }

        if self.snapshot_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "snapshot_interval must be greater than 0".to_string(),
            ));
        }

        if self.default_job_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "default_job_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long an idle worker waits before polling the queue again.
    pub poll_interval: Duration,
    /// Jobs a worker processes before retiring. `None` means unbounded.
    pub max_jobs_per_worker: Option<u64>,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            max_jobs_per_worker: None,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Retires each worker after `max_jobs` jobs.
    pub fn with_max_jobs_per_worker(mut self, max_jobs: u64) -> Self {
        self.max_jobs_per_worker = Some(max_jobs);
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SCRAPE_QUEUE_WORKERS`: Number of workers (default: 4)
    /// - `SCRAPE_QUEUE_POLL_INTERVAL_MS`: Idle poll interval (default: 1000)
    /// - `SCRAPE_QUEUE_MAX_JOBS_PER_WORKER`: Worker lifetime in jobs (default: unbounded)
    /// - `SCRAPE_QUEUE_POOL_SHUTDOWN_TIMEOUT_SECS`: Pool stop timeout (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_WORKERS") {
            config.num_workers = parse_env_value(&val, "SCRAPE_QUEUE_WORKERS")?;
        }

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_POLL_INTERVAL_MS") {
            let ms: u64 = parse_env_value(&val, "SCRAPE_QUEUE_POLL_INTERVAL_MS")?;
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_MAX_JOBS_PER_WORKER") {
            config.max_jobs_per_worker =
                Some(parse_env_value(&val, "SCRAPE_QUEUE_MAX_JOBS_PER_WORKER")?);
        }

        if let Ok(val) = std::env::var("SCRAPE_QUEUE_POOL_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "SCRAPE_QUEUE_POOL_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_jobs_per_worker == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_jobs_per_worker must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_env_value<T: std::str::FromStr>(val: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
