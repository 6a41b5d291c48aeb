//! Job definitions for the scheduler.
//!
//! This module defines the core job types used in the scheduling system:
//!
//! - `JobRequest`: What a producer submits (target, config, priority, ...)
//! - `JobRecord`: A scrape job and its full lifecycle state
//! - `JobPriority`: Scheduling tier of a job
//! - `JobStatus`: Lifecycle state of a job

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default maximum number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default maximum time a running job may hold a worker.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Opaque configuration handed to the executor with the job's target.
pub type JobConfig = serde_json::Map<String, serde_json::Value>;

/// Free-form, non-semantic job annotations.
pub type JobMetadata = serde_json::Map<String, serde_json::Value>;

/// Scheduling tier of a job. Higher tiers always run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for JobPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl JobPriority {
    /// Numeric rank used for ordering (Low = 1 .. Urgent = 4).
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Urgent => 4,
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(format!(
                "unknown priority '{}' (expected low, normal, high or urgent)",
                other
            )),
        }
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// Pending ──▶ Running ──▶ Completed
///    │           │
///    │           ├──▶ Pending   (retry, retry_count + 1)
///    │           ├──▶ Failed    (retries exhausted)
///    │           └──▶ TimedOut  (evicted by the sweeper)
///    └──▶ Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the pending set.
    Pending,
    /// Held by a worker.
    Running,
    /// Finished with a result.
    Completed,
    /// Failed after exhausting its retry budget.
    Failed,
    /// Removed from the pending set before it ran.
    Cancelled,
    /// Evicted after running longer than its timeout.
    TimedOut,
}

impl JobStatus {
    /// Check if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut => true,
            Self::Pending | Self::Running => false,
        }
    }

    /// Status as reported to external callers: a timeout is a failure.
    pub fn reported(&self) -> JobStatus {
        match self {
            Self::TimedOut => Self::Failed,
            other => *other,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "timed_out" | "timeout" => Ok(Self::TimedOut),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// A request to enqueue one scrape job.
///
/// Collections are always materialized: a request built without tags or
/// metadata carries empty ones, never missing ones.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    /// URL (or other opaque target) to scrape.
    pub target: String,
    /// Executor configuration, owned by the job.
    pub config: JobConfig,
    /// Scheduling tier.
    pub priority: JobPriority,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Free-form metadata.
    pub metadata: JobMetadata,
    /// Number of retries allowed after the first attempt.
    pub max_retries: u32,
    /// Maximum time the job may run before the sweeper evicts it.
    pub timeout: Duration,
}

impl JobRequest {
    /// Creates a Normal-priority request with default retry and timeout.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            config: JobConfig::new(),
            priority: JobPriority::default(),
            tags: Vec::new(),
            metadata: JobMetadata::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_JOB_TIMEOUT,
        }
    }

    /// Sets the executor configuration.
    pub fn with_config(mut self, config: JobConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Replaces the tag list.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Sets the metadata.
    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the running timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A scrape job together with its lifecycle state.
///
/// Records are only mutated by the queue. `worker_id` is set exactly while
/// the job is `Running`; `retry_count` never exceeds `max_retries`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique identifier, immutable.
    pub id: Uuid,
    /// URL (or other opaque target) to scrape.
    pub target: String,
    /// Executor configuration.
    #[serde(default)]
    pub config: JobConfig,
    /// Scheduling tier.
    pub priority: JobPriority,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// When the job was admitted. Kept across retries.
    pub created_at: DateTime<Utc>,
    /// When the current attempt started.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Worker currently holding the job.
    #[serde(default)]
    pub worker_id: Option<String>,
    /// Executor result, set on completion.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Last error message.
    #[serde(default)]
    pub error: Option<String>,
    /// Retries consumed so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Maximum running time before eviction.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: JobMetadata,
    /// Admission order, FIFO tie-break within equal priority and timestamp.
    #[serde(default)]
    pub sequence: u64,
}

impl JobRecord {
    /// Builds a pending record from a request.
    pub fn from_request(request: JobRequest, sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: request.target,
            config: request.config,
            priority: request.priority,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries: request.max_retries,
            timeout: request.timeout,
            tags: request.tags,
            metadata: request.metadata,
            sequence,
        }
    }

    /// Pending → Running.
    pub(crate) fn mark_running(&mut self, worker_id: &str, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, JobStatus::Pending);
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.worker_id = Some(worker_id.to_string());
    }

    /// Running → Completed.
    pub(crate) fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.worker_id = None;
        self.result = Some(result);
        self.error = None;
    }

    /// Running → Pending, consuming one retry.
    pub(crate) fn requeue_for_retry(&mut self, error: &str) {
        self.status = JobStatus::Pending;
        self.retry_count += 1;
        self.started_at = None;
        self.worker_id = None;
        self.error = Some(error.to_string());
    }

    /// Running → Failed (terminal).
    pub(crate) fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
        self.worker_id = None;
        self.error = Some(error.to_string());
    }

    /// Running → TimedOut (terminal).
    pub(crate) fn mark_timed_out(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::TimedOut;
        self.completed_at = Some(now);
        self.worker_id = None;
        self.error = Some("timed out".to_string());
    }

    /// Pending → Cancelled (terminal).
    pub(crate) fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(now);
    }

    /// Returns whether another failure would be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Returns whether the current attempt has run longer than `timeout`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        let Some(started_at) = self.started_at else {
            return false;
        };
        match chrono::Duration::from_std(self.timeout) {
            Ok(limit) => now - started_at > limit,
            Err(_) => false,
        }
    }

    /// Time between the start of the last attempt and completion.
    pub fn processing_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }
}

/// Serializes a `Duration` as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
