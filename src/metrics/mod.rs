//! Metrics module for Prometheus-based monitoring.
//!
//! This module provides metrics collection and export for queue and worker
//! operations: lifecycle transitions, executor run times, queue depth per
//! bucket, and worker activity.
//!
//! # Example
//!
//! ```ignore
//! use scrape_queue::metrics::{init_metrics, export_metrics};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // ... run the queue and workers; they record through MetricsCollector ...
//!
//! // Export metrics for Prometheus scraping
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{JobEvent, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, EXECUTION_DURATION, EXECUTOR_PANICS, JOBS_IN_PROGRESS, JOB_EVENTS_TOTAL,
    QUEUE_DEPTH, REGISTRY,
};
