//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by scrape-queue and
//! provides functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all scrape-queue metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Job lifecycle transitions, labeled by event
/// (enqueued, completed, retried, failed, timed_out, cancelled, purged).
pub static JOB_EVENTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Executor run time in seconds, labeled by outcome (success, failure).
pub static EXECUTION_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of jobs per lifecycle bucket, labeled by state.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of jobs currently being executed by workers.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of running workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Executor panics caught at the worker boundary.
pub static EXECUTOR_PANICS: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording before initialization is a no-op, and
/// calling this more than once keeps the first registry.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let job_events_total = CounterVec::new(
        Opts::new("scrape_queue_job_events_total", "Job lifecycle transitions"),
        &["event"],
    )?;

    let execution_duration = HistogramVec::new(
        HistogramOpts::new(
            "scrape_queue_execution_duration_seconds",
            "Executor run time in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["outcome"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("scrape_queue_depth", "Number of jobs per lifecycle bucket"),
        &["state"],
    )?;

    let jobs_in_progress = Gauge::new(
        "scrape_queue_jobs_in_progress",
        "Number of jobs currently being executed",
    )?;

    let active_workers = Gauge::new("scrape_queue_active_workers", "Number of running workers")?;

    let executor_panics = Counter::new(
        "scrape_queue_executor_panics_total",
        "Executor panics caught by workers",
    )?;

    registry.register(Box::new(job_events_total.clone()))?;
    registry.register(Box::new(execution_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;
    registry.register(Box::new(executor_panics.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOB_EVENTS_TOTAL.set(job_events_total);
    let _ = EXECUTION_DURATION.set(execution_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = ACTIVE_WORKERS.set(active_workers);
    let _ = EXECUTOR_PANICS.set(executor_panics);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line instead if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        if let Some(events) = JOB_EVENTS_TOTAL.get() {
            events.with_label_values(&["enqueued"]).inc();
        }

        let metrics = export_metrics();
        assert!(!metrics.starts_with("# Error"));
        assert!(metrics.contains("scrape_queue_job_events_total"));
    }
}
