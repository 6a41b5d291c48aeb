//! Metric recording for queue and worker operations.
//!
//! `MetricsCollector` wraps the raw Prometheus metrics with methods named
//! after what happened. Every method is a no-op until `init_metrics()` has
//! been called, so library users who never initialize metrics pay nothing.

use super::prometheus::{
    ACTIVE_WORKERS, EXECUTION_DURATION, EXECUTOR_PANICS, JOBS_IN_PROGRESS, JOB_EVENTS_TOTAL,
    QUEUE_DEPTH,
};

/// A job lifecycle transition worth counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Enqueued,
    Started,
    Completed,
    Retried,
    Failed,
    TimedOut,
    Cancelled,
    Purged,
}

impl JobEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Retried => "retried",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Purged => "purged",
        }
    }
}

/// Metrics collector for recording scrape-queue operational metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    pub fn new() -> Self {
        Self
    }

    /// Count one or more lifecycle transitions.
    pub fn record_job_event(&self, event: JobEvent, count: u64) {
        if count == 0 {
            return;
        }
        if let Some(events) = JOB_EVENTS_TOTAL.get() {
            events
                .with_label_values(&[event.as_str()])
                .inc_by(count as f64);
        }
    }

    /// Record how long an executor run took.
    ///
    /// # Arguments
    ///
    /// * `success` - Whether the run produced a result
    /// * `duration_secs` - Wall-clock run time in seconds
    pub fn record_execution(&self, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "failure" };

        if let Some(duration) = EXECUTION_DURATION.get() {
            duration.with_label_values(&[outcome]).observe(duration_secs);
        }

        tracing::trace!(
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded execution metric"
        );
    }

    /// Count an executor panic caught by a worker.
    pub fn record_executor_panic(&self) {
        if let Some(panics) = EXECUTOR_PANICS.get() {
            panics.inc();
        }
    }

    /// Update the number of jobs in one lifecycle bucket.
    pub fn update_queue_depth(&self, state: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth.with_label_values(&[state]).set(depth as f64);
        }
    }

    /// Increment the count of running workers.
    pub fn inc_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.inc();
        }
    }

    /// Decrement the count of running workers.
    pub fn dec_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.dec();
        }
    }

    /// Increment the count of jobs being executed.
    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    /// Decrement the count of jobs being executed.
    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_job_event_labels() {
        assert_eq!(JobEvent::Enqueued.as_str(), "enqueued");
        assert_eq!(JobEvent::TimedOut.as_str(), "timed_out");
        assert_eq!(JobEvent::Purged.as_str(), "purged");
    }

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_record_job_events() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_job_event(JobEvent::Enqueued, 3);
        collector.record_job_event(JobEvent::Completed, 1);
        collector.record_job_event(JobEvent::Purged, 0);

        assert!(export_metrics().contains("event=\"enqueued\""));
    }

    #[test]
    fn test_record_execution_and_gauges() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_execution(true, 0.25);
        collector.record_execution(false, 12.0);
        collector.record_executor_panic();
        collector.update_queue_depth("pending", 42);
        collector.inc_workers();
        collector.dec_workers();
        collector.inc_jobs_in_progress();
        collector.dec_jobs_in_progress();

        let text = export_metrics();
        assert!(text.contains("scrape_queue_execution_duration_seconds"));
        assert!(text.contains("state=\"pending\""));
    }
}
