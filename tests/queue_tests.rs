//! Integration tests for the job queue: concurrency, background loops and
//! persistence across restarts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scrape_queue::config::QueueConfig;
use scrape_queue::scheduler::{
    FailOutcome, JobPriority, JobQueue, JobRequest, JobStatus, QueueError, SnapshotStore,
};
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

fn persistent_config(dir: &TempDir) -> QueueConfig {
    QueueConfig::default()
        .with_storage_path(dir.path())
        .with_shutdown_timeout(Duration::from_secs(2))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_once_dequeue_under_concurrency() {
    const PRODUCERS: usize = 4;
    const JOBS_PER_PRODUCER: usize = 250;
    const CONSUMERS: usize = 8;

    let queue = JobQueue::in_memory();
    let producers_done = Arc::new(AtomicBool::new(false));

    // Consumers start first and race the producers the whole way.
    let mut consumers = Vec::new();
    for c in 0..CONSUMERS {
        let queue = Arc::clone(&queue);
        let producers_done = Arc::clone(&producers_done);
        consumers.push(tokio::spawn(async move {
            let worker_id = format!("worker-{:02}", c + 1);
            let mut taken = Vec::new();
            loop {
                match queue.get_job(&worker_id) {
                    Some(job) => taken.push(job.id),
                    None if producers_done.load(Ordering::SeqCst)
                        && queue.get_stats().pending == 0 =>
                    {
                        break
                    }
                    None => {}
                }
                tokio::task::yield_now().await;
            }
            taken
        }));
    }

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let queue = Arc::clone(&queue);
        producers.push(tokio::spawn(async move {
            let mut ids = Vec::with_capacity(JOBS_PER_PRODUCER);
            for i in 0..JOBS_PER_PRODUCER {
                let priority = match i % 4 {
                    0 => JobPriority::Low,
                    1 => JobPriority::Normal,
                    2 => JobPriority::High,
                    _ => JobPriority::Urgent,
                };
                let request =
                    JobRequest::new(format!("https://p{}.example/{}", p, i)).with_priority(priority);
                ids.push(queue.add_job(request).expect("add should succeed"));
                tokio::task::yield_now().await;
            }
            ids
        }));
    }

    let mut added = HashSet::new();
    for producer in producers {
        added.extend(producer.await.expect("producer task"));
    }
    assert_eq!(added.len(), PRODUCERS * JOBS_PER_PRODUCER);
    producers_done.store(true, Ordering::SeqCst);

    let mut dequeued: Vec<Uuid> = Vec::new();
    for consumer in consumers {
        dequeued.extend(consumer.await.expect("consumer task"));
    }

    let unique: HashSet<Uuid> = dequeued.iter().copied().collect();
    assert_eq!(dequeued.len(), unique.len(), "a job was dequeued twice");
    assert_eq!(unique, added);

    let stats = queue.get_stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.running, PRODUCERS * JOBS_PER_PRODUCER);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_admitted_job_is_in_final_snapshot() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let queue = JobQueue::open(persistent_config(&dir)).await.unwrap();

    let mut producers = Vec::new();
    for p in 0..4 {
        let queue = Arc::clone(&queue);
        producers.push(tokio::spawn(async move {
            let mut accepted = Vec::new();
            for i in 0.. {
                match queue.add_job(JobRequest::new(format!("https://p{}.example/{}", p, i))) {
                    Ok(id) => accepted.push(id),
                    Err(QueueError::ShutDown) => break,
                    Err(e) => panic!("unexpected error: {e}"),
                }
                tokio::task::yield_now().await;
            }
            accepted
        }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.shutdown().await.unwrap();

    let mut accepted = HashSet::new();
    for producer in producers {
        accepted.extend(producer.await.expect("producer task"));
    }
    assert!(!accepted.is_empty());

    let saved: HashSet<Uuid> = SnapshotStore::new(dir.path().join("jobs.json"))
        .load()
        .await
        .into_records()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(saved, accepted);
}

#[tokio::test]
async fn test_sweeper_evicts_overdue_job() {
    let queue = JobQueue::new(
        QueueConfig::in_memory().with_sweep_interval(Duration::from_millis(50)),
    );
    queue.start_background();

    let id = queue
        .add_job(JobRequest::new("https://slow.example").with_timeout(Duration::from_millis(100)))
        .unwrap();
    queue.get_job("worker-01").unwrap();

    // Deadline at 100ms plus at most one sweep interval.
    let err = queue
        .get_result(id, Duration::from_secs(2))
        .await
        .unwrap_err();
    match err {
        QueueError::JobFailed { error, .. } => assert_eq!(error, "timed out"),
        other => panic!("expected JobFailed, got {other:?}"),
    }

    let job = queue.get_job_status(id).unwrap();
    assert_eq!(job.status, JobStatus::TimedOut);
    assert_eq!(job.retry_count, 0);
    assert!(matches!(
        queue.complete_job(id, json!("late")),
        Err(QueueError::NotRunning(_))
    ));

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_persistence_round_trip() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let queue = JobQueue::open(persistent_config(&dir)).await.unwrap();

    let completed = queue
        .add_job(
            JobRequest::new("https://done.example")
                .with_priority(JobPriority::Urgent)
                .with_tag("books"),
        )
        .unwrap();
    let failed = queue
        .add_job(
            JobRequest::new("https://broken.example")
                .with_priority(JobPriority::High)
                .with_max_retries(0),
        )
        .unwrap();
    let cancelled = queue.add_job(JobRequest::new("https://skip.example")).unwrap();
    let pending = queue
        .add_job(JobRequest::new("https://later.example").with_priority(JobPriority::Low))
        .unwrap();

    assert_eq!(queue.get_job("worker-01").unwrap().id, completed);
    queue
        .complete_job(completed, json!({"title": "Done"}))
        .unwrap();
    assert_eq!(queue.get_job("worker-01").unwrap().id, failed);
    assert_eq!(
        queue.fail_job(failed, "HTTP 500").unwrap(),
        FailOutcome::Failed
    );
    assert!(queue.cancel_job(cancelled));

    let before = queue.snapshot_records();
    queue.shutdown().await.unwrap();
    assert!(dir.path().join("jobs.json").exists());

    let reopened = JobQueue::open(persistent_config(&dir)).await.unwrap();
    assert_eq!(reopened.snapshot_records(), before);

    for (id, status) in [
        (completed, JobStatus::Completed),
        (failed, JobStatus::Failed),
        (cancelled, JobStatus::Cancelled),
        (pending, JobStatus::Pending),
    ] {
        assert_eq!(reopened.get_job_status(id).unwrap().status, status);
    }

    // Sequence numbering continues after the restored jobs.
    let next = reopened.add_job(JobRequest::new("https://new.example")).unwrap();
    let next_seq = reopened.get_job_status(next).unwrap().sequence;
    assert!(before.iter().all(|job| job.sequence < next_seq));

    reopened.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_running_job_survives_restart() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let queue = JobQueue::open(persistent_config(&dir)).await.unwrap();

    let retryable = queue.add_job(JobRequest::new("https://a.example")).unwrap();
    let exhausted = queue
        .add_job(JobRequest::new("https://b.example").with_max_retries(0))
        .unwrap();
    queue.get_job("worker-01").unwrap();
    queue.get_job("worker-02").unwrap();

    // Simulate a crash: snapshot taken while both jobs are running.
    queue.save_snapshot().await.unwrap();
    drop(queue);

    let reopened = JobQueue::open(persistent_config(&dir)).await.unwrap();
    let stats = reopened.get_stats();
    assert_eq!(stats.running, 0);
    assert_eq!(stats.total, 2);

    let requeued = reopened.get_job_status(retryable).unwrap();
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.retry_count, 1);
    assert!(requeued.worker_id.is_none());

    let failed = reopened.get_job_status(exhausted).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("interrupted by restart"));

    assert_eq!(reopened.get_job("worker-01").unwrap().id, retryable);
    reopened.complete_job(retryable, json!("ok")).unwrap();
    reopened.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let snapshot = dir.path().join("jobs.json");
    std::fs::write(&snapshot, b"{ this is not json").unwrap();

    let queue = JobQueue::open(persistent_config(&dir)).await.unwrap();
    assert_eq!(queue.get_stats().total, 0);

    let backup = SnapshotStore::new(&snapshot).backup_path();
    assert_eq!(std::fs::read(&backup).unwrap(), b"{ this is not json");

    // The queue is fully usable and writes a fresh snapshot.
    queue.add_job(JobRequest::new("https://fresh.example")).unwrap();
    queue.shutdown().await.unwrap();
    assert_eq!(SnapshotStore::new(&snapshot).load().await.len(), 1);
}

#[tokio::test]
async fn test_periodic_snapshot() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = persistent_config(&dir).with_snapshot_interval(Duration::from_millis(50));
    let queue = JobQueue::open(config).await.unwrap();

    queue.add_job(JobRequest::new("https://a.example")).unwrap();

    let store = SnapshotStore::new(dir.path().join("jobs.json"));
    let mut saved = 0;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        saved = store.load().await.len();
        if saved == 1 {
            break;
        }
    }
    assert_eq!(saved, 1);

    queue.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_race_with_dispatch() {
    let queue = JobQueue::in_memory();
    let id = queue.add_job(JobRequest::new("https://a.example")).unwrap();

    let job = queue.get_job("worker-01").unwrap();
    assert!(!queue.cancel_job(id));

    let current = queue.get_job_status(id).unwrap();
    assert_eq!(current.status, JobStatus::Running);
    assert_eq!(current.worker_id, job.worker_id);

    queue.complete_job(id, json!(true)).unwrap();
    assert_eq!(
        queue.get_result(id, Duration::from_millis(10)).await.unwrap(),
        json!(true)
    );
}

#[tokio::test]
async fn test_open_rejects_invalid_config() {
    let config = QueueConfig::in_memory().with_sweep_interval(Duration::ZERO);
    assert!(matches!(
        JobQueue::open(config).await,
        Err(QueueError::Config(_))
    ));
}
