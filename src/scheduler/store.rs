//! File-based snapshots of the full job set.
//!
//! A snapshot is a JSON array of job records, each carrying its status so
//! `load` can put it back into the right bucket.
//!
//! Writes go to a temporary sibling file which is synced and then renamed
//! over the snapshot, so a crash mid-write leaves the previous snapshot
//! intact. A snapshot that cannot be parsed is moved aside to
//! `<file>.backup` and the queue starts empty.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use super::job::{JobRecord, JobStatus};
use crate::error::StoreError;

/// Jobs read from a snapshot, grouped by lifecycle bucket.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SnapshotState {
    pub pending: Vec<JobRecord>,
    pub running: Vec<JobRecord>,
    pub completed: Vec<JobRecord>,
    /// Failed and timed-out jobs.
    pub failed: Vec<JobRecord>,
    pub cancelled: Vec<JobRecord>,
}

impl SnapshotState {
    /// Groups records by status.
    pub fn from_records(records: Vec<JobRecord>) -> Self {
        let mut state = Self::default();
        for record in records {
            match record.status {
                JobStatus::Pending => state.pending.push(record),
                JobStatus::Running => state.running.push(record),
                JobStatus::Completed => state.completed.push(record),
                JobStatus::Failed | JobStatus::TimedOut => state.failed.push(record),
                JobStatus::Cancelled => state.cancelled.push(record),
            }
        }
        state
    }

    pub fn len(&self) -> usize {
        self.pending.len()
            + self.running.len()
            + self.completed.len()
            + self.failed.len()
            + self.cancelled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, bucket by bucket.
    pub fn into_records(self) -> Vec<JobRecord> {
        let mut records = Vec::with_capacity(self.len());
        records.extend(self.pending);
        records.extend(self.running);
        records.extend(self.completed);
        records.extend(self.failed);
        records.extend(self.cancelled);
        records
    }
}

/// Reads and writes the snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Creates a store for the snapshot at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a corrupt snapshot is moved.
    pub fn backup_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "backup")
    }

    fn temp_path(&self) -> PathBuf {
        sibling_with_suffix(&self.path, "tmp")
    }

    /// Loads the snapshot.
    ///
    /// Never fails: a missing file yields an empty state, an unreadable or
    /// corrupt file is logged (and moved aside if corrupt) and also yields an
    /// empty state. Individual records that do not parse are skipped.
    pub async fn load(&self) -> SnapshotState {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return SnapshotState::default();
            }
            Err(e) => {
                error!(path = ?self.path, error = %e, "Failed to read job snapshot");
                return SnapshotState::default();
            }
        };

        let entries: Vec<serde_json::Value> = match serde_json::from_slice(&bytes) {
            Ok(entries) => entries,
            Err(e) => {
                error!(path = ?self.path, error = %e, "Failed to parse job snapshot");
                self.quarantine().await;
                return SnapshotState::default();
            }
        };

        let total = entries.len();
        let mut seen = HashSet::with_capacity(total);
        let mut records = Vec::with_capacity(total);

        for entry in entries {
            let id_hint = entry
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();

            match serde_json::from_value::<JobRecord>(entry) {
                Ok(record) => {
                    if seen.insert(record.id) {
                        records.push(record);
                    } else {
                        warn!(job_id = %record.id, "Skipping duplicate job in snapshot");
                    }
                }
                Err(e) => {
                    error!(job_id = %id_hint, error = %e, "Failed to load job from snapshot");
                }
            }
        }

        info!(
            path = ?self.path,
            loaded = records.len(),
            skipped = total - records.len(),
            "Loaded jobs from snapshot"
        );

        SnapshotState::from_records(records)
    }

    /// Writes `records` as the new snapshot.
    pub async fn save(&self, records: &[JobRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::io(parent, e))?;
            }
        }

        let json = serde_json::to_vec_pretty(records)?;
        let temp_path = self.temp_path();

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::io(&temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        tracing::debug!(path = ?self.path, jobs = records.len(), "Saved job snapshot");
        Ok(())
    }

    /// Moves a corrupt snapshot out of the way.
    async fn quarantine(&self) {
        let backup = self.backup_path();
        match fs::rename(&self.path, &backup).await {
            Ok(()) => warn!(backup = ?backup, "Backed up corrupt job snapshot"),
            Err(e) => error!(error = %e, "Failed to back up corrupt job snapshot"),
        }
    }
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::{JobPriority, JobRequest};
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(target: &str, status: JobStatus) -> JobRecord {
        let mut job = JobRecord::from_request(
            JobRequest::new(target)
                .with_priority(JobPriority::High)
                .with_tag("test"),
            0,
        );
        let now = Utc::now();
        match status {
            JobStatus::Pending => {}
            JobStatus::Running => job.mark_running("worker-01", now),
            JobStatus::Completed => {
                job.mark_running("worker-01", now);
                job.mark_completed(serde_json::json!({"ok": true}), now);
            }
            JobStatus::Failed => {
                job.mark_running("worker-01", now);
                job.mark_failed("boom", now);
            }
            JobStatus::TimedOut => {
                job.mark_running("worker-01", now);
                job.mark_timed_out(now);
            }
            JobStatus::Cancelled => job.mark_cancelled(now),
        }
        job
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = SnapshotStore::new(temp_dir.path().join("jobs.json"));

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = SnapshotStore::new(temp_dir.path().join("nested").join("jobs.json"));

        let records = vec![
            record("https://a.example", JobStatus::Pending),
            record("https://b.example", JobStatus::Completed),
            record("https://c.example", JobStatus::Failed),
            record("https://d.example", JobStatus::TimedOut),
            record("https://e.example", JobStatus::Cancelled),
        ];

        store.save(&records).await.expect("save should succeed");
        assert!(!store.temp_path().exists());

        let state = store.load().await;
        assert_eq!(state.pending, vec![records[0].clone()]);
        assert_eq!(state.completed, vec![records[1].clone()]);
        assert_eq!(state.failed, vec![records[2].clone(), records[3].clone()]);
        assert_eq!(state.cancelled, vec![records[4].clone()]);
        assert!(state.running.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_backed_up() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("jobs.json");
        let garbage = b"[{\"id\": \"not closed\"";
        std::fs::write(&path, garbage).expect("write garbage");

        let store = SnapshotStore::new(&path);
        let state = store.load().await;

        assert!(state.is_empty());
        assert!(!path.exists());
        let backup = std::fs::read(store.backup_path()).expect("backup should exist");
        assert_eq!(backup, garbage);
    }

    #[tokio::test]
    async fn test_bad_records_are_skipped() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("jobs.json");
        let good = record("https://ok.example", JobStatus::Completed);

        let mut entries = vec![
            serde_json::to_value(&good).expect("serialize"),
            serde_json::json!({"id": "broken", "status": "exploded"}),
        ];
        entries.push(serde_json::to_value(&good).expect("serialize"));
        std::fs::write(&path, serde_json::to_vec(&entries).expect("encode")).expect("write");

        let state = SnapshotStore::new(&path).load().await;
        assert_eq!(state.len(), 1);
        assert_eq!(state.completed[0], good);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = SnapshotStore::new(temp_dir.path().join("jobs.json"));

        store
            .save(&[record("https://a.example", JobStatus::Pending)])
            .await
            .expect("first save");
        store.save(&[]).await.expect("second save");

        assert!(store.load().await.is_empty());
    }

    #[test]
    fn test_sibling_paths() {
        let store = SnapshotStore::new("/data/queue/jobs.json");
        assert_eq!(store.backup_path(), PathBuf::from("/data/queue/jobs.json.backup"));
        assert_eq!(store.temp_path(), PathBuf::from("/data/queue/jobs.json.tmp"));
    }
}
