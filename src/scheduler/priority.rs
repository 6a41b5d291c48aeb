//! Ordering policy over pending jobs.
//!
//! Pending jobs are ordered by priority (highest first), then by
//! `created_at` (oldest first), then by admission sequence. A retried job
//! keeps its original `created_at` and sequence, so it goes back to its
//! old place in line rather than to the back of its tier.
//!
//! The structure is an ordered map keyed by that tuple plus an id index,
//! so both "pop the next job" and "remove job X" are O(log n).

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::job::{JobPriority, JobRecord};

/// Position of a pending job in the schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduleKey {
    priority: Reverse<JobPriority>,
    created_at: DateTime<Utc>,
    sequence: u64,
    id: Uuid,
}

impl ScheduleKey {
    fn of(job: &JobRecord) -> Self {
        Self {
            priority: Reverse(job.priority),
            created_at: job.created_at,
            sequence: job.sequence,
            id: job.id,
        }
    }
}

impl PartialOrd for ScheduleKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduleKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.created_at.cmp(&other.created_at))
            .then_with(|| self.sequence.cmp(&other.sequence))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Pending set with priority-then-FIFO ordering and removal by id.
#[derive(Debug, Default)]
pub struct PriorityScheduler {
    order: BTreeMap<ScheduleKey, JobRecord>,
    index: HashMap<Uuid, ScheduleKey>,
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a pending job. A job already present under the same id is
    /// replaced.
    pub fn push(&mut self, job: JobRecord) {
        if let Some(old_key) = self.index.remove(&job.id) {
            self.order.remove(&old_key);
        }
        let key = ScheduleKey::of(&job);
        self.index.insert(job.id, key);
        self.order.insert(key, job);
    }

    /// Removes and returns the next job to run.
    pub fn pop(&mut self) -> Option<JobRecord> {
        let (key, job) = self.order.pop_first()?;
        self.index.remove(&key.id);
        Some(job)
    }

    /// Removes a specific job.
    pub fn remove(&mut self, id: &Uuid) -> Option<JobRecord> {
        let key = self.index.remove(id)?;
        self.order.remove(&key)
    }

    pub fn get(&self, id: &Uuid) -> Option<&JobRecord> {
        self.index.get(id).and_then(|key| self.order.get(key))
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.index.contains_key(id)
    }

    /// The job `pop` would return, without removing it.
    pub fn peek(&self) -> Option<&JobRecord> {
        self.order.values().next()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Pending jobs in schedule order.
    pub fn iter(&self) -> impl Iterator<Item = &JobRecord> {
        self.order.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::job::JobRequest;

    fn job(target: &str, priority: JobPriority, sequence: u64) -> JobRecord {
        JobRecord::from_request(JobRequest::new(target).with_priority(priority), sequence)
    }

    #[test]
    fn test_priority_dominates_arrival() {
        let mut scheduler = PriorityScheduler::new();
        scheduler.push(job("low", JobPriority::Low, 0));
        scheduler.push(job("high", JobPriority::High, 1));
        scheduler.push(job("normal", JobPriority::Normal, 2));
        scheduler.push(job("urgent", JobPriority::Urgent, 3));

        let order: Vec<String> = std::iter::from_fn(|| scheduler.pop())
            .map(|j| j.target)
            .collect();
        assert_eq!(order, vec!["urgent", "high", "normal", "low"]);
    }

    #[test]
    fn test_fifo_within_tier_with_equal_timestamps() {
        let mut scheduler = PriorityScheduler::new();
        let mut a = job("a", JobPriority::Normal, 0);
        let mut b = job("b", JobPriority::Normal, 1);
        let now = Utc::now();
        a.created_at = now;
        b.created_at = now;

        scheduler.push(b);
        scheduler.push(a);

        assert_eq!(scheduler.pop().map(|j| j.target), Some("a".to_string()));
        assert_eq!(scheduler.pop().map(|j| j.target), Some("b".to_string()));
        assert!(scheduler.pop().is_none());
    }

    #[test]
    fn test_reinserted_job_keeps_its_place() {
        let mut scheduler = PriorityScheduler::new();
        let first = job("first", JobPriority::Normal, 0);
        let second = job("second", JobPriority::Normal, 1);
        scheduler.push(first);
        scheduler.push(second);

        let mut taken = scheduler.pop().expect("first job");
        taken.retry_count += 1;
        scheduler.push(taken);

        assert_eq!(scheduler.pop().map(|j| j.target), Some("first".to_string()));
    }

    #[test]
    fn test_remove_by_id() {
        let mut scheduler = PriorityScheduler::new();
        let a = job("a", JobPriority::High, 0);
        let b = job("b", JobPriority::Low, 1);
        let a_id = a.id;
        scheduler.push(a);
        scheduler.push(b);

        assert!(scheduler.contains(&a_id));
        let removed = scheduler.remove(&a_id).expect("job should be removed");
        assert_eq!(removed.target, "a");
        assert!(!scheduler.contains(&a_id));
        assert!(scheduler.remove(&a_id).is_none());
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.peek().map(|j| j.target.as_str()), Some("b"));
    }

    #[test]
    fn test_push_same_id_replaces() {
        let mut scheduler = PriorityScheduler::new();
        let mut a = job("a", JobPriority::Low, 0);
        scheduler.push(a.clone());
        a.priority = JobPriority::Urgent;
        scheduler.push(a.clone());

        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.get(&a.id).map(|j| j.priority), Some(JobPriority::Urgent));
    }
}
