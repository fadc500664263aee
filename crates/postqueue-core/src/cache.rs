//! In-memory job cache
//!
//! The single live mapping job_id → Job for a running process. The scheduler
//! facade owns one `Arc<JobCache>` and hands clones of the Arc to the job
//! manager, recovery and executor, so every component mutates the same map
//! and deletes cannot silently revive.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::models::{Job, JobStatus};

/// Shared mapping of live jobs
#[derive(Debug, Default)]
pub struct JobCache {
    inner: Mutex<HashMap<String, Job>>,
}

/// Counters describing one merge pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Jobs taken from storage
    pub from_storage: usize,
    /// Cache entries preserved against storage (RUNNING/COMPLETED/new)
    pub preserved: usize,
    /// Cache-only entries dropped (deletions propagated)
    pub removed: usize,
    /// Total jobs after the merge
    pub total: usize,
}

impl JobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a job, returning the previous value
    pub fn insert(&self, job: Job) -> Option<Job> {
        self.inner.lock().unwrap().insert(job.job_id.clone(), job)
    }

    /// Remove a job by id
    pub fn remove(&self, job_id: &str) -> Option<Job> {
        self.inner.lock().unwrap().remove(job_id)
    }

    /// Clone a job by id
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.inner.lock().unwrap().get(job_id).cloned()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.inner.lock().unwrap().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// Copy of the whole mapping, for saves and listings
    pub fn snapshot(&self) -> HashMap<String, Job> {
        self.inner.lock().unwrap().clone()
    }

    /// Copies of all jobs
    pub fn jobs(&self) -> Vec<Job> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    /// Mutate one job in place; returns false when the id is unknown
    pub fn update<F>(&self, job_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        let mut map = self.inner.lock().unwrap();
        match map.get_mut(job_id) {
            Some(job) => {
                mutate(job);
                true
            }
            None => false,
        }
    }

    /// Run a closure against the underlying map while holding the lock.
    ///
    /// The lock is not held across await points; callers must keep the
    /// closure synchronous.
    pub fn with_map<R>(&self, f: impl FnOnce(&mut HashMap<String, Job>) -> R) -> R {
        let mut map = self.inner.lock().unwrap();
        f(&mut map)
    }

    /// Count jobs in an active status (PENDING, SCHEDULED, RUNNING)
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.status.is_active())
            .count()
    }

    /// Reconcile the cache against a freshly loaded storage snapshot.
    ///
    /// Policy:
    /// - storage COMPLETED wins over any other cache status (sticky);
    /// - a cache RUNNING entry is never overwritten by storage;
    /// - a cache COMPLETED entry is preserved if storage disagrees;
    /// - a cache-only job survives iff it is RUNNING, or the load is
    ///   non-forced and it is SCHEDULED/PENDING (a new job not yet saved);
    /// - everything else is taken from storage, and under `force` cache-only
    ///   leftovers are dropped so external deletions propagate.
    pub fn merge_from_storage(&self, loaded: HashMap<String, Job>, force: bool) -> MergeStats {
        let mut stats = MergeStats::default();

        self.with_map(|map| {
            let mut merged: HashMap<String, Job> = HashMap::with_capacity(loaded.len());

            for (job_id, stored) in loaded {
                if let Some(existing) = map.get(&job_id) {
                    if stored.status == JobStatus::Completed
                        && existing.status != JobStatus::Completed
                    {
                        debug!(%job_id, "restoring COMPLETED status from storage");
                        merged.insert(job_id, stored);
                        stats.from_storage += 1;
                        continue;
                    }
                    if existing.status == JobStatus::Running {
                        debug!(%job_id, "preserving RUNNING job over storage copy");
                        merged.insert(job_id, existing.clone());
                        stats.preserved += 1;
                        continue;
                    }
                    if existing.status == JobStatus::Completed {
                        debug!(%job_id, "preserving COMPLETED job over storage copy");
                        merged.insert(job_id, existing.clone());
                        stats.preserved += 1;
                        continue;
                    }
                }
                merged.insert(job_id, stored);
                stats.from_storage += 1;
            }

            for (job_id, job) in map.iter() {
                if merged.contains_key(job_id) {
                    continue;
                }
                let keep = job.status == JobStatus::Running
                    || (!force
                        && matches!(job.status, JobStatus::Scheduled | JobStatus::Pending));
                if keep {
                    debug!(%job_id, status = %job.status, force, "keeping cache-only job");
                    merged.insert(job_id.clone(), job.clone());
                    stats.preserved += 1;
                } else {
                    debug!(%job_id, status = %job.status, force, "dropping cache-only job");
                    stats.removed += 1;
                }
            }

            stats.total = merged.len();
            map.clear();
            map.extend(merged);
        });

        info!(
            total = stats.total,
            from_storage = stats.from_storage,
            preserved = stats.preserved,
            removed = stats.removed,
            force,
            "merged jobs from storage"
        );

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobPriority, Platform};
    use chrono::Utc;

    fn job_with(id: &str, status: JobStatus) -> Job {
        let mut job = Job::new(
            Some("acct".to_string()),
            format!("content {}", id),
            Utc::now(),
            JobPriority::Normal,
            Platform::Threads,
            3,
            None,
        );
        job.job_id = id.to_string();
        job.status = status;
        job
    }

    fn loaded(jobs: Vec<Job>) -> HashMap<String, Job> {
        jobs.into_iter().map(|j| (j.job_id.clone(), j)).collect()
    }

    #[test]
    fn test_basic_ops() {
        let cache = JobCache::new();
        assert!(cache.is_empty());

        cache.insert(job_with("a", JobStatus::Scheduled));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("a"));

        assert!(cache.update("a", |j| j.retry_count = 2));
        assert_eq!(cache.get("a").unwrap().retry_count, 2);

        assert!(cache.remove("a").is_some());
        assert!(cache.remove("a").is_none());
    }

    #[test]
    fn test_storage_completed_is_sticky() {
        let cache = JobCache::new();
        cache.insert(job_with("a", JobStatus::Scheduled));

        cache.merge_from_storage(loaded(vec![job_with("a", JobStatus::Completed)]), false);
        assert_eq!(cache.get("a").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_cache_running_is_preserved() {
        let cache = JobCache::new();
        cache.insert(job_with("a", JobStatus::Running));

        cache.merge_from_storage(loaded(vec![job_with("a", JobStatus::Scheduled)]), false);
        assert_eq!(cache.get("a").unwrap().status, JobStatus::Running);
    }

    #[test]
    fn test_cache_completed_is_preserved() {
        let cache = JobCache::new();
        cache.insert(job_with("a", JobStatus::Completed));

        cache.merge_from_storage(loaded(vec![job_with("a", JobStatus::Scheduled)]), false);
        assert_eq!(cache.get("a").unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_cache_only_scheduled_survives_soft_reload() {
        let cache = JobCache::new();
        cache.insert(job_with("new", JobStatus::Scheduled));

        let stats = cache.merge_from_storage(HashMap::new(), false);
        assert!(cache.contains("new"));
        assert_eq!(stats.preserved, 1);
    }

    #[test]
    fn test_forced_reload_propagates_deletions() {
        let cache = JobCache::new();
        cache.insert(job_with("gone", JobStatus::Scheduled));
        cache.insert(job_with("busy", JobStatus::Running));

        let stats = cache.merge_from_storage(HashMap::new(), true);
        assert!(!cache.contains("gone"));
        // RUNNING survives even a forced reload
        assert!(cache.contains("busy"));
        assert_eq!(stats.removed, 1);
    }

    #[test]
    fn test_terminal_cache_only_jobs_drop_even_unforced() {
        let cache = JobCache::new();
        cache.insert(job_with("failed", JobStatus::Failed));

        cache.merge_from_storage(HashMap::new(), false);
        assert!(!cache.contains("failed"));
    }

    #[test]
    fn test_active_count() {
        let cache = JobCache::new();
        cache.insert(job_with("a", JobStatus::Scheduled));
        cache.insert(job_with("b", JobStatus::Running));
        cache.insert(job_with("c", JobStatus::Pending));
        cache.insert(job_with("d", JobStatus::Completed));
        assert_eq!(cache.active_count(), 3);
    }
}
