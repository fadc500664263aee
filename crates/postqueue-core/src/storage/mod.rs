//! Durable job storage
//!
//! Storage owns the durable truth. Implementations provide one atomic save
//! protocol: upsert every cache entry, prune every row missing from the
//! cache, commit, or roll the whole thing back. Two backends ship:
//! - [`mysql::MySqlJobStore`]: a single `jobs` table, one transaction per
//!   save (the production path);
//! - [`file::FileJobStore`]: JSON files partitioned by (date, status) with
//!   atomic per-file writes.

pub mod file;
pub mod mysql;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use crate::cache::JobCache;
use crate::config::Config;
use crate::error::Result;
use crate::models::{Job, JobStatus};

pub use file::FileJobStore;
pub use mysql::MySqlJobStore;

/// Contract every storage backend implements
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Load every persisted job, keyed by id
    async fn load_all(&self) -> Result<HashMap<String, Job>>;

    /// Atomically persist the cache: upsert everything present, prune
    /// everything absent. The empty map means "delete all".
    async fn save(&self, jobs: &HashMap<String, Job>) -> Result<()>;

    /// Fetch a single job
    async fn get_by_id(&self, job_id: &str) -> Result<Option<Job>>;

    /// Jobs in a given status, ordered by scheduled time
    async fn jobs_by_status(&self, status: JobStatus, limit: Option<u32>) -> Result<Vec<Job>>;

    /// Jobs for an account, optionally restricted to one status
    async fn jobs_by_account(
        &self,
        account_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>>;
}

/// Build the configured storage backend
pub async fn create_store(config: &Config) -> Result<Arc<dyn JobStore>> {
    match config.storage.backend.as_str() {
        "file" => {
            let store = FileJobStore::new(&config.storage.dir)?;
            info!(dir = %config.storage.dir, "using file job storage");
            Ok(Arc::new(store))
        }
        _ => {
            let store = MySqlJobStore::connect(&config.database).await?;
            info!(
                host = %config.database.host,
                database = %config.database.database,
                "using MySQL job storage"
            );
            Ok(Arc::new(store))
        }
    }
}

/// Serialises cache saves and remembers when the last one committed.
///
/// Every component that persists state goes through one `JobSaver`, which
/// guarantees that a save begun at T1 commits before the next begins, and
/// gives the reload throttle its "seconds since last save" signal.
pub struct JobSaver {
    cache: Arc<JobCache>,
    store: Arc<dyn JobStore>,
    save_lock: tokio::sync::Mutex<()>,
    last_save: Mutex<Option<Instant>>,
}

impl JobSaver {
    pub fn new(cache: Arc<JobCache>, store: Arc<dyn JobStore>) -> Self {
        Self {
            cache,
            store,
            save_lock: tokio::sync::Mutex::new(()),
            last_save: Mutex::new(None),
        }
    }

    /// Snapshot the cache and persist it
    pub async fn save(&self) -> Result<()> {
        let _ordered = self.save_lock.lock().await;
        let snapshot = self.cache.snapshot();
        self.store.save(&snapshot).await?;
        *self.last_save.lock().unwrap() = Some(Instant::now());

        let mut completed = 0usize;
        let mut running = 0usize;
        for job in snapshot.values() {
            match job.status {
                JobStatus::Completed => completed += 1,
                JobStatus::Running => running += 1,
                _ => {}
            }
        }
        info!(
            jobs = snapshot.len(),
            completed, running, "saved jobs to storage"
        );
        Ok(())
    }

    /// Seconds since the last successful save, if any
    pub fn seconds_since_save(&self) -> Option<f64> {
        self.last_save
            .lock()
            .unwrap()
            .map(|at| at.elapsed().as_secs_f64())
    }

    /// The underlying store, for reloads
    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobPriority, Platform};
    use chrono::Utc;

    #[tokio::test]
    async fn test_saver_tracks_save_time() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(JobCache::new());
        let store: Arc<dyn JobStore> =
            Arc::new(FileJobStore::new(dir.path().to_str().unwrap()).unwrap());
        let saver = JobSaver::new(Arc::clone(&cache), store);

        assert!(saver.seconds_since_save().is_none());

        cache.insert(Job::new(
            Some("acct".to_string()),
            "hello",
            Utc::now(),
            JobPriority::Normal,
            Platform::Threads,
            3,
            None,
        ));
        saver.save().await.unwrap();

        let since = saver.seconds_since_save().unwrap();
        assert!(since < 2.0);
    }
}
