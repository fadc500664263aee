//! File-based job storage
//!
//! Jobs are partitioned across JSON files named
//! `jobs_YYYY-MM-DD_{status}.json`, keyed by the completion date when one
//! exists, otherwise the scheduled date. Each file is written atomically
//! (temp file, fsync, rename, fsync directory) and a save prunes every file
//! that no longer corresponds to live cache content, so the observable state
//! matches the relational backend's.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{Job, JobStatus};
use crate::storage::JobStore;

/// File-backed implementation of [`JobStore`]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    /// Open (and create, if needed) the storage directory
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::storage(format!("cannot create storage directory: {}", e)))?;
        Ok(Self { dir })
    }
}

/// Partition key for one job: (date, status label)
fn file_key(job: &Job) -> (String, String) {
    if let Some(completed) = job.completed_at {
        // completed_at pins the job to the completed partition
        (completed.format("%Y-%m-%d").to_string(), "completed".to_string())
    } else {
        (
            job.scheduled_time.format("%Y-%m-%d").to_string(),
            job.status.to_string(),
        )
    }
}

fn file_name(date: &str, status: &str) -> String {
    format!("jobs_{}_{}.json", date, status)
}

/// All job files, newest name first
fn list_job_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("jobs_") && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect();

    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    files
}

fn read_file(path: &Path) -> Result<HashMap<String, Job>> {
    let bytes = fs::read(path)
        .map_err(|e| Error::storage(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::storage(format!("cannot parse {}: {}", path.display(), e)))
}

/// Write one partition file atomically: temp file + fsync + rename + fsync
/// of the containing directory.
fn write_file_atomic(dir: &Path, path: &Path, jobs: &HashMap<String, Job>) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(jobs)?;

    {
        use std::io::Write;
        let mut file = fs::File::create(&tmp)
            .map_err(|e| Error::storage(format!("cannot create {}: {}", tmp.display(), e)))?;
        file.write_all(&bytes)
            .map_err(|e| Error::storage(format!("cannot write {}: {}", tmp.display(), e)))?;
        // Some filesystems cannot fsync; the rename still lands eventually
        let _ = file.sync_all();
    }

    fs::rename(&tmp, path)
        .map_err(|e| Error::storage(format!("cannot rename into {}: {}", path.display(), e)))?;

    if let Ok(dir_handle) = fs::File::open(dir) {
        let _ = dir_handle.sync_all();
    }

    Ok(())
}

/// Pick between two records of the same job found in different files.
///
/// `existing` came from a newer file and wins, except that a COMPLETED
/// record always wins: completion is sticky no matter where it was written.
fn resolve_duplicate(existing: &Job, candidate: Job) -> Option<Job> {
    if existing.status == JobStatus::Completed {
        return None;
    }
    if candidate.status == JobStatus::Completed {
        return Some(candidate);
    }
    None
}

fn load_all_sync(dir: &Path) -> Result<HashMap<String, Job>> {
    let mut jobs: HashMap<String, Job> = HashMap::new();

    for path in list_job_files(dir) {
        let file_jobs = match read_file(&path) {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping unreadable job file");
                continue;
            }
        };

        for (job_id, job) in file_jobs {
            match jobs.get(&job_id) {
                Some(existing) => {
                    if let Some(winner) = resolve_duplicate(existing, job) {
                        debug!(job_id, file = %path.display(), "restoring COMPLETED record");
                        jobs.insert(job_id, winner);
                    }
                }
                None => {
                    jobs.insert(job_id, job);
                }
            }
        }
    }

    Ok(jobs)
}

fn save_sync(dir: &Path, jobs: &HashMap<String, Job>) -> Result<()> {
    // Partition the cache by target file
    let mut partitions: HashMap<(String, String), HashMap<String, Job>> = HashMap::new();
    for job in jobs.values() {
        partitions
            .entry(file_key(job))
            .or_default()
            .insert(job.job_id.clone(), job.clone());
    }

    let mut live_files: HashSet<String> = HashSet::with_capacity(partitions.len());
    for ((date, status), partition) in &partitions {
        let name = file_name(date, status);
        write_file_atomic(dir, &dir.join(&name), partition)?;
        live_files.insert(name);
    }

    // Cross-file cleanup: every file that is not a current partition holds
    // only stale records (moved or deleted jobs) and goes away.
    let mut removed = 0usize;
    for path in list_job_files(dir) {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if !live_files.contains(&name) {
            if let Err(e) = fs::remove_file(&path) {
                warn!(file = %path.display(), error = %e, "failed to remove stale job file");
            } else {
                removed += 1;
            }
        }
    }

    // Leftover temp files from interrupted writes
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.ends_with(".json.tmp"))
                .unwrap_or(false)
            {
                let _ = fs::remove_file(&path);
            }
        }
    }

    debug!(
        files = live_files.len(),
        removed, "saved job partitions to disk"
    );
    Ok(())
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn load_all(&self) -> Result<HashMap<String, Job>> {
        let dir = self.dir.clone();
        let jobs = tokio::task::spawn_blocking(move || load_all_sync(&dir))
            .await
            .map_err(|e| Error::storage(format!("load task panicked: {}", e)))??;
        info!(loaded = jobs.len(), "loaded jobs from files");
        Ok(jobs)
    }

    async fn save(&self, jobs: &HashMap<String, Job>) -> Result<()> {
        let dir = self.dir.clone();
        let jobs = jobs.clone();
        tokio::task::spawn_blocking(move || save_sync(&dir, &jobs))
            .await
            .map_err(|e| Error::storage(format!("save task panicked: {}", e)))?
    }

    async fn get_by_id(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.load_all().await?.remove(job_id))
    }

    async fn jobs_by_status(&self, status: JobStatus, limit: Option<u32>) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .load_all()
            .await?
            .into_values()
            .filter(|j| j.status == status)
            .collect();
        jobs.sort_by_key(|j| j.scheduled_time);
        if let Some(limit) = limit {
            jobs.truncate(limit as usize);
        }
        Ok(jobs)
    }

    async fn jobs_by_account(
        &self,
        account_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .load_all()
            .await?
            .into_values()
            .filter(|j| j.account_id.as_deref() == Some(account_id))
            .filter(|j| status.map_or(true, |s| j.status == s))
            .collect();
        jobs.sort_by_key(|j| j.scheduled_time);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobPriority, Platform};
    use chrono::{Duration, Utc};

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

    fn as_map(jobs: Vec<Job>) -> HashMap<String, Job> {
        jobs.into_iter().map(|j| (j.job_id.clone(), j)).collect()
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path()).unwrap();

        let jobs = as_map(vec![
            job_with("a", JobStatus::Scheduled),
            job_with("b", JobStatus::Failed),
        ]);
        store.save(&jobs).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["a"].status, JobStatus::Scheduled);
        assert_eq!(loaded["b"].status, JobStatus::Failed);
        assert_eq!(loaded["a"].content, "content a");
    }

    #[tokio::test]
    async fn test_partition_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path()).unwrap();

        let mut done = job_with("done", JobStatus::Completed);
        done.completed_at = Some(Utc::now());
        let pending = job_with("todo", JobStatus::Scheduled);
        store
            .save(&as_map(vec![done.clone(), pending.clone()]))
            .await
            .unwrap();

        let names: Vec<String> = list_job_files(dir.path())
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert!(names.contains(&format!("jobs_{}_completed.json", today)));
        assert!(names.contains(&format!("jobs_{}_scheduled.json", today)));
    }

    #[tokio::test]
    async fn test_completed_date_keys_the_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path()).unwrap();

        let mut done = job_with("done", JobStatus::Completed);
        done.scheduled_time = Utc::now() - Duration::days(3);
        done.completed_at = Some(Utc::now());
        store.save(&as_map(vec![done])).await.unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let names: Vec<String> = list_job_files(dir.path())
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec![format!("jobs_{}_completed.json", today)]);
    }

    #[tokio::test]
    async fn test_status_change_moves_record_between_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path()).unwrap();

        let mut job = job_with("a", JobStatus::Scheduled);
        store.save(&as_map(vec![job.clone()])).await.unwrap();

        job.status = JobStatus::Completed;
        job.completed_at = Some(Utc::now());
        store.save(&as_map(vec![job])).await.unwrap();

        // The old scheduled partition is gone; only one record remains
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["a"].status, JobStatus::Completed);
        assert_eq!(list_job_files(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_save_deletes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path()).unwrap();

        store
            .save(&as_map(vec![job_with("a", JobStatus::Scheduled)]))
            .await
            .unwrap();
        assert_eq!(store.load_all().await.unwrap().len(), 1);

        store.save(&HashMap::new()).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
        assert!(list_job_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_completed_record_wins_duplicate_resolution() {
        let dir = tempfile::tempdir().unwrap();

        // Hand-write two partitions carrying the same job id
        let scheduled = as_map(vec![job_with("dup", JobStatus::Scheduled)]);
        let mut completed_job = job_with("dup", JobStatus::Completed);
        completed_job.completed_at = Some(Utc::now());
        let completed = as_map(vec![completed_job]);

        write_file_atomic(
            dir.path(),
            &dir.path().join("jobs_2099-01-02_scheduled.json"),
            &scheduled,
        )
        .unwrap();
        write_file_atomic(
            dir.path(),
            &dir.path().join("jobs_2099-01-01_completed.json"),
            &completed,
        )
        .unwrap();

        let store = FileJobStore::new(dir.path()).unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["dup"].status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_query_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::new(dir.path()).unwrap();

        let mut other = job_with("other", JobStatus::Scheduled);
        other.account_id = Some("someone-else".to_string());
        store
            .save(&as_map(vec![
                job_with("a", JobStatus::Scheduled),
                job_with("b", JobStatus::Failed),
                other,
            ]))
            .await
            .unwrap();

        assert!(store.get_by_id("a").await.unwrap().is_some());
        assert!(store.get_by_id("missing").await.unwrap().is_none());

        let scheduled = store
            .jobs_by_status(JobStatus::Scheduled, None)
            .await
            .unwrap();
        assert_eq!(scheduled.len(), 2);

        let acct = store.jobs_by_account("acct", None).await.unwrap();
        assert_eq!(acct.len(), 2);
        let acct_failed = store
            .jobs_by_account("acct", Some(JobStatus::Failed))
            .await
            .unwrap();
        assert_eq!(acct_failed.len(), 1);
    }
}
