//! Crash and stuck-job recovery
//!
//! A RUNNING job that survived a crash (or outlived its dispatch) is either
//! rescheduled with exponential backoff or failed when its retry budget is
//! spent. Callers persist after every recovery pass.

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::cache::JobCache;
use crate::models::{Job, JobStatus};

/// Recovery manager for RUNNING jobs
#[derive(Debug, Default, Clone)]
pub struct JobRecovery;

impl JobRecovery {
    pub fn new() -> Self {
        Self
    }

    /// Recover every RUNNING job. Called once at facade construction, before
    /// the first tick: after a crash no dispatch can still be in flight.
    pub fn recover_all_running(&self, cache: &JobCache) -> usize {
        let recovered = cache.with_map(|map| {
            let mut recovered = 0usize;
            for job in map.values_mut() {
                if job.status != JobStatus::Running {
                    continue;
                }
                recover_one(job, "stuck at start-up");
                recovered += 1;
            }
            recovered
        });

        if recovered > 0 {
            info!(recovered, "recovered running jobs at start-up");
        }
        recovered
    }

    /// Recover RUNNING jobs that exceeded `max_running_minutes`. A RUNNING
    /// job with no started_at is stuck the moment it is seen.
    pub fn recover_stuck(&self, cache: &JobCache, max_running_minutes: i64) -> usize {
        let now = Utc::now();
        let recovered = cache.with_map(|map| {
            let mut recovered = 0usize;
            for job in map.values_mut() {
                if !job.is_stuck_at(max_running_minutes, now) {
                    continue;
                }
                recover_one(job, "stuck while running");
                recovered += 1;
            }
            recovered
        });

        if recovered > 0 {
            info!(
                recovered,
                max_running_minutes, "recovered stuck jobs"
            );
        }
        recovered
    }
}

/// Reset one RUNNING job: reschedule with backoff while retries remain,
/// otherwise fail it.
fn recover_one(job: &mut Job, context: &str) {
    let running_minutes = job
        .started_at
        .map(|started| (Utc::now() - started).num_minutes().max(0))
        .unwrap_or(0);

    if job.can_retry() {
        job.retry_count += 1;
        let backoff_minutes = 2i64.pow(job.retry_count.min(30));
        job.status = JobStatus::Scheduled;
        job.scheduled_time = Utc::now() + Duration::minutes(backoff_minutes);
        job.started_at = None;
        job.status_message = Some(format!(
            "Recovered from {} (ran {} min), retrying in {} min (attempt {}/{})",
            context, running_minutes, backoff_minutes, job.retry_count, job.max_retries
        ));
        info!(
            job_id = %job.job_id,
            retry_count = job.retry_count,
            backoff_minutes,
            running_minutes,
            context,
            "job rescheduled after recovery"
        );
    } else {
        job.status = JobStatus::Failed;
        job.started_at = None;
        job.error = Some(format!(
            "Job {} {} min, retries exhausted ({}/{})",
            context, running_minutes, job.retry_count, job.max_retries
        ));
        job.status_message = Some(format!("Failed - {}", job.error.as_deref().unwrap_or("")));
        warn!(
            job_id = %job.job_id,
            retry_count = job.retry_count,
            running_minutes,
            context,
            "job failed during recovery, retries exhausted"
        );
    }
}
