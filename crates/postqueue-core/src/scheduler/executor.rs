//! The scheduler loop
//!
//! A single background task owns dispatch: pick the best ready job, run the
//! platform callback, apply the outcome, persist, emit events. Strictly one
//! job RUNNING at a time; `add`/`remove` are the only cache mutations that
//! happen elsewhere, serialised by the facade.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::JobCache;
use crate::config::SchedulerConfig;
use crate::models::{Job, JobStatus, Platform, PostResult};
use crate::sanitize::content_digest;
use crate::scheduler::manager::JobManager;
use crate::scheduler::recovery::JobRecovery;
use crate::storage::JobSaver;
use crate::websocket::{FanOutHub, EVENT_JOB_COMPLETED, EVENT_JOB_UPDATED};

/// The external post executor, resolved per platform.
///
/// Implementations must not panic; report problems through the returned
/// [`PostResult`]. A result with `ok == false` (or `shadow_fail == true`) is
/// retryable until the job's budget runs out.
#[async_trait]
pub trait PostCallback: Send + Sync {
    async fn post(&self, account_id: &str, content: &str, link_aff: Option<&str>) -> PostResult;
}

/// Resolves the callback for a platform at dispatch time
pub type PostCallbackFactory = Arc<dyn Fn(Platform) -> Arc<dyn PostCallback> + Send + Sync>;

/// Callback that logs the dispatch and reports success without touching any
/// platform. Used by the development server and the CLI.
#[derive(Debug, Default)]
pub struct DryRunPostCallback;

#[async_trait]
impl PostCallback for DryRunPostCallback {
    async fn post(&self, account_id: &str, content: &str, _link_aff: Option<&str>) -> PostResult {
        info!(
            account_id,
            content = %content_digest(content),
            "dry-run dispatch, reporting success"
        );
        PostResult::success(format!("dry-run-{}", Uuid::new_v4()))
    }
}

/// The cooperative single-writer executor
pub struct JobExecutor {
    cache: Arc<JobCache>,
    manager: Arc<JobManager>,
    recovery: JobRecovery,
    saver: Arc<JobSaver>,
    hub: Arc<FanOutHub>,
    settings: SchedulerConfig,
}

impl JobExecutor {
    pub fn new(
        cache: Arc<JobCache>,
        manager: Arc<JobManager>,
        recovery: JobRecovery,
        saver: Arc<JobSaver>,
        hub: Arc<FanOutHub>,
        settings: SchedulerConfig,
    ) -> Self {
        Self {
            cache,
            manager,
            recovery,
            saver,
            hub,
            settings,
        }
    }

    /// Run until the shutdown signal flips. Ends with a final save.
    pub async fn run(self: Arc<Self>, factory: PostCallbackFactory, mut shutdown: watch::Receiver<bool>) {
        info!(
            check_interval_secs = self.settings.check_interval_secs,
            reload_interval_secs = self.settings.reload_interval_secs,
            max_running_minutes = self.settings.max_running_minutes,
            "scheduler loop started"
        );

        let mut last_reload = Instant::now();

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.maybe_reload(&mut last_reload).await;

            let expired = self.manager.cleanup_expired(&self.saver).await;
            if expired > 0 {
                debug!(expired, "expiry sweep marked jobs");
            }

            let recovered = self
                .recovery
                .recover_stuck(&self.cache, self.settings.max_running_minutes);
            if recovered > 0 {
                if let Err(e) = self.saver.save().await {
                    warn!(error = %e, "failed to save after stuck recovery");
                }
            }

            let dispatched = match self.manager.ready_jobs().into_iter().next() {
                Some(job) => {
                    self.dispatch(job, &factory).await;
                    true
                }
                None => false,
            };

            if dispatched
                && wait_or_shutdown(
                    &mut shutdown,
                    StdDuration::from_secs(self.settings.post_processing_delay_secs),
                )
                .await
            {
                break;
            }
            if wait_or_shutdown(
                &mut shutdown,
                StdDuration::from_secs(self.settings.check_interval_secs),
            )
            .await
            {
                break;
            }
        }

        if let Err(e) = self.saver.save().await {
            error!(error = %e, "final save on shutdown failed");
        }
        info!("scheduler loop stopped");
    }

    /// Reload from storage when both the save quiet-period and the reload
    /// interval have elapsed. Non-forced: live cache state wins per the
    /// merge policy.
    async fn maybe_reload(&self, last_reload: &mut Instant) {
        let quiet_ok = self
            .saver
            .seconds_since_save()
            .map_or(true, |s| s >= self.settings.reload_check_delay_secs as f64);
        let interval_ok =
            last_reload.elapsed().as_secs() >= self.settings.reload_interval_secs;

        if !(quiet_ok && interval_ok) {
            return;
        }

        match self.saver.store().load_all().await {
            Ok(loaded) => {
                self.cache.merge_from_storage(loaded, false);
                *last_reload = Instant::now();
            }
            Err(e) => warn!(error = %e, "in-loop reload failed"),
        }
    }

    /// Run one job through the callback and apply the outcome.
    pub(crate) async fn dispatch(&self, job: Job, factory: &PostCallbackFactory) {
        let job_id = job.job_id.clone();
        let started = Utc::now();

        let marked = self.cache.update(&job_id, |j| {
            j.status = JobStatus::Running;
            j.started_at = Some(started);
            j.status_message = Some("Running - posting in progress".to_string());
        });
        if !marked {
            warn!(%job_id, "ready job vanished before dispatch");
            return;
        }
        if let Err(e) = self.saver.save().await {
            warn!(%job_id, error = %e, "failed to persist RUNNING transition");
        }
        self.emit(EVENT_JOB_UPDATED, &job_id);

        info!(
            %job_id,
            account_id = job.account_id.as_deref().unwrap_or("-"),
            platform = %job.platform,
            content = %content_digest(&job.content),
            "dispatching job"
        );

        let callback = factory(job.platform);
        let account = job.account_id.clone().unwrap_or_default();
        let result = callback
            .post(&account, &job.content, job.link_aff.as_deref())
            .await;

        let finished = Utc::now();
        if result.is_success() {
            let thread_id = result.thread_id.clone();
            self.cache.update(&job_id, |j| {
                j.status = JobStatus::Completed;
                j.completed_at = Some(finished);
                j.thread_id = thread_id.clone();
                j.error = None;
                j.status_message = Some(format!(
                    "Completed - thread id {}",
                    thread_id.as_deref().unwrap_or("N/A")
                ));
            });
            if let Err(e) = self.saver.save().await {
                warn!(%job_id, error = %e, "failed to persist COMPLETED transition");
            }
            self.emit(EVENT_JOB_COMPLETED, &job_id);
            info!(
                %job_id,
                thread_id = result.thread_id.as_deref().unwrap_or("-"),
                "job completed"
            );
        } else {
            let reason = result.error.clone().unwrap_or_else(|| {
                if result.shadow_fail {
                    "post did not appear (shadow failure)".to_string()
                } else {
                    "post callback reported failure".to_string()
                }
            });

            let can_retry = self
                .cache
                .get(&job_id)
                .map(|j| j.can_retry())
                .unwrap_or(false);

            if can_retry {
                self.cache.update(&job_id, |j| {
                    j.retry_count += 1;
                    let backoff_minutes = 2i64.pow(j.retry_count.min(30));
                    j.status = JobStatus::Scheduled;
                    j.scheduled_time = finished + Duration::minutes(backoff_minutes);
                    j.started_at = None;
                    j.error = Some(reason.clone());
                    j.status_message = Some(format!(
                        "Retry {}/{} in {} min: {}",
                        j.retry_count, j.max_retries, backoff_minutes, reason
                    ));
                });
                warn!(%job_id, error = %reason, "job failed, retry scheduled");
            } else {
                self.cache.update(&job_id, |j| {
                    j.status = JobStatus::Failed;
                    j.started_at = None;
                    j.error = Some(reason.clone());
                    j.status_message = Some(format!("Failed - {}", reason));
                });
                warn!(%job_id, error = %reason, "job failed, retries exhausted");
            }

            if let Err(e) = self.saver.save().await {
                warn!(%job_id, error = %e, "failed to persist failure transition");
            }
            self.emit(EVENT_JOB_UPDATED, &job_id);
        }
    }

    /// Best-effort event emission; delivery failures never touch job state.
    fn emit(&self, event: &str, job_id: &str) {
        if let Some(job) = self.cache.get(job_id) {
            self.hub.broadcast_job_event(event, &job);
        }
    }
}

/// Sleep, waking early on shutdown. Returns true when the loop should exit.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: StdDuration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        changed = shutdown.changed() => match changed {
            Ok(()) => *shutdown.borrow(),
            Err(_) => true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobPriority;
    use crate::storage::{FileJobStore, JobStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedCallback {
        calls: AtomicUsize,
        results: Vec<PostResult>,
    }

    impl ScriptedCallback {
        fn new(results: Vec<PostResult>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                results,
            })
        }
    }

    #[async_trait]
    impl PostCallback for ScriptedCallback {
        async fn post(&self, _account: &str, _content: &str, _link: Option<&str>) -> PostResult {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .get(call)
                .cloned()
                .unwrap_or_else(|| PostResult::failure("script exhausted"))
        }
    }

    fn factory_of(callback: Arc<ScriptedCallback>) -> PostCallbackFactory {
        Arc::new(move |_platform| callback.clone() as Arc<dyn PostCallback>)
    }

    struct Rig {
        cache: Arc<JobCache>,
        executor: Arc<JobExecutor>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(JobCache::new());
        let store: Arc<dyn JobStore> = Arc::new(FileJobStore::new(dir.path()).unwrap());
        let saver = Arc::new(JobSaver::new(Arc::clone(&cache), store));
        let manager = Arc::new(JobManager::new(Arc::clone(&cache), None));
        let hub = Arc::new(FanOutHub::new());
        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&cache),
            manager,
            JobRecovery::new(),
            saver,
            hub,
            SchedulerConfig::default(),
        ));
        Rig {
            cache,
            executor,
            _dir: dir,
        }
    }

    fn ready_job(id: &str) -> Job {
        let mut job = Job::new(
            Some("acct".to_string()),
            format!("content {}", id),
            Utc::now() - Duration::seconds(5),
            JobPriority::Normal,
            Platform::Threads,
            3,
            None,
        );
        job.job_id = id.to_string();
        job
    }

    #[tokio::test]
    async fn test_dispatch_success_completes_job() {
        let rig = rig();
        rig.cache.insert(ready_job("a"));

        let callback = ScriptedCallback::new(vec![PostResult::success("T1")]);
        rig.executor
            .dispatch(rig.cache.get("a").unwrap(), &factory_of(callback))
            .await;

        let job = rig.cache.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.thread_id.as_deref(), Some("T1"));
        assert!(job.completed_at.is_some());
        assert!(job.started_at.is_some());
        assert!(job.completed_at.unwrap() >= job.started_at.unwrap());
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn test_dispatch_transient_failure_schedules_retry() {
        let rig = rig();
        rig.cache.insert(ready_job("a"));

        let callback = ScriptedCallback::new(vec![PostResult::failure("network")]);
        rig.executor
            .dispatch(rig.cache.get("a").unwrap(), &factory_of(callback))
            .await;

        let job = rig.cache.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.retry_count, 1);
        assert!(job.started_at.is_none());
        assert_eq!(job.error.as_deref(), Some("network"));

        // Backoff: 2^1 minutes from now
        let delta = (job.scheduled_time - Utc::now()).num_seconds();
        assert!((110..=130).contains(&delta), "delta was {delta}s");
    }

    #[tokio::test]
    async fn test_dispatch_hard_failure_after_budget() {
        let rig = rig();
        let mut job = ready_job("a");
        job.max_retries = 0;
        rig.cache.insert(job);

        let callback = ScriptedCallback::new(vec![PostResult::failure("boom")]);
        rig.executor
            .dispatch(rig.cache.get("a").unwrap(), &factory_of(callback))
            .await;

        let job = rig.cache.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn test_shadow_fail_counts_as_failure() {
        let rig = rig();
        rig.cache.insert(ready_job("a"));

        let mut result = PostResult::success("T-ghost");
        result.shadow_fail = true;
        let callback = ScriptedCallback::new(vec![result]);
        rig.executor
            .dispatch(rig.cache.get("a").unwrap(), &factory_of(callback))
            .await;

        let job = rig.cache.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.retry_count, 1);
        assert!(job
            .error
            .as_deref()
            .unwrap()
            .contains("did not appear"));
    }

    #[tokio::test]
    async fn test_retry_then_success_keeps_retry_count() {
        let rig = rig();
        rig.cache.insert(ready_job("a"));

        let callback = ScriptedCallback::new(vec![
            PostResult::failure("network"),
            PostResult::success("T2"),
        ]);
        let factory = factory_of(callback);

        rig.executor
            .dispatch(rig.cache.get("a").unwrap(), &factory)
            .await;

        // Pretend the backoff elapsed
        rig.cache
            .update("a", |j| j.scheduled_time = Utc::now() - Duration::seconds(1));

        rig.executor
            .dispatch(rig.cache.get("a").unwrap(), &factory)
            .await;

        let job = rig.cache.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.thread_id.as_deref(), Some("T2"));
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test]
    async fn test_wait_or_shutdown_wakes_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            wait_or_shutdown(&mut rx, StdDuration::from_secs(60)).await
        });
        tx.send(true).unwrap();
        let exited = tokio::time::timeout(StdDuration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(exited);
    }
}
