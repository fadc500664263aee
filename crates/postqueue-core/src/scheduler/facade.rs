//! Scheduler facade
//!
//! Composes cache, storage, manager, recovery, executor and fan-out behind
//! one surface. Exactly one facade exists per process; construction loads
//! the durable state, recovers orphaned RUNNING jobs and persists the
//! result before the first tick can fire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{watch, OnceCell};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::cache::JobCache;
use crate::config::{Config, SchedulerConfig};
use crate::error::Result;
use crate::models::{Job, JobStatus};
use crate::scheduler::executor::{JobExecutor, PostCallbackFactory};
use crate::scheduler::manager::{JobManager, NewJob};
use crate::scheduler::recovery::JobRecovery;
use crate::storage::{create_store, JobSaver, JobStore};
use crate::websocket::{FanOutHub, EVENT_JOB_CREATED};

/// Reload throttle: a non-forced reload this soon after a save is a no-op
const RELOAD_QUIET_PERIOD_SECS: f64 = 2.0;

static GLOBAL: OnceCell<Arc<Scheduler>> = OnceCell::const_new();

/// Snapshot of the facade's lifecycle state
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub active_jobs_count: usize,
}

/// The one scheduler per process
pub struct Scheduler {
    settings: SchedulerConfig,
    cache: Arc<JobCache>,
    saver: Arc<JobSaver>,
    manager: Arc<JobManager>,
    recovery: JobRecovery,
    hub: Arc<FanOutHub>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Build a scheduler from configuration: create the storage backend,
    /// load, recover, save.
    pub async fn new(config: &Config, hub: Arc<FanOutHub>) -> Result<Arc<Self>> {
        let store = create_store(config).await?;
        Self::with_store(config.scheduler.clone(), store, hub).await
    }

    /// Build a scheduler on an existing store (tests, embedders)
    pub async fn with_store(
        settings: SchedulerConfig,
        store: Arc<dyn JobStore>,
        hub: Arc<FanOutHub>,
    ) -> Result<Arc<Self>> {
        let cache = Arc::new(JobCache::new());

        // Populate the cache first so every component sees the same state
        match store.load_all().await {
            Ok(loaded) => {
                cache.merge_from_storage(loaded, false);
            }
            Err(e) => {
                warn!(error = %e, "initial job load failed, starting empty");
            }
        }

        let saver = Arc::new(JobSaver::new(Arc::clone(&cache), store));
        let manager = Arc::new(JobManager::new(
            Arc::clone(&cache),
            settings.overdue_threshold_hours,
        ));
        let recovery = JobRecovery::new();

        // Any RUNNING job at this point is an orphan from a previous run
        if recovery.recover_all_running(&cache) > 0 {
            if let Err(e) = saver.save().await {
                warn!(error = %e, "failed to save after start-up recovery");
            }
        }

        let (shutdown_tx, _) = watch::channel(false);

        info!(jobs = cache.len(), "scheduler initialised");
        Ok(Arc::new(Self {
            settings,
            cache,
            saver,
            manager,
            recovery,
            hub,
            running: AtomicBool::new(false),
            shutdown_tx,
            task: Mutex::new(None),
        }))
    }

    /// Process-wide singleton; the first caller constructs, everyone else
    /// observes the same instance.
    pub async fn global(config: &Config, hub: Arc<FanOutHub>) -> Result<Arc<Self>> {
        GLOBAL
            .get_or_try_init(|| Scheduler::new(config, hub))
            .await
            .cloned()
    }

    /// Launch the executor task. Idempotent: repeated calls while running
    /// are no-ops.
    pub fn start(self: &Arc<Self>, factory: PostCallbackFactory) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("scheduler already running");
            return;
        }
        // send_replace: the flag must reset even while no receiver exists yet
        self.shutdown_tx.send_replace(false);

        let executor = Arc::new(JobExecutor::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.manager),
            self.recovery.clone(),
            Arc::clone(&self.saver),
            Arc::clone(&self.hub),
            self.settings.clone(),
        ));
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(executor.run(factory, shutdown_rx));
        *self.task.lock().unwrap() = Some(handle);

        self.hub
            .broadcast_scheduler_status(true, self.cache.active_count());
        info!(jobs = self.cache.len(), "scheduler started");
    }

    /// Signal the loop, await its exit, save. Idempotent.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        let handle = self.task.lock().unwrap().take();

        if !was_running && handle.is_none() {
            info!("scheduler already stopped");
            return;
        }

        self.shutdown_tx.send_replace(true);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler task ended abnormally");
            }
        }

        if let Err(e) = self.saver.save().await {
            warn!(error = %e, "failed to save jobs on stop");
        }

        self.hub
            .broadcast_scheduler_status(false, self.cache.active_count());
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Lifecycle snapshot for the status endpoint
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.is_running(),
            active_jobs_count: self.cache.active_count(),
        }
    }

    /// Add a job and announce it
    pub async fn add_job(&self, new: NewJob) -> Result<String> {
        let job_id = self.manager.add_job(new, &self.saver).await?;
        if let Some(job) = self.cache.get(&job_id) {
            self.hub.broadcast_job_event(EVENT_JOB_CREATED, &job);
        }
        Ok(job_id)
    }

    /// Remove a job; the save's prune step deletes it durably
    pub async fn remove_job(&self, job_id: &str) -> Result<bool> {
        self.manager.remove_job(job_id, &self.saver).await
    }

    /// Filtered listing, sorted by (priority desc, scheduled time desc)
    pub fn list_jobs(&self, account_id: Option<&str>, status: Option<JobStatus>) -> Vec<Job> {
        self.manager.list_jobs(account_id, status)
    }

    /// Fetch one job from the live cache
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.cache.get(job_id)
    }

    /// Jobs in PENDING, SCHEDULED or RUNNING
    pub fn get_active_jobs(&self) -> Vec<Job> {
        self.list_jobs(None, None)
            .into_iter()
            .filter(|j| j.status.is_active())
            .collect()
    }

    /// Mark idle jobs past the 24 h window as EXPIRED
    pub async fn cleanup_expired(&self) -> usize {
        self.manager.cleanup_expired(&self.saver).await
    }

    /// Recover RUNNING jobs that exceeded the running budget
    pub async fn recover_stuck_jobs(&self) -> usize {
        let recovered = self
            .recovery
            .recover_stuck(&self.cache, self.settings.max_running_minutes);
        if recovered > 0 {
            if let Err(e) = self.saver.save().await {
                warn!(error = %e, "failed to save after stuck recovery");
            }
        }
        recovered
    }

    /// Reload jobs from storage, merging against live state.
    ///
    /// Non-forced reloads within the quiet period of a save are no-ops to
    /// keep admin refreshes from racing the writer. Forced reloads drop
    /// cache-only jobs that are not RUNNING, so external deletions land.
    pub async fn reload_jobs(&self, force: bool) -> Result<()> {
        if !force {
            if let Some(since) = self.saver.seconds_since_save() {
                if since < RELOAD_QUIET_PERIOD_SECS {
                    info!(
                        seconds_since_save = since,
                        "reload skipped, a save just happened"
                    );
                    return Ok(());
                }
            }
        }

        let loaded = self.saver.store().load_all().await?;
        self.cache.merge_from_storage(loaded, force);
        Ok(())
    }

    /// Per-job state issues, for the doctor path
    pub fn validate_all_jobs(&self) -> std::collections::HashMap<String, Vec<String>> {
        self.manager.validate_all_jobs()
    }

    /// The fan-out hub this scheduler publishes to
    pub fn hub(&self) -> Arc<FanOutHub> {
        Arc::clone(&self.hub)
    }
}
