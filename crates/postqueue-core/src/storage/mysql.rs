//! MySQL job storage
//!
//! One `jobs` table keyed by `job_id`, utf8mb4 so content can carry the full
//! emoji range. Every save runs as a single transaction: upsert all cache
//! rows, delete rows absent from the cache, commit.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use tracing::{info, warn};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Job, JobPriority, JobStatus, Platform};
use crate::storage::JobStore;

const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id         VARCHAR(36)  NOT NULL PRIMARY KEY,
    account_id     VARCHAR(100) NULL,
    content        TEXT         NOT NULL,
    scheduled_time DATETIME(6)  NOT NULL,
    priority       INT          NOT NULL DEFAULT 2,
    status         VARCHAR(20)  NOT NULL DEFAULT 'scheduled',
    platform       VARCHAR(20)  NOT NULL DEFAULT 'threads',
    max_retries    INT          NOT NULL DEFAULT 3,
    retry_count    INT          NOT NULL DEFAULT 0,
    created_at     DATETIME(6)  NULL,
    started_at     DATETIME(6)  NULL,
    completed_at   DATETIME(6)  NULL,
    error          TEXT         NULL,
    thread_id      VARCHAR(100) NULL,
    status_message TEXT         NULL,
    link_aff       TEXT         NULL,
    KEY idx_jobs_status (status),
    KEY idx_jobs_account_status (account_id, status),
    KEY idx_jobs_scheduled_time (scheduled_time)
) CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci
"#;

const SELECT_COLUMNS: &str = "job_id, account_id, content, scheduled_time, priority, status, \
     platform, max_retries, retry_count, created_at, started_at, completed_at, \
     error, thread_id, status_message, link_aff";

const UPSERT_JOB: &str = r#"
INSERT INTO jobs (
    job_id, account_id, content, scheduled_time, priority, status,
    platform, max_retries, retry_count, created_at, started_at,
    completed_at, error, thread_id, status_message, link_aff
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON DUPLICATE KEY UPDATE
    account_id = VALUES(account_id),
    content = VALUES(content),
    scheduled_time = VALUES(scheduled_time),
    priority = VALUES(priority),
    status = VALUES(status),
    platform = VALUES(platform),
    max_retries = VALUES(max_retries),
    retry_count = VALUES(retry_count),
    started_at = VALUES(started_at),
    completed_at = VALUES(completed_at),
    error = VALUES(error),
    thread_id = VALUES(thread_id),
    status_message = VALUES(status_message),
    link_aff = VALUES(link_aff)
"#;

/// MySQL implementation of [`JobStore`]
pub struct MySqlJobStore {
    pool: MySqlPool,
}

impl MySqlJobStore {
    /// Connect to MySQL and make sure the schema exists
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url())
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;

        info!(
            host = %config.host,
            database = %config.database,
            pool_size = config.pool_size,
            "connected MySQL job storage"
        );
        Ok(store)
    }

    /// Wrap an existing pool (used by tests and embedders)
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Create the jobs table when missing
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(CREATE_JOBS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_job(row: &MySqlRow) -> std::result::Result<Job, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let platform: String = row.try_get("platform")?;
        let priority: i32 = row.try_get("priority")?;
        let scheduled_time: NaiveDateTime = row.try_get("scheduled_time")?;

        Ok(Job {
            job_id: row.try_get("job_id")?,
            account_id: row.try_get("account_id")?,
            content: row.try_get("content")?,
            scheduled_time: utc(scheduled_time),
            priority: JobPriority::from_i32(priority),
            // Unknown statuses load as SCHEDULED rather than poisoning the row
            status: JobStatus::parse(&status).unwrap_or_default(),
            platform: Platform::parse(&platform).unwrap_or_default(),
            max_retries: row.try_get::<i32, _>("max_retries")?.max(0) as u32,
            retry_count: row.try_get::<i32, _>("retry_count")?.max(0) as u32,
            created_at: row
                .try_get::<Option<NaiveDateTime>, _>("created_at")?
                .map(utc),
            started_at: row
                .try_get::<Option<NaiveDateTime>, _>("started_at")?
                .map(utc),
            completed_at: row
                .try_get::<Option<NaiveDateTime>, _>("completed_at")?
                .map(utc),
            error: row.try_get("error")?,
            thread_id: row.try_get("thread_id")?,
            status_message: row.try_get("status_message")?,
            link_aff: row.try_get("link_aff")?,
        })
    }

    fn bind_job<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
        job: &'q Job,
    ) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
        query
            .bind(&job.job_id)
            .bind(&job.account_id)
            .bind(&job.content)
            .bind(job.scheduled_time.naive_utc())
            .bind(job.priority.as_i32())
            .bind(job.status.to_string())
            .bind(job.platform.to_string())
            .bind(job.max_retries as i32)
            .bind(job.retry_count as i32)
            .bind(job.created_at.map(|d| d.naive_utc()))
            .bind(job.started_at.map(|d| d.naive_utc()))
            .bind(job.completed_at.map(|d| d.naive_utc()))
            .bind(&job.error)
            .bind(&job.thread_id)
            .bind(&job.status_message)
            .bind(&job.link_aff)
    }
}

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&naive)
}

#[async_trait]
impl JobStore for MySqlJobStore {
    async fn load_all(&self) -> Result<HashMap<String, Job>> {
        let sql = format!(
            "SELECT {} FROM jobs ORDER BY scheduled_time ASC",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut jobs = HashMap::with_capacity(rows.len());
        let mut failed = 0usize;
        for row in &rows {
            match Self::row_to_job(row) {
                Ok(job) => {
                    jobs.insert(job.job_id.clone(), job);
                }
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "skipping unparseable job row");
                }
            }
        }

        info!(loaded = jobs.len(), failed, "loaded jobs from MySQL");
        Ok(jobs)
    }

    async fn save(&self, jobs: &HashMap<String, Job>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for job in jobs.values() {
            Self::bind_job(sqlx::query(UPSERT_JOB), job)
                .execute(&mut *tx)
                .await?;
        }

        // Prune rows that are no longer in the cache; an empty cache clears
        // the table entirely.
        let deleted = if jobs.is_empty() {
            sqlx::query("DELETE FROM jobs")
                .execute(&mut *tx)
                .await?
                .rows_affected()
        } else {
            let placeholders = vec!["?"; jobs.len()].join(",");
            let sql = format!("DELETE FROM jobs WHERE job_id NOT IN ({})", placeholders);
            let mut query = sqlx::query(&sql);
            for job_id in jobs.keys() {
                query = query.bind(job_id);
            }
            query.execute(&mut *tx).await?.rows_affected()
        };

        tx.commit().await?;

        if deleted > 0 {
            info!(deleted, "pruned jobs no longer in cache");
        }
        Ok(())
    }

    async fn get_by_id(&self, job_id: &str) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE job_id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn jobs_by_status(&self, status: JobStatus, limit: Option<u32>) -> Result<Vec<Job>> {
        let mut sql = format!(
            "SELECT {} FROM jobs WHERE status = ? ORDER BY scheduled_time ASC",
            SELECT_COLUMNS
        );
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql).bind(status.to_string());
        if let Some(limit) = limit {
            query = query.bind(limit);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_job(row) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(error = %e, "skipping unparseable job row"),
            }
        }
        Ok(jobs)
    }

    async fn jobs_by_account(
        &self,
        account_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>> {
        let mut sql = format!(
            "SELECT {} FROM jobs WHERE account_id = ?",
            SELECT_COLUMNS
        );
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY scheduled_time ASC");

        let mut query = sqlx::query(&sql).bind(account_id);
        if let Some(status) = status {
            query = query.bind(status.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::row_to_job(row) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(error = %e, "skipping unparseable job row"),
            }
        }
        Ok(jobs)
    }
}
