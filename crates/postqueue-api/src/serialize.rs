//! Job serialization for UI clients
//!
//! Datetimes are rendered in the display timezone (UTC+7), error text is
//! sanitized, and RUNNING jobs carry a live duration block.

use chrono::Utc;
use serde::Serialize;

use postqueue_core::models::{Job, JobStatus};
use postqueue_core::sanitize::sanitize_error;
use postqueue_core::timeutil::{format_vn, format_vn_opt};

const PREVIEW_LENGTH: usize = 100;

#[derive(Debug, Serialize)]
pub struct RunningDuration {
    pub total_seconds: i64,
    pub minutes: i64,
    pub formatted: String,
}

/// Wire representation of a job for the HTTP API
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub account_id: Option<String>,
    pub content: String,
    pub content_preview: String,
    pub scheduled_time: String,
    pub scheduled_time_iso: String,
    pub status: String,
    pub priority: String,
    pub platform: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub thread_id: Option<String>,
    pub status_message: Option<String>,
    pub link_aff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_duration: Option<RunningDuration>,
}

impl JobView {
    pub fn from_job(job: &Job) -> Self {
        let content_preview = if job.content.chars().count() > PREVIEW_LENGTH {
            let truncated: String = job.content.chars().take(PREVIEW_LENGTH).collect();
            format!("{}...", truncated)
        } else {
            job.content.clone()
        };

        let running_duration = match (job.status, job.started_at) {
            (JobStatus::Running, Some(started)) => {
                let secs = (Utc::now() - started).num_seconds().max(0);
                Some(RunningDuration {
                    total_seconds: secs,
                    minutes: secs / 60,
                    formatted: format!("{}m {}s", secs / 60, secs % 60),
                })
            }
            _ => None,
        };

        Self {
            job_id: job.job_id.clone(),
            account_id: job.account_id.clone(),
            content: job.content.clone(),
            content_preview,
            scheduled_time: format_vn(job.scheduled_time),
            scheduled_time_iso: job.scheduled_time.to_rfc3339(),
            status: job.status.to_string(),
            priority: job.priority.to_string(),
            platform: job.platform.to_string(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            created_at: format_vn_opt(job.created_at),
            started_at: format_vn_opt(job.started_at),
            completed_at: format_vn_opt(job.completed_at),
            error: job.error.as_deref().map(sanitize_error),
            thread_id: job.thread_id.clone(),
            status_message: job.status_message.clone(),
            link_aff: job.link_aff.clone(),
            running_duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use postqueue_core::models::{JobPriority, Platform};

    fn sample() -> Job {
        Job::new(
            Some("acct".to_string()),
            "hello world",
            Utc::now(),
            JobPriority::High,
            Platform::Threads,
            3,
            None,
        )
    }

    #[test]
    fn test_view_basics() {
        let view = JobView::from_job(&sample());
        assert_eq!(view.status, "scheduled");
        assert_eq!(view.priority, "high");
        assert_eq!(view.platform, "threads");
        assert_eq!(view.content_preview, "hello world");
        assert!(view.running_duration.is_none());
    }

    #[test]
    fn test_long_content_gets_preview() {
        let mut job = sample();
        job.content = "x".repeat(150);
        let view = JobView::from_job(&job);
        assert_eq!(view.content.len(), 150);
        assert_eq!(view.content_preview.len(), 103);
        assert!(view.content_preview.ends_with("..."));
    }

    #[test]
    fn test_running_duration_present_for_running_jobs() {
        let mut job = sample();
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now() - Duration::seconds(90));
        let view = JobView::from_job(&job);
        let duration = view.running_duration.unwrap();
        assert!(duration.total_seconds >= 90);
        assert_eq!(duration.minutes, 1);
        assert!(duration.formatted.starts_with("1m"));
    }

    #[test]
    fn test_error_is_sanitized() {
        let mut job = sample();
        job.error = Some("failed loading /opt/app/driver.rs module".to_string());
        let view = JobView::from_job(&job);
        assert!(view.error.unwrap().contains("[FILE_PATH]"));
    }
}
