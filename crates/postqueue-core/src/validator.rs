//! Business-rule validation for jobs
//!
//! Pure and stateless. Errors block the operation; warnings are reported and
//! logged but do not block.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Job, JobStatus, Platform};

/// Maximum content length in characters (Threads limit)
pub const MAX_CONTENT_LENGTH: usize = 500;
/// Minimum content length after trimming
pub const MIN_CONTENT_LENGTH: usize = 1;
/// Scheduling horizon in days
pub const MAX_SCHEDULE_DAYS_AHEAD: i64 = 365;
/// Allowed slack into the past, in days (covers timezone confusion)
pub const MAX_SCHEDULE_DAYS_PAST: i64 = 1;
/// Minimum spacing between jobs on the same account/platform, in seconds
pub const MIN_TIME_BETWEEN_JOBS_SECS: i64 = 5;
/// Retry budget ceiling before a warning fires
pub const MAX_RETRIES_WARN: u32 = 10;

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Blocks the operation
    Error,
    /// Reported but does not block
    Warning,
    /// Informational only
    Info,
}

/// Outcome of a validation pass
#[derive(Debug, Default)]
pub struct ValidationReport {
    entries: Vec<(ValidationSeverity, String)>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finding
    pub fn add(&mut self, severity: ValidationSeverity, message: impl Into<String>) {
        self.entries.push((severity, message.into()));
    }

    /// True when no blocking errors were found
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|(s, _)| *s == ValidationSeverity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.entries
            .iter()
            .any(|(s, _)| *s == ValidationSeverity::Warning)
    }

    pub fn error_messages(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(s, _)| *s == ValidationSeverity::Error)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    pub fn warning_messages(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(s, _)| *s == ValidationSeverity::Warning)
            .map(|(_, m)| m.as_str())
            .collect()
    }

    /// All findings, tagged with their severity
    pub fn entries(&self) -> &[(ValidationSeverity, String)] {
        &self.entries
    }
}

/// Validator for prospective and loaded jobs
#[derive(Debug, Default, Clone)]
pub struct JobValidator;

impl JobValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a prospective job before it is added.
    ///
    /// `existing` is the live cache snapshot, used for the schedule-conflict
    /// warning.
    pub fn validate_for_add(
        &self,
        account_id: Option<&str>,
        content: &str,
        scheduled_time: DateTime<Utc>,
        platform: Platform,
        max_retries: u32,
        existing: &[Job],
    ) -> ValidationReport {
        let mut report = ValidationReport::new();
        let now = Utc::now();

        // 1. account_id (optional; None and "" mean "any")
        if let Some(account) = account_id {
            if !account.is_empty() {
                if account.trim().is_empty() {
                    report.add(
                        ValidationSeverity::Error,
                        "account_id must not be whitespace only",
                    );
                } else if account.chars().count() > 100 {
                    report.add(
                        ValidationSeverity::Warning,
                        format!(
                            "account_id is unusually long ({} chars)",
                            account.chars().count()
                        ),
                    );
                }
            }
        }

        // 2. content
        let trimmed_len = content.trim().chars().count();
        let total_len = content.chars().count();
        if trimmed_len < MIN_CONTENT_LENGTH {
            report.add(
                ValidationSeverity::Error,
                format!("content too short (minimum {} character)", MIN_CONTENT_LENGTH),
            );
        } else if total_len > MAX_CONTENT_LENGTH {
            report.add(
                ValidationSeverity::Error,
                format!(
                    "content too long ({} chars, maximum {})",
                    total_len, MAX_CONTENT_LENGTH
                ),
            );
        }
        if is_suspicious_content(content) {
            report.add(
                ValidationSeverity::Warning,
                "content looks suspicious (possible spam or invalid input)",
            );
        }

        // 3. scheduled_time window
        let diff = scheduled_time - now;
        if diff < -Duration::days(MAX_SCHEDULE_DAYS_PAST) {
            report.add(
                ValidationSeverity::Error,
                format!(
                    "scheduled_time too far in the past (maximum {} day)",
                    MAX_SCHEDULE_DAYS_PAST
                ),
            );
        }
        if diff > Duration::days(MAX_SCHEDULE_DAYS_AHEAD) {
            report.add(
                ValidationSeverity::Error,
                format!(
                    "scheduled_time too far in the future (maximum {} days)",
                    MAX_SCHEDULE_DAYS_AHEAD
                ),
            );
        }
        let diff_secs = diff.num_seconds();
        if diff_secs > 0 && diff_secs < 10 {
            report.add(
                ValidationSeverity::Warning,
                format!(
                    "scheduled_time is only {}s away, the dispatch may not make it",
                    diff_secs
                ),
            );
        }

        // 4. retry budget
        if max_retries > MAX_RETRIES_WARN {
            report.add(
                ValidationSeverity::Warning,
                format!("max_retries is very high ({}), may spam retries", max_retries),
            );
        }

        // 5. schedule conflicts on the same account/platform
        let conflicts = schedule_conflicts(account_id, scheduled_time, platform, existing);
        if conflicts > 0 {
            report.add(
                ValidationSeverity::Warning,
                format!(
                    "{} other job(s) on the same account/platform scheduled within {}s",
                    conflicts, MIN_TIME_BETWEEN_JOBS_SECS
                ),
            );
        }

        report
    }

    /// Validate a job loaded from storage for internal consistency.
    pub fn validate_state(&self, job: &Job) -> ValidationReport {
        let mut report = ValidationReport::new();

        if job.job_id.is_empty() {
            report.add(ValidationSeverity::Error, "job is missing job_id");
        }
        if job.content.trim().is_empty() {
            report.add(ValidationSeverity::Error, "job is missing content");
        }

        match job.status {
            JobStatus::Completed => {
                if job.completed_at.is_none() {
                    report.add(
                        ValidationSeverity::Warning,
                        "COMPLETED job is missing completed_at",
                    );
                }
            }
            JobStatus::Running => {
                if job.started_at.is_none() {
                    report.add(
                        ValidationSeverity::Warning,
                        "RUNNING job is missing started_at (likely stuck)",
                    );
                }
            }
            JobStatus::Failed => {
                if job.error.is_none() {
                    report.add(ValidationSeverity::Info, "FAILED job has no error message");
                }
            }
            JobStatus::Expired => {
                let since = Utc::now() - job.scheduled_time;
                if since < Duration::hours(crate::models::job::EXPIRY_WINDOW_HOURS) {
                    report.add(
                        ValidationSeverity::Warning,
                        "EXPIRED job is less than 24h past its scheduled_time",
                    );
                }
            }
            _ => {}
        }

        if job.retry_count > job.max_retries {
            report.add(
                ValidationSeverity::Error,
                format!(
                    "retry_count ({}) exceeds max_retries ({})",
                    job.retry_count, job.max_retries
                ),
            );
        }

        if let Some(created) = job.created_at {
            if created > job.scheduled_time + Duration::days(1) {
                report.add(
                    ValidationSeverity::Warning,
                    "created_at is far after scheduled_time",
                );
            }
        }
        if let Some(started) = job.started_at {
            if started < job.scheduled_time - Duration::hours(1) {
                report.add(
                    ValidationSeverity::Warning,
                    "started_at is far before scheduled_time",
                );
            }
            if let Some(completed) = job.completed_at {
                if completed < started {
                    report.add(
                        ValidationSeverity::Error,
                        "completed_at precedes started_at",
                    );
                }
            }
        }

        report
    }
}

/// Count non-terminal jobs on the same account/platform scheduled within the
/// minimum spacing of the candidate time.
fn schedule_conflicts(
    account_id: Option<&str>,
    scheduled_time: DateTime<Utc>,
    platform: Platform,
    existing: &[Job],
) -> usize {
    existing
        .iter()
        .filter(|job| !job.status.is_terminal())
        .filter(|job| job.account_id.as_deref() == account_id && job.platform == platform)
        .filter(|job| {
            (job.scheduled_time - scheduled_time)
                .num_seconds()
                .abs()
                < MIN_TIME_BETWEEN_JOBS_SECS
        })
        .count()
}

/// Heuristic spam/garbage detection for post content.
fn is_suspicious_content(content: &str) -> bool {
    if content.trim().is_empty() {
        return true;
    }

    // Mostly punctuation / symbols
    let total = content.chars().count();
    let special = content
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    if total > 0 && special * 2 > total {
        return true;
    }

    // Long runs of spaces
    if content.contains(&" ".repeat(20)) {
        return true;
    }

    // Nothing readable at all in a non-trivial string
    if total > 10 && !content.chars().any(|c| c.is_alphanumeric()) {
        return true;
    }

    false
}
