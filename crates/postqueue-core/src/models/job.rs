//! Job types and lifecycle predicates

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Hours after the scheduled time at which an unfinished job expires
pub const EXPIRY_WINDOW_HOURS: i64 = 24;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted but not yet scheduled (treated as SCHEDULED by the ready check)
    Pending,

    /// Waiting for its scheduled time
    Scheduled,

    /// Currently being dispatched
    Running,

    /// Posted successfully (terminal)
    Completed,

    /// Retries exhausted (terminal)
    Failed,

    /// Removed by an explicit user action (terminal)
    Cancelled,

    /// Idle past the 24 h window (terminal)
    Expired,
}

impl Default for JobStatus {
    fn default() -> Self {
        JobStatus::Scheduled
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::Expired => write!(f, "expired"),
        }
    }
}

impl JobStatus {
    /// Check if the status is terminal for execution (the loop never picks it)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Expired
        )
    }

    /// Check if the job still counts against the active set
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Scheduled | JobStatus::Running
        )
    }

    /// Parse from the wire string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(JobStatus::Pending),
            "scheduled" => Some(JobStatus::Scheduled),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            "expired" => Some(JobStatus::Expired),
            _ => None,
        }
    }
}

/// Job priority; higher sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    Low = 1,
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::Low => write!(f, "low"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::High => write!(f, "high"),
            JobPriority::Urgent => write!(f, "urgent"),
        }
    }
}

impl JobPriority {
    /// Numeric weight used for sorting and the relational column
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    /// Parse from the numeric column value; unknown values map to NORMAL
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => JobPriority::Low,
            3 => JobPriority::High,
            4 => JobPriority::Urgent,
            _ => JobPriority::Normal,
        }
    }

    /// Parse from a name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(JobPriority::Low),
            "normal" => Some(JobPriority::Normal),
            "high" => Some(JobPriority::High),
            "urgent" => Some(JobPriority::Urgent),
            _ => None,
        }
    }
}

// The wire format carries the numeric weight, matching the relational column.
impl Serialize for JobPriority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for JobPriority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PriorityVisitor;

        impl<'de> serde::de::Visitor<'de> for PriorityVisitor {
            type Value = JobPriority;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a priority weight (1-4) or name")
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<JobPriority, E> {
                Ok(JobPriority::from_i32(v as i32))
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<JobPriority, E> {
                Ok(JobPriority::from_i32(v as i32))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<JobPriority, E> {
                Ok(JobPriority::parse(v).unwrap_or_default())
            }
        }

        deserializer.deserialize_any(PriorityVisitor)
    }
}

/// Dispatch target platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Threads,
    Facebook,
}

impl Default for Platform {
    fn default() -> Self {
        Platform::Threads
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Threads => write!(f, "threads"),
            Platform::Facebook => write!(f, "facebook"),
        }
    }
}

impl Platform {
    /// Parse from the wire string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "threads" => Some(Platform::Threads),
            "facebook" => Some(Platform::Facebook),
            _ => None,
        }
    }
}

/// Result of one dispatch attempt, reported by the post callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostResult {
    /// Whether the callback considers the post placed
    pub ok: bool,

    /// Platform-side id of the created post
    #[serde(default)]
    pub thread_id: Option<String>,

    /// Error summary when not ok
    #[serde(default)]
    pub error: Option<String>,

    /// The click succeeded but the post never appeared
    #[serde(default)]
    pub shadow_fail: bool,
}

impl PostResult {
    /// Create a successful result
    pub fn success(thread_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            thread_id: Some(thread_id.into()),
            error: None,
            shadow_fail: false,
        }
    }

    /// Create a failed result
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            thread_id: None,
            error: Some(error.into()),
            shadow_fail: false,
        }
    }

    /// True only when the post genuinely landed
    pub fn is_success(&self) -> bool {
        self.ok && !self.shadow_fail
    }
}

/// A scheduled posting job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Primary key, immutable
    pub job_id: String,

    /// Target account; None means "any"
    #[serde(default)]
    pub account_id: Option<String>,

    /// Post body, immutable after create
    pub content: String,

    /// Earliest execution time (UTC)
    pub scheduled_time: DateTime<Utc>,

    #[serde(default)]
    pub priority: JobPriority,

    #[serde(default)]
    pub status: JobStatus,

    #[serde(default)]
    pub platform: Platform,

    /// Retry budget
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Attempts consumed
    #[serde(default)]
    pub retry_count: u32,

    /// Set once on creation; loads fall back to scheduled_time when absent
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    /// Set when entering RUNNING, cleared on reset
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// Set on COMPLETED
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Last error summary
    #[serde(default)]
    pub error: Option<String>,

    /// Platform-side id of the created post
    #[serde(default)]
    pub thread_id: Option<String>,

    /// Human-readable status snippet
    #[serde(default)]
    pub status_message: Option<String>,

    /// Affiliate link, delivered by the callback as a comment
    #[serde(default)]
    pub link_aff: Option<String>,
}

fn default_max_retries() -> u32 {
    3
}

impl Job {
    /// Create a new SCHEDULED job
    pub fn new(
        account_id: Option<String>,
        content: impl Into<String>,
        scheduled_time: DateTime<Utc>,
        priority: JobPriority,
        platform: Platform,
        max_retries: u32,
        link_aff: Option<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            account_id,
            content: content.into(),
            scheduled_time,
            priority,
            status: JobStatus::Scheduled,
            platform,
            max_retries,
            retry_count: 0,
            created_at: Some(Utc::now()),
            started_at: None,
            completed_at: None,
            error: None,
            thread_id: None,
            status_message: None,
            link_aff,
        }
    }

    /// Creation time, falling back to the scheduled time for legacy rows
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or(self.scheduled_time)
    }

    /// Check whether the job has sat unfinished past the expiry window
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.status == JobStatus::Completed {
            return false;
        }
        now > self.scheduled_time + Duration::hours(EXPIRY_WINDOW_HOURS)
    }

    /// Check expiry against the current clock
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Check whether the job is eligible for dispatch.
    ///
    /// COMPLETED, RUNNING, FAILED, CANCELLED and EXPIRED jobs are never
    /// ready; only SCHEDULED/PENDING jobs whose time has come and that have
    /// not expired qualify.
    pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() || self.status == JobStatus::Running {
            return false;
        }
        matches!(self.status, JobStatus::Scheduled | JobStatus::Pending)
            && now >= self.scheduled_time
            && !self.is_expired_at(now)
    }

    /// Check readiness against the current clock
    pub fn is_ready(&self) -> bool {
        self.is_ready_at(Utc::now())
    }

    /// Hours since the scheduled time; negative when still in the future
    pub fn hours_overdue_at(&self, now: DateTime<Utc>) -> f64 {
        (now - self.scheduled_time).num_seconds() as f64 / 3600.0
    }

    /// Check if the retry budget allows another attempt
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Check if a RUNNING job has been running too long.
    ///
    /// A RUNNING job with no started_at is stuck immediately: there is no way
    /// to tell when it began.
    pub fn is_stuck_at(&self, max_running_minutes: i64, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        match self.started_at {
            Some(started) => now - started > Duration::minutes(max_running_minutes),
            None => true,
        }
    }

    /// Check stuck state against the current clock
    pub fn is_stuck(&self, max_running_minutes: i64) -> bool {
        self.is_stuck_at(max_running_minutes, Utc::now())
    }

    /// Duplicate-detection key: account, platform and normalised content
    pub fn duplicate_key(&self) -> (Option<&str>, Platform, String) {
        (
            self.account_id.as_deref(),
            self.platform,
            normalize_content(&self.content),
        )
    }
}

/// Normalise content for duplicate comparison: trim, lowercase, collapse
/// internal whitespace.
pub fn normalize_content(content: &str) -> String {
    content
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
