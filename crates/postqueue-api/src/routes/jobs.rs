use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use postqueue_core::models::{JobPriority, JobStatus, Platform};
use postqueue_core::scheduler::NewJob;
use postqueue_core::timeutil::parse_user_datetime;
use postqueue_core::Error as CoreError;

use crate::response::{created, success, ApiError};
use crate::serialize::JobView;
use crate::state::AppState;

/// Create job request from the API
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub account_id: Option<String>,
    pub content: String,
    /// ISO-8601; naive values are interpreted as UTC+7
    pub scheduled_time: String,
    pub priority: Option<String>,
    pub platform: Option<String>,
    pub max_retries: Option<u32>,
    pub link_aff: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub account_id: Option<String>,
    pub status: Option<String>,
    pub platform: Option<String>,
    pub scheduled_from: Option<String>,
    pub scheduled_to: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
    pub total_pages: u32,
}

/// POST /api/jobs
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Response, ApiError> {
    let scheduled_time = parse_user_datetime(&request.scheduled_time).ok_or_else(|| {
        CoreError::invalid_schedule_time(format!(
            "scheduled_time '{}' is not a recognised timestamp",
            request.scheduled_time
        ))
    })?;

    let priority = match &request.priority {
        Some(name) => JobPriority::parse(name).ok_or_else(|| {
            CoreError::validation(format!(
                "priority '{}' is not one of low, normal, high, urgent",
                name
            ))
        })?,
        None => JobPriority::Normal,
    };

    let platform = match &request.platform {
        Some(name) => Platform::parse(name).ok_or_else(|| {
            CoreError::validation(format!(
                "platform '{}' is not one of threads, facebook",
                name
            ))
        })?,
        None => Platform::Threads,
    };

    let new = NewJob {
        account_id: request.account_id.filter(|a| !a.is_empty()),
        content: request.content,
        scheduled_time,
        priority,
        platform,
        max_retries: request.max_retries.unwrap_or(3),
        link_aff: request.link_aff,
    };

    let job_id = state.scheduler.add_job(new).await?;
    Ok(created(json!({ "job_id": job_id })))
}

/// GET /api/jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobListQuery>,
) -> Result<Response, ApiError> {
    let status = match &query.status {
        Some(name) => Some(JobStatus::parse(name).ok_or_else(|| {
            CoreError::validation(format!("status '{}' is not a job status", name))
        })?),
        None => None,
    };
    let platform = match &query.platform {
        Some(name) => Some(Platform::parse(name).ok_or_else(|| {
            CoreError::validation(format!("platform '{}' is not a platform", name))
        })?),
        None => None,
    };
    let scheduled_from = match &query.scheduled_from {
        Some(raw) => Some(parse_user_datetime(raw).ok_or_else(|| {
            CoreError::validation(format!("scheduled_from '{}' is not a timestamp", raw))
        })?),
        None => None,
    };
    let scheduled_to = match &query.scheduled_to {
        Some(raw) => Some(parse_user_datetime(raw).ok_or_else(|| {
            CoreError::validation(format!("scheduled_to '{}' is not a timestamp", raw))
        })?),
        None => None,
    };

    let jobs: Vec<_> = state
        .scheduler
        .list_jobs(query.account_id.as_deref(), status)
        .into_iter()
        .filter(|j| platform.map_or(true, |p| j.platform == p))
        .filter(|j| scheduled_from.map_or(true, |from| j.scheduled_time >= from))
        .filter(|j| scheduled_to.map_or(true, |to| j.scheduled_time <= to))
        .collect();

    let total = jobs.len();
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);
    let total_pages = (total as u32).div_ceil(limit).max(1);

    let offset = ((page - 1) * limit) as usize;
    let views: Vec<JobView> = jobs
        .iter()
        .skip(offset)
        .take(limit as usize)
        .map(JobView::from_job)
        .collect();

    Ok(success(json!({
        "data": views,
        "pagination": Pagination { page, limit, total, total_pages },
    })))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job = state
        .scheduler
        .get_job(&job_id)
        .ok_or_else(|| CoreError::job_not_found(&job_id))?;
    Ok(success(JobView::from_job(&job)))
}

/// DELETE /api/jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let removed = state.scheduler.remove_job(&job_id).await?;
    Ok(success(json!({ "removed": removed, "job_id": job_id })))
}
