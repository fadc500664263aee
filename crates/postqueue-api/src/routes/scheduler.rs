use axum::extract::State;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::response::{success, ApiError};
use crate::serialize::JobView;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    #[allow(dead_code)]
    pub account_id: Option<String>,
}

/// POST /api/scheduler/start
pub async fn start_scheduler(
    State(state): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> Result<Response, ApiError> {
    let _ = body;
    if state.scheduler.is_running() {
        return Ok(success(json!({
            "status": "running",
            "message": "Scheduler is already running",
        })));
    }

    state.scheduler.start(state.post_factory.clone());
    Ok(success(json!({
        "status": "started",
        "message": "Scheduler started successfully",
    })))
}

/// POST /api/scheduler/stop
pub async fn stop_scheduler(State(state): State<AppState>) -> Result<Response, ApiError> {
    if !state.scheduler.is_running() {
        return Ok(success(json!({
            "status": "stopped",
            "message": "Scheduler is already stopped",
        })));
    }

    state.scheduler.stop().await;
    Ok(success(json!({
        "status": "stopped",
        "message": "Scheduler stopped successfully",
    })))
}

/// GET /api/scheduler/status
pub async fn scheduler_status(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(success(state.scheduler.status()))
}

/// GET /api/scheduler/jobs
pub async fn active_jobs(State(state): State<AppState>) -> Result<Response, ApiError> {
    let views: Vec<JobView> = state
        .scheduler
        .get_active_jobs()
        .iter()
        .map(JobView::from_job)
        .collect();
    Ok(success(views))
}
