use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use postqueue_core::scheduler::PostCallbackFactory;
use postqueue_core::{Config, FanOutHub, Result, Scheduler};

use crate::response::success;
use crate::routes::{jobs, scheduler, ws};
use crate::state::AppState;

/// Assemble the router over a prepared state
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route(
            "/api/jobs/:id",
            get(jobs::get_job).delete(jobs::delete_job),
        )
        .route("/api/scheduler/start", post(scheduler::start_scheduler))
        .route("/api/scheduler/stop", post(scheduler::stop_scheduler))
        .route("/api/scheduler/status", get(scheduler::scheduler_status))
        .route("/api/scheduler/jobs", get(scheduler::active_jobs))
        .route("/ws", get(ws::websocket_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> axum::response::Response {
    success(json!({"status": "ok"}))
}

/// Boot the API server: construct the singleton scheduler, wire the fan-out
/// hub and serve until the process ends.
pub async fn run(config: Config, post_factory: PostCallbackFactory) -> Result<()> {
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| postqueue_core::Error::config(format!("Invalid host: {}", e)))?,
        config.server.port,
    ));

    let hub = Arc::new(FanOutHub::new());
    let scheduler = Scheduler::global(&config, Arc::clone(&hub)).await?;
    let state = AppState::new(scheduler, hub, post_factory);

    let app = build_router(state);

    info!("postqueue API server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| postqueue_core::Error::Io(e))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| postqueue_core::Error::Io(e))?;

    Ok(())
}
