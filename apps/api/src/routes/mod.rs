pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::actions::handlers as jobs;
use crate::pipeline::handlers as pipeline;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Jobs
        .route("/api/v1/jobs/actions", post(jobs::handle_job_action))
        .route(
            "/api/v1/jobs/actions/stream",
            post(jobs::handle_job_action_stream),
        )
        .route("/api/v1/jobs/:id", get(jobs::handle_get_job))
        .route("/api/v1/jobs/:id/skip", post(jobs::handle_skip_job))
        .route("/api/v1/jobs/:id/process", post(jobs::handle_process_job))
        .route("/api/v1/jobs/:id/rescore", post(jobs::handle_rescore_job))
        // Pipeline
        .route("/api/v1/pipeline/run", post(pipeline::handle_run_pipeline))
        .route(
            "/api/v1/pipeline/cancel",
            post(pipeline::handle_cancel_pipeline),
        )
        .route(
            "/api/v1/pipeline/status",
            get(pipeline::handle_pipeline_status),
        )
        .route(
            "/api/v1/pipeline/progress",
            get(pipeline::handle_pipeline_progress),
        )
        .with_state(state)
}
