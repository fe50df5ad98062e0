use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use crate::errors::AppError;
use crate::models::pipeline::PipelineRunRow;
use crate::pipeline::driver::{CancelResponse, DriverStatus, PipelineRunRequest};
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatusResponse {
    #[serde(flatten)]
    pub driver: DriverStatus,
    pub last_run: Option<PipelineRunRow>,
}

/// POST /api/v1/pipeline/run
/// Starts a run in the background; 409 when one is already active.
pub async fn handle_run_pipeline(
    State(state): State<AppState>,
    body: Option<Json<PipelineRunRequest>>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    state.pipeline.start(request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Pipeline started" })),
    ))
}

/// POST /api/v1/pipeline/cancel
pub async fn handle_cancel_pipeline(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<CancelResponse>), AppError> {
    let response = state.pipeline.request_cancel();
    if !response.accepted {
        return Err(AppError::Conflict("No pipeline is running".into()));
    }
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/v1/pipeline/status
pub async fn handle_pipeline_status(
    State(state): State<AppState>,
) -> Result<Json<PipelineStatusResponse>, AppError> {
    let last_run = state.pipeline.store().latest_pipeline_run().await?;
    Ok(Json(PipelineStatusResponse {
        driver: state.pipeline.status(),
        last_run,
    }))
}

/// GET /api/v1/pipeline/progress
/// Current snapshot first, then every update.
pub async fn handle_pipeline_progress(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = WatchStream::new(state.pipeline.progress().subscribe())
        .filter_map(|snapshot| Event::default().event("progress").json_data(&snapshot).ok().map(Ok));
    Sse::new(updates).keep_alive(KeepAlive::default())
}
