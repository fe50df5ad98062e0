use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::actions::stream::{stream_job_action, ChannelSink, HEARTBEAT_INTERVAL};
use crate::actions::{
    run_job_action, ActionError, JobAction, JobActionOptions, JobActionRequest, JobActionResponse,
};
use crate::errors::AppError;
use crate::models::job::Job;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ProcessQuery {
    pub force: Option<String>,
}

/// POST /api/v1/jobs/actions
pub async fn handle_job_action(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<JobActionResponse>, AppError> {
    let request = JobActionRequest::parse(body)?;
    Ok(Json(run_job_action(&state.actions, &request).await))
}

/// POST /api/v1/jobs/actions/stream
/// Body problems surface as a terminal `error` event on the stream.
pub async fn handle_job_action_stream(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (sink, rx) = ChannelSink::new();
    let ctx = state.actions.clone();
    tokio::spawn(async move {
        stream_job_action(&ctx, body, Arc::new(sink), HEARTBEAT_INTERVAL).await;
    });

    let frames = UnboundedReceiverStream::new(rx).filter_map(|frame| frame.into_sse().map(Ok));
    Sse::new(frames)
}

/// GET /api/v1/jobs/:id
pub async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, AppError> {
    let job = state
        .actions
        .store
        .get_job(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".into()))?;
    Ok(Json(job))
}

/// POST /api/v1/jobs/:id/skip
pub async fn handle_skip_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ActionError> {
    run_single(&state, JobAction::Skip, JobActionOptions::default(), id).await
}

/// POST /api/v1/jobs/:id/process?force=true
pub async fn handle_process_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ProcessQuery>,
) -> Result<Json<Job>, ActionError> {
    let force = matches!(query.force.as_deref(), Some("1" | "true"));
    run_single(&state, JobAction::MoveToReady, JobActionOptions { force }, id).await
}

/// POST /api/v1/jobs/:id/rescore
pub async fn handle_rescore_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ActionError> {
    run_single(&state, JobAction::Rescore, JobActionOptions::default(), id).await
}

async fn run_single(
    state: &AppState,
    action: JobAction,
    options: JobActionOptions,
    id: Uuid,
) -> Result<Json<Job>, ActionError> {
    let batch = state.actions.batch(action, options);
    state.actions.run_one(&batch, id).await.outcome.map(Json)
}
