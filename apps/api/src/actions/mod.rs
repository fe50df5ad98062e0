//! Bulk job actions: `skip`, `rescore` and `move_to_ready` over a set of job IDs.
//!
//! Every job runs in isolation through [`BoundedPool`]. A failed guard or a
//! collaborator error becomes that job's `ActionResult` and never aborts the
//! batch. [`stream`] delivers the same per-job results as an SSE feed.

pub mod handlers;
pub mod stream;

use std::collections::HashSet;
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::finalize::{FinalizeOptions, JobFinalizer};
use crate::models::job::{Job, JobPatch, JobStatus};
use crate::pipeline::scoring::ScoringStage;
use crate::pool::BoundedPool;
use crate::profile::ProfileLoader;
use crate::store::JobStore;

pub const MAX_JOB_IDS: usize = 100;
pub const JOB_ACTION_CONCURRENCY: f64 = 4.0;

const SKIPPABLE_STATUSES: &[JobStatus] = &[JobStatus::Discovered, JobStatus::Ready];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Skip,
    Rescore,
    MoveToReady,
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Skip => "skip",
            JobAction::Rescore => "rescore",
            JobAction::MoveToReady => "move_to_ready",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct JobActionOptions {
    /// Only meaningful for `move_to_ready`.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobActionRequest {
    pub action: JobAction,
    pub job_ids: Vec<Uuid>,
    #[serde(default)]
    pub options: JobActionOptions,
}

impl JobActionRequest {
    /// Parses and validates a raw request body.
    pub fn parse(body: Value) -> Result<Self, AppError> {
        let request: JobActionRequest = serde_json::from_value(body).map_err(|e| {
            AppError::invalid_with("Invalid job action request", json!({ "reason": e.to_string() }))
        })?;

        if request.job_ids.is_empty() || request.job_ids.len() > MAX_JOB_IDS {
            return Err(AppError::invalid_with(
                "Invalid job action request",
                json!({ "reason": format!("jobIds must contain between 1 and {MAX_JOB_IDS} entries") }),
            ));
        }
        Ok(request)
    }

    /// Job IDs with duplicates removed, first occurrence wins.
    pub fn unique_job_ids(&self) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        self.job_ids.iter().copied().filter(|id| seen.insert(*id)).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Results
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ActionError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Guard and lookup failures keep their code; any collaborator failure
/// (storage, model, upload) reports as `INTERNAL_ERROR`.
impl From<AppError> for ActionError {
    fn from(err: AppError) -> Self {
        let code = match &err {
            AppError::NotFound(_) | AppError::InvalidRequest { .. } | AppError::Conflict(_) => err.code(),
            _ => "INTERNAL_ERROR",
        };
        Self {
            code: code.to_string(),
            details: err.details().cloned(),
            message: err.to_string(),
        }
    }
}

/// Single-job routes answer with the same status the error code implies.
impl IntoResponse for ActionError {
    fn into_response(self) -> Response {
        use axum::http::StatusCode;

        let status = match self.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "INVALID_REQUEST" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, axum::Json(json!({ "error": self }))).into_response()
    }
}

/// Outcome for one requested job. Serializes as `{jobId, ok: true, job}` or
/// `{jobId, ok: false, error}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub job_id: Uuid,
    pub outcome: Result<Job, ActionError>,
}

impl ActionResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

impl Serialize for ActionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ActionResult", 3)?;
        state.serialize_field("jobId", &self.job_id)?;
        match &self.outcome {
            Ok(job) => {
                state.serialize_field("ok", &true)?;
                state.serialize_field("job", job)?;
            }
            Err(error) => {
                state.serialize_field("ok", &false)?;
                state.serialize_field("error", error)?;
            }
        }
        state.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobActionResponse {
    pub action: JobAction,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<ActionResult>,
}

// ────────────────────────────────────────────────────────────────────────────
// Execution
// ────────────────────────────────────────────────────────────────────────────

/// Profile load shared by every `rescore` in one batch. The first caller
/// starts the load; concurrent callers wait on it. A failed load is cached
/// for the rest of the batch too.
pub struct SharedProfile {
    loader: Arc<dyn ProfileLoader>,
    cell: OnceCell<Result<Value, ActionError>>,
}

impl SharedProfile {
    pub fn new(loader: Arc<dyn ProfileLoader>) -> Self {
        Self {
            loader,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Value, ActionError> {
        self.cell
            .get_or_init(|| async {
                match self.loader.load().await {
                    Ok(profile) if profile.is_object() => Ok(profile),
                    Ok(_) => Err(AppError::invalid("Invalid resume profile format").into()),
                    Err(err) => Err(err.into()),
                }
            })
            .await
            .clone()
    }
}

/// Per-batch execution state.
pub struct ActionBatch {
    pub action: JobAction,
    pub force: bool,
    profile: SharedProfile,
}

/// Collaborators the actions need.
#[derive(Clone)]
pub struct ActionContext {
    pub store: Arc<dyn JobStore>,
    pub scoring: ScoringStage,
    pub finalizer: Arc<dyn JobFinalizer>,
    pub profile: Arc<dyn ProfileLoader>,
}

impl ActionContext {
    pub fn batch(&self, action: JobAction, options: JobActionOptions) -> ActionBatch {
        ActionBatch {
            action,
            force: options.force,
            profile: SharedProfile::new(self.profile.clone()),
        }
    }

    /// Guards and applies `batch.action` to one job.
    pub async fn execute(&self, batch: &ActionBatch, job_id: Uuid) -> Result<Job, ActionError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Job not found".into()))?;

        match batch.action {
            JobAction::Skip => {
                if !SKIPPABLE_STATUSES.contains(&job.status) {
                    return Err(AppError::invalid_with(
                        format!("Job is not skippable from status \"{}\"", job.status),
                        json!({
                            "jobId": job_id,
                            "status": job.status,
                            "allowedStatuses": SKIPPABLE_STATUSES,
                        }),
                    )
                    .into());
                }
                Ok(self
                    .store
                    .transition_job(job_id, SKIPPABLE_STATUSES, JobPatch::status(JobStatus::Skipped))
                    .await?
                    .ok_or_else(|| AppError::Conflict("Job status changed concurrently".into()))?)
            }
            JobAction::MoveToReady => {
                if job.status != JobStatus::Discovered {
                    return Err(AppError::invalid_with(
                        format!("Job is not movable to Ready from status \"{}\"", job.status),
                        json!({
                            "jobId": job_id,
                            "status": job.status,
                            "requiredStatus": JobStatus::Discovered,
                        }),
                    )
                    .into());
                }
                Ok(self
                    .finalizer
                    .finalize(job_id, FinalizeOptions { force: batch.force })
                    .await?)
            }
            JobAction::Rescore => {
                if job.status == JobStatus::Processing {
                    return Err(AppError::invalid_with(
                        format!("Job is not rescorable from status \"{}\"", job.status),
                        json!({
                            "jobId": job_id,
                            "status": job.status,
                            "disallowedStatus": JobStatus::Processing,
                        }),
                    )
                    .into());
                }
                let profile = batch.profile.get().await?;
                Ok(self.scoring.rescore(&job, &profile).await?)
            }
        }
    }

    /// [`ActionContext::execute`] with every failure, panics included, folded
    /// into the result.
    pub async fn run_one(&self, batch: &ActionBatch, job_id: Uuid) -> ActionResult {
        let outcome = match AssertUnwindSafe(self.execute(batch, job_id)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%job_id, action = batch.action.as_str(), "Job action panicked");
                Err(ActionError::internal("Unknown error"))
            }
        };
        ActionResult { job_id, outcome }
    }
}

/// Runs one action over every unique requested job and waits for all of them.
pub async fn run_job_action(ctx: &ActionContext, request: &JobActionRequest) -> JobActionResponse {
    let job_ids = request.unique_job_ids();
    let batch = ctx.batch(request.action, request.options);

    let pool = BoundedPool::<Uuid, ActionResult, Infallible>::new(JOB_ACTION_CONCURRENCY);
    let results = pool
        .run(&job_ids, |job_id, _| {
            let batch = &batch;
            async move { Ok(ctx.run_one(batch, job_id).await) }
        })
        .await
        .unwrap_or_else(|never| match never {});

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let failed = results.len() - succeeded;
    info!(
        action = request.action.as_str(),
        requested = job_ids.len(),
        succeeded,
        failed,
        concurrency = pool.concurrency(),
        "Job action completed"
    );

    JobActionResponse {
        action: request.action,
        requested: job_ids.len(),
        succeeded,
        failed,
        results,
    }
}
