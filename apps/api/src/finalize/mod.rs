//! Finalize: turns a scored job into a ready-to-apply one.
//!
//! `discovered | ready → processing → ready`. Tailoring comes from a
//! [`Tailor`] backend; the tailored document is optionally rendered to object
//! storage. A failure anywhere restores the job's previous status.

pub mod artifacts;
pub mod tailor;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{Job, JobPatch, JobStatus};
use crate::profile::ProfileLoader;
use crate::store::JobStore;

pub use artifacts::{ArtifactStore, S3ArtifactStore};
pub use tailor::{LlmTailor, ProfileTailor, Tailor, Tailoring};

/// Statuses a job may be finalized from.
pub const FINALIZABLE_STATUSES: &[JobStatus] = &[JobStatus::Discovered, JobStatus::Ready];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct FinalizeOptions {
    /// Re-tailor even if the job already carries tailoring.
    #[serde(default)]
    pub force: bool,
}

#[async_trait]
pub trait JobFinalizer: Send + Sync {
    async fn finalize(&self, job_id: Uuid, options: FinalizeOptions) -> Result<Job, AppError>;
}

#[derive(Debug, Serialize)]
struct RenderedDocument<'a> {
    job_id: Uuid,
    title: &'a str,
    employer: Option<&'a str>,
    headline: &'a str,
    summary: &'a str,
    skills: &'a [String],
    profile: &'a serde_json::Value,
}

pub struct TailoringFinalizer {
    store: Arc<dyn JobStore>,
    profile: Arc<dyn ProfileLoader>,
    tailor: Arc<dyn Tailor>,
    /// `None` disables rendering.
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl TailoringFinalizer {
    pub fn new(
        store: Arc<dyn JobStore>,
        profile: Arc<dyn ProfileLoader>,
        tailor: Arc<dyn Tailor>,
        artifacts: Option<Arc<dyn ArtifactStore>>,
    ) -> Self {
        Self {
            store,
            profile,
            tailor,
            artifacts,
        }
    }

    async fn tailor_and_render(&self, job: &Job, options: FinalizeOptions) -> Result<Job, AppError> {
        let profile = self.profile.load().await?;

        let tailoring = match existing_tailoring(job) {
            Some(existing) if !options.force => existing,
            _ => self.tailor.tailor(job, &profile).await?,
        };

        let artifact_key = match &self.artifacts {
            Some(artifacts) => {
                let key = format!("resumes/{}.json", job.id);
                let document = RenderedDocument {
                    job_id: job.id,
                    title: &job.title,
                    employer: job.employer.as_deref(),
                    headline: &tailoring.headline,
                    summary: &tailoring.summary,
                    skills: &tailoring.skills,
                    profile: &profile,
                };
                let body = serde_json::to_vec_pretty(&document)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("render failed: {e}")))?;
                artifacts.put(&key, body, "application/json").await?;
                Some(key)
            }
            None => None,
        };

        let patch = JobPatch {
            status: Some(JobStatus::Ready),
            tailored_headline: Some(tailoring.headline),
            tailored_summary: Some(tailoring.summary),
            tailored_skills: Some(tailoring.skills),
            artifact_key,
            ..JobPatch::default()
        };
        self.store
            .transition_job(job.id, &[JobStatus::Processing], patch)
            .await?
            .ok_or_else(|| AppError::Conflict("Job left processing while it was being finalized".into()))
    }
}

fn existing_tailoring(job: &Job) -> Option<Tailoring> {
    Some(Tailoring {
        headline: job.tailored_headline.clone()?,
        summary: job.tailored_summary.clone()?,
        skills: job.tailored_skills.clone(),
    })
}

#[async_trait]
impl JobFinalizer for TailoringFinalizer {
    async fn finalize(&self, job_id: Uuid, options: FinalizeOptions) -> Result<Job, AppError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Job not found".into()))?;

        if !FINALIZABLE_STATUSES.contains(&job.status) {
            return Err(AppError::invalid_with(
                format!("Job cannot be processed while {}", job.status),
                json!({ "status": job.status }),
            ));
        }

        let previous = job.status;
        let job = self
            .store
            .transition_job(job_id, &[previous], JobPatch::status(JobStatus::Processing))
            .await?
            .ok_or_else(|| AppError::Conflict("Job status changed concurrently".into()))?;

        match self.tailor_and_render(&job, options).await {
            Ok(ready) => {
                info!(%job_id, force = options.force, "Job finalized");
                Ok(ready)
            }
            Err(err) => {
                warn!(%job_id, error = %err, "Finalize failed, restoring previous status");
                if let Err(restore_err) = self
                    .store
                    .transition_job(job_id, &[JobStatus::Processing], JobPatch::status(previous))
                    .await
                {
                    warn!(%job_id, error = %restore_err, "Failed to restore job status");
                }
                Err(err)
            }
        }
    }
}
