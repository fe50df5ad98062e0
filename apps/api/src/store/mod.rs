//! Persistence collaborator. Stages and actions talk to `dyn JobStore`;
//! `PgJobStore` is the production implementation.

pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{Job, JobPatch, JobStatus, NewJob};
use crate::models::pipeline::{PipelineRunRow, PipelineRunUpdate};

pub use postgres::PgJobStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub skipped: usize,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, AppError>;

    /// Discovered jobs the scoring stage should look at, cached scores included.
    async fn list_discovered_for_scoring(&self) -> Result<Vec<Job>, AppError>;

    /// Inserts new postings, skipping any whose URL is already stored.
    async fn bulk_create(&self, jobs: &[NewJob]) -> Result<ImportSummary, AppError>;

    /// Last-write-wins partial update. `None` when the job does not exist.
    async fn update_job(&self, id: Uuid, patch: JobPatch) -> Result<Option<Job>, AppError>;

    /// Applies `patch` only while the job's status is one of `from`.
    /// `None` when the job is missing or its status no longer matches.
    async fn transition_job(
        &self,
        id: Uuid,
        from: &[JobStatus],
        patch: JobPatch,
    ) -> Result<Option<Job>, AppError>;

    async fn create_pipeline_run(&self) -> Result<PipelineRunRow, AppError>;

    async fn finish_pipeline_run(
        &self,
        id: Uuid,
        update: PipelineRunUpdate,
    ) -> Result<(), AppError>;

    async fn latest_pipeline_run(&self) -> Result<Option<PipelineRunRow>, AppError>;
}
