use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{Job, JobPatch, JobRow, JobStatus, NewJob};
use crate::models::pipeline::{PipelineRunRow, PipelineRunStatus, PipelineRunUpdate};
use crate::store::{ImportSummary, JobStore};

const UPDATE_JOB_SQL: &str = r#"
    UPDATE jobs SET
        status              = COALESCE($2, status),
        suitability_score   = COALESCE($3, suitability_score),
        suitability_reason  = COALESCE($4, suitability_reason),
        sponsor_match_score = COALESCE($5, sponsor_match_score),
        sponsor_match_names = COALESCE($6, sponsor_match_names),
        tailored_headline   = COALESCE($7, tailored_headline),
        tailored_summary    = COALESCE($8, tailored_summary),
        tailored_skills     = COALESCE($9, tailored_skills),
        artifact_key        = COALESCE($10, artifact_key),
        updated_at          = NOW()
    WHERE id = $1
"#;

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn apply_patch(
        &self,
        id: Uuid,
        patch: JobPatch,
        from: Option<&[JobStatus]>,
    ) -> Result<Option<Job>, AppError> {
        let mut sql = UPDATE_JOB_SQL.to_string();
        if from.is_some() {
            sql.push_str(" AND status = ANY($11)");
        }
        sql.push_str(" RETURNING *");

        let mut query = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(patch.suitability_score)
            .bind(patch.suitability_reason)
            .bind(patch.sponsor_match_score)
            .bind(patch.sponsor_match_names)
            .bind(patch.tailored_headline)
            .bind(patch.tailored_summary)
            .bind(patch.tailored_skills)
            .bind(patch.artifact_key);
        if let Some(from) = from {
            let statuses: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
            query = query.bind(statuses);
        }

        query.fetch_optional(&self.pool).await?.map(into_job).transpose()
    }
}

fn into_job(row: JobRow) -> Result<Job, AppError> {
    Job::try_from(row).map_err(|e| AppError::Internal(anyhow::anyhow!(e)))
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(into_job)
            .transpose()
    }

    async fn list_discovered_for_scoring(&self) -> Result<Vec<Job>, AppError> {
        sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE status = 'discovered' ORDER BY discovered_at ASC, id",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(into_job)
        .collect()
    }

    async fn bulk_create(&self, jobs: &[NewJob]) -> Result<ImportSummary, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut summary = ImportSummary::default();

        for job in jobs {
            let inserted = sqlx::query(
                r#"
                INSERT INTO jobs (id, source, title, employer, job_url, location, description, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7, 'discovered')
                ON CONFLICT (job_url) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(job.source.as_str())
            .bind(&job.title)
            .bind(&job.employer)
            .bind(&job.job_url)
            .bind(&job.location)
            .bind(&job.description)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted > 0 {
                summary.created += 1;
            } else {
                summary.skipped += 1;
            }
        }

        tx.commit().await?;
        info!(
            created = summary.created,
            skipped = summary.skipped,
            "Imported discovered jobs"
        );
        Ok(summary)
    }

    async fn update_job(&self, id: Uuid, patch: JobPatch) -> Result<Option<Job>, AppError> {
        self.apply_patch(id, patch, None).await
    }

    async fn transition_job(
        &self,
        id: Uuid,
        from: &[JobStatus],
        patch: JobPatch,
    ) -> Result<Option<Job>, AppError> {
        let updated = self.apply_patch(id, patch, Some(from)).await?;
        if updated.is_none() {
            debug!(%id, ?from, "Status-guarded update matched no row");
        }
        Ok(updated)
    }

    async fn create_pipeline_run(&self) -> Result<PipelineRunRow, AppError> {
        Ok(sqlx::query_as::<_, PipelineRunRow>(
            "INSERT INTO pipeline_runs (id, status) VALUES ($1, $2) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(PipelineRunStatus::Running.as_str())
        .fetch_one(&self.pool)
        .await?)
    }

    async fn finish_pipeline_run(
        &self,
        id: Uuid,
        update: PipelineRunUpdate,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $2, jobs_discovered = $3, jobs_processed = $4,
                error_message = $5, completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status.as_str())
        .bind(update.jobs_discovered)
        .bind(update.jobs_processed)
        .bind(update.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_pipeline_run(&self) -> Result<Option<PipelineRunRow>, AppError> {
        Ok(sqlx::query_as::<_, PipelineRunRow>(
            "SELECT * FROM pipeline_runs ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?)
    }
}
