//! Scoring stage: rates every discovered job against the profile.
//!
//! A job that already carries a numeric score is reused as-is. Otherwise the
//! scorer runs, the employer is matched against the sponsor register, and both
//! land in one update, together with an auto-skip when the score falls under
//! the configured threshold. A failing job is logged and left out; it never
//! stops its siblings.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::config::PipelineSettings;
use crate::errors::AppError;
use crate::models::job::{Job, JobPatch, JobStatus, ScoredJob};
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::CancelFlag;
use crate::pool::BoundedPool;
use crate::scoring::{
    summarize_sponsor_matches, JobScorer, SponsorMatcher, SPONSOR_MIN_SCORE, SPONSOR_SEARCH_LIMIT,
};
use crate::store::JobStore;

const SCORING_CONCURRENCY: f64 = 4.0;

#[derive(Debug, Default)]
pub struct ScoringOutcome {
    /// Scored jobs still eligible for selection, in listing order.
    pub scored: Vec<ScoredJob>,
    pub auto_skipped: usize,
    pub failed: usize,
}

enum JobScoreOutcome {
    Cached(ScoredJob),
    Scored(ScoredJob),
    AutoSkipped,
    Failed,
    Abandoned,
}

#[derive(Clone)]
pub struct ScoringStage {
    store: Arc<dyn JobStore>,
    scorer: Arc<dyn JobScorer>,
    sponsors: Arc<dyn SponsorMatcher>,
}

impl ScoringStage {
    pub fn new(
        store: Arc<dyn JobStore>,
        scorer: Arc<dyn JobScorer>,
        sponsors: Arc<dyn SponsorMatcher>,
    ) -> Self {
        Self {
            store,
            scorer,
            sponsors,
        }
    }

    /// Computes a fresh score and sponsor match for `job` without persisting.
    async fn compute(&self, job: &Job, profile: &Value) -> Result<JobPatch, AppError> {
        let suitability = self.scorer.score(job, profile).await?;

        let sponsor = match job.employer.as_deref() {
            Some(employer) => {
                let matches = self
                    .sponsors
                    .search(employer, SPONSOR_SEARCH_LIMIT, SPONSOR_MIN_SCORE);
                summarize_sponsor_matches(&matches)
            }
            None => Default::default(),
        };

        Ok(JobPatch {
            suitability_score: Some(suitability.score),
            suitability_reason: Some(suitability.reason),
            sponsor_match_score: Some(sponsor.score),
            sponsor_match_names: sponsor.names,
            ..JobPatch::default()
        })
    }

    async fn persist(&self, job: &Job, mut patch: JobPatch, auto_skip_below: Option<f64>) -> Result<Job, AppError> {
        let score = patch.suitability_score.unwrap_or_default();
        let auto_skip = job.status != JobStatus::Applied
            && auto_skip_below.is_some_and(|threshold| score < threshold);

        if auto_skip {
            patch.status = Some(JobStatus::Skipped);
            info!(job_id = %job.id, title = %job.title, score, threshold = ?auto_skip_below, "Auto-skipped job due to low score");
        }

        self.store
            .update_job(job.id, patch)
            .await?
            .ok_or_else(|| AppError::NotFound("Job not found".into()))
    }

    /// Recomputes and persists the score for one job, ignoring any cached
    /// value. Used by the `rescore` action; never auto-skips.
    pub async fn rescore(&self, job: &Job, profile: &Value) -> Result<Job, AppError> {
        let patch = self.compute(job, profile).await?;
        self.persist(job, patch, None).await
    }

    async fn score_one(
        &self,
        job: Job,
        profile: &Value,
        settings: &PipelineSettings,
        cancel: &CancelFlag,
    ) -> JobScoreOutcome {
        if cancel.is_cancelled() {
            return JobScoreOutcome::Abandoned;
        }

        if let Some(score) = job.cached_score() {
            let reason = job.suitability_reason.clone().unwrap_or_default();
            return JobScoreOutcome::Cached(ScoredJob {
                job,
                suitability_score: score,
                suitability_reason: reason,
            });
        }

        let patch = match self.compute(&job, profile).await {
            Ok(patch) => patch,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Scoring failed for job; leaving it unscored");
                return JobScoreOutcome::Failed;
            }
        };
        if cancel.is_cancelled() {
            return JobScoreOutcome::Abandoned;
        }

        match self.persist(&job, patch, settings.auto_skip_score_threshold).await {
            Ok(updated) if updated.status == JobStatus::Skipped => JobScoreOutcome::AutoSkipped,
            Ok(updated) => JobScoreOutcome::Scored(ScoredJob {
                suitability_score: updated.suitability_score.unwrap_or_default(),
                suitability_reason: updated.suitability_reason.clone().unwrap_or_default(),
                job: updated,
            }),
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "Failed to persist score");
                JobScoreOutcome::Failed
            }
        }
    }

    pub async fn run(
        &self,
        profile: &Value,
        settings: &PipelineSettings,
        progress: &ProgressTracker,
        cancel: &CancelFlag,
    ) -> Result<ScoringOutcome, AppError> {
        info!(backend = self.scorer.backend(), "Running scoring step");
        let jobs = self.store.list_discovered_for_scoring().await?;
        let total = jobs.len();
        progress.scoring_started(total);

        let completed = AtomicUsize::new(0);
        let pool = BoundedPool::<Job, JobScoreOutcome, Infallible>::new(SCORING_CONCURRENCY)
            .should_stop(|| cancel.is_cancelled())
            .on_task_settled(|job, _, outcome| {
                let label = match outcome {
                    Ok(JobScoreOutcome::Cached(_)) => format!("{} (cached)", job.title),
                    Ok(JobScoreOutcome::Failed | JobScoreOutcome::Abandoned) => return,
                    _ => job.title.clone(),
                };
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                progress.scoring_job(done, total, &label);
            });

        let outcomes = pool
            .run(&jobs, |job, _| async move { Ok(self.score_one(job, profile, settings, cancel).await) })
            .await
            .unwrap_or_else(|never| match never {});

        let mut result = ScoringOutcome::default();
        for outcome in outcomes {
            match outcome {
                JobScoreOutcome::Cached(scored) | JobScoreOutcome::Scored(scored) => {
                    result.scored.push(scored)
                }
                JobScoreOutcome::AutoSkipped => result.auto_skipped += 1,
                JobScoreOutcome::Failed => result.failed += 1,
                JobScoreOutcome::Abandoned => {}
            }
        }

        progress.scoring_complete(result.scored.len() + result.auto_skipped);
        info!(
            scored = result.scored.len(),
            auto_skipped = result.auto_skipped,
            failed = result.failed,
            "Scoring step completed"
        );
        Ok(result)
    }
}
