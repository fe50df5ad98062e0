//! Pipeline driver: sequences the stages and owns the run lifecycle.
//!
//! One run at a time. Each run gets a persisted record, a fresh [`CancelFlag`]
//! threaded through every stage, and a checkpoint between stages where a
//! pending cancel ends the run as `cancelled`.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineSettings;
use crate::finalize::JobFinalizer;
use crate::models::job::JobSource;
use crate::models::pipeline::{PipelineRunStatus, PipelineRunUpdate};
use crate::pipeline::discovery::discover_jobs;
use crate::pipeline::import::import_jobs;
use crate::pipeline::processing::process_jobs;
use crate::pipeline::progress::{PipelineStep, ProgressTracker};
use crate::pipeline::scoring::ScoringStage;
use crate::pipeline::selection::select_jobs;
use crate::pipeline::webhook::{PipelineEvent, WebhookNotifier};
use crate::pipeline::{CancelFlag, PipelineError};
use crate::profile::{load_profile_or_empty, ProfileLoader};
use crate::sources::SourceRegistry;
use crate::store::JobStore;

/// Per-run overrides on top of the configured [`PipelineSettings`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunRequest {
    pub top_n: Option<usize>,
    pub min_suitability_score: Option<f64>,
    pub sources: Option<Vec<JobSource>>,
    /// `false` skips discovery and import and works on already-stored jobs.
    pub enable_crawling: Option<bool>,
}

impl PipelineRunRequest {
    fn merge(&self, base: &PipelineSettings) -> PipelineSettings {
        let mut merged = base.clone();
        if let Some(top_n) = self.top_n {
            merged.top_n = top_n;
        }
        if let Some(min) = self.min_suitability_score {
            merged.min_suitability_score = min;
        }
        if let Some(sources) = &self.sources {
            merged.sources = sources.clone();
        }
        merged
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSummary {
    pub success: bool,
    pub pipeline_run_id: Uuid,
    pub jobs_discovered: usize,
    pub jobs_imported: usize,
    pub jobs_scored: usize,
    pub jobs_selected: usize,
    pub jobs_processed: usize,
    pub source_errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub accepted: bool,
    pub already_requested: bool,
    pub pipeline_run_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatus {
    pub is_running: bool,
    pub pipeline_run_id: Option<Uuid>,
    pub cancel_requested: bool,
}

/// Collaborators a run needs.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn JobStore>,
    pub registry: SourceRegistry,
    pub scoring: ScoringStage,
    pub finalizer: Arc<dyn JobFinalizer>,
    pub profile: Arc<dyn ProfileLoader>,
    pub webhook: WebhookNotifier,
}

struct ActiveRun {
    run_id: Option<Uuid>,
    cancel: CancelFlag,
}

pub struct PipelineDriver {
    deps: PipelineDeps,
    settings: PipelineSettings,
    progress: ProgressTracker,
    active: Mutex<Option<ActiveRun>>,
}

/// Clears the active slot when a run ends, however it ends.
struct ActiveGuard<'a>(&'a Mutex<Option<ActiveRun>>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Default)]
struct RunCounts {
    discovered: usize,
    imported: usize,
    scored: usize,
    selected: usize,
    processed: usize,
    source_errors: Vec<String>,
}

fn checkpoint(cancel: &CancelFlag) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

impl PipelineDriver {
    pub fn new(deps: PipelineDeps, settings: PipelineSettings) -> Self {
        Self {
            deps,
            settings,
            progress: ProgressTracker::new(),
            active: Mutex::new(None),
        }
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.deps.store
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> DriverStatus {
        let active = self.lock_active();
        DriverStatus {
            is_running: active.is_some(),
            pipeline_run_id: active.as_ref().and_then(|a| a.run_id),
            cancel_requested: active.as_ref().is_some_and(|a| a.cancel.is_cancelled()),
        }
    }

    /// Flags the running pipeline for cancellation at its next checkpoint.
    pub fn request_cancel(&self) -> CancelResponse {
        let active = self.lock_active();
        match active.as_ref() {
            Some(run) => {
                let first = run.cancel.cancel();
                if first {
                    info!(run_id = ?run.run_id, "Pipeline cancel requested");
                }
                CancelResponse {
                    accepted: true,
                    already_requested: !first,
                    pipeline_run_id: run.run_id,
                }
            }
            None => CancelResponse {
                accepted: false,
                already_requested: false,
                pipeline_run_id: None,
            },
        }
    }

    /// Claims the single run slot.
    fn reserve(&self) -> Result<CancelFlag, PipelineError> {
        let mut active = self.lock_active();
        if active.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }
        let cancel = CancelFlag::new();
        *active = Some(ActiveRun {
            run_id: None,
            cancel: cancel.clone(),
        });
        Ok(cancel)
    }

    /// Starts a run in the background. Fails straight away if one is active.
    pub fn start(self: &Arc<Self>, request: PipelineRunRequest) -> Result<(), PipelineError> {
        let cancel = self.reserve()?;
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = driver.run_reserved(cancel, request).await {
                error!(error = %err, "Pipeline run aborted");
            }
        });
        Ok(())
    }

    /// Runs the whole pipeline. Stage failures and cancellation end up in the
    /// returned summary; `Err` means the run could not start or its record
    /// could not be written.
    pub async fn run(&self, request: PipelineRunRequest) -> Result<PipelineRunSummary, PipelineError> {
        let cancel = self.reserve()?;
        self.run_reserved(cancel, request).await
    }

    async fn run_reserved(
        &self,
        cancel: CancelFlag,
        request: PipelineRunRequest,
    ) -> Result<PipelineRunSummary, PipelineError> {
        let _guard = ActiveGuard(&self.active);

        self.progress.run_started();
        let run = match self.deps.store.create_pipeline_run().await {
            Ok(run) => run,
            Err(err) => {
                self.progress
                    .finished(PipelineStep::Failed, format!("Could not record pipeline run: {err}"));
                return Err(err.into());
            }
        };
        if let Some(active) = self.lock_active().as_mut() {
            active.run_id = Some(run.id);
        }
        info!(run_id = %run.id, "Pipeline run started");

        let settings = request.merge(&self.settings);
        let crawl = request.enable_crawling.unwrap_or(true);
        let mut counts = RunCounts::default();
        let outcome = self.execute(&settings, crawl, &cancel, &mut counts).await;

        let mut summary = PipelineRunSummary {
            success: outcome.is_ok(),
            pipeline_run_id: run.id,
            jobs_discovered: counts.discovered,
            jobs_imported: counts.imported,
            jobs_scored: counts.scored,
            jobs_selected: counts.selected,
            jobs_processed: counts.processed,
            source_errors: counts.source_errors,
            error: None,
        };

        let status = match &outcome {
            Ok(()) => PipelineRunStatus::Completed,
            Err(PipelineError::Cancelled) => PipelineRunStatus::Cancelled,
            Err(_) => PipelineRunStatus::Failed,
        };
        if let Err(err) = &outcome {
            summary.error = Some(err.to_string());
        }

        let recorded = self
            .deps
            .store
            .finish_pipeline_run(
                run.id,
                PipelineRunUpdate {
                    status,
                    jobs_discovered: summary.jobs_discovered as i32,
                    jobs_processed: summary.jobs_processed as i32,
                    error_message: summary.error.clone(),
                },
            )
            .await;
        if let Err(err) = recorded {
            error!(run_id = %run.id, error = %err, "Failed to record pipeline run outcome");
            self.progress
                .finished(PipelineStep::Failed, format!("Could not record pipeline run: {err}"));
            return Err(err.into());
        }

        match status {
            PipelineRunStatus::Completed => {
                self.progress.finished(
                    PipelineStep::Completed,
                    format!("Pipeline completed: {} job(s) processed", summary.jobs_processed),
                );
                info!(run_id = %run.id, processed = summary.jobs_processed, "Pipeline run completed");
                self.deps
                    .webhook
                    .notify(PipelineEvent::Completed, webhook_payload(&summary))
                    .await;
            }
            PipelineRunStatus::Cancelled => {
                self.progress.finished(PipelineStep::Cancelled, "Pipeline cancelled");
                warn!(run_id = %run.id, "Pipeline run cancelled");
            }
            _ => {
                let message = summary.error.clone().unwrap_or_default();
                self.progress.finished(PipelineStep::Failed, message.clone());
                error!(run_id = %run.id, error = %message, "Pipeline run failed");
                self.deps
                    .webhook
                    .notify(PipelineEvent::Failed, webhook_payload(&summary))
                    .await;
            }
        }

        Ok(summary)
    }

    async fn execute(
        &self,
        settings: &PipelineSettings,
        crawl: bool,
        cancel: &CancelFlag,
        counts: &mut RunCounts,
    ) -> Result<(), PipelineError> {
        let profile = load_profile_or_empty(self.deps.profile.as_ref()).await;
        checkpoint(cancel)?;

        if crawl {
            let discovered = discover_jobs(&self.deps.registry, settings, &self.progress, cancel).await?;
            counts.discovered = discovered.jobs.len();
            counts.source_errors = discovered.source_errors;
            checkpoint(cancel)?;

            let imported = import_jobs(self.deps.store.as_ref(), &discovered.jobs, &self.progress).await?;
            counts.imported = imported.created;
            checkpoint(cancel)?;
        }

        let scoring = self
            .deps
            .scoring
            .run(&profile, settings, &self.progress, cancel)
            .await?;
        counts.scored = scoring.scored.len();
        checkpoint(cancel)?;

        let selected = select_jobs(&scoring.scored, settings.min_suitability_score, settings.top_n);
        counts.selected = selected.len();
        info!(selected = selected.len(), "Selected jobs for processing");

        counts.processed =
            process_jobs(self.deps.finalizer.as_ref(), &selected, &self.progress, cancel).await;
        checkpoint(cancel)?;

        Ok(())
    }
}

fn webhook_payload(summary: &PipelineRunSummary) -> serde_json::Value {
    json!({
        "pipelineRunId": summary.pipeline_run_id,
        "jobsDiscovered": summary.jobs_discovered,
        "jobsScored": summary.jobs_scored,
        "jobsProcessed": summary.jobs_processed,
        "sourceErrors": summary.source_errors,
        "error": summary.error,
    })
}
