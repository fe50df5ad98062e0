//! Test doubles shared by stage, action and driver tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::job::{Job, JobPatch, JobStatus, NewJob};
use crate::models::pipeline::{PipelineRunRow, PipelineRunStatus, PipelineRunUpdate};
use crate::profile::ProfileLoader;
use crate::store::{ImportSummary, JobStore};

pub fn make_job(title: &str, status: JobStatus) -> Job {
    let now = Utc::now();
    Job {
        id: Uuid::new_v4(),
        source: "indeed".to_string(),
        title: title.to_string(),
        employer: Some(format!("{title} Ltd")),
        job_url: format!("https://jobs.example.com/{}", Uuid::new_v4()),
        location: Some("London".to_string()),
        description: Some(format!("We are hiring a {title}. Rust, Postgres, Kubernetes.")),
        status,
        suitability_score: None,
        suitability_reason: None,
        sponsor_match_score: None,
        sponsor_match_names: None,
        tailored_headline: None,
        tailored_summary: None,
        tailored_skills: vec![],
        artifact_key: None,
        discovered_at: now,
        updated_at: now,
    }
}

pub fn make_scored(title: &str, score: f64) -> crate::models::job::ScoredJob {
    let mut job = make_job(title, JobStatus::Discovered);
    job.suitability_score = Some(score);
    crate::models::job::ScoredJob {
        job,
        suitability_score: score,
        suitability_reason: format!("{title} scored {score}"),
    }
}

/// In-memory `JobStore`. Keeps insertion order, counts reads, and can delay
/// `get_job` per id to shape concurrent test timelines.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
    runs: Mutex<Vec<PipelineRunRow>>,
    delays: Mutex<HashMap<Uuid, Duration>>,
    get_calls: AtomicUsize,
    update_calls: AtomicUsize,
    fail_run_finish: AtomicBool,
}

impl MemoryJobStore {
    pub fn with_jobs(jobs: Vec<Job>) -> Self {
        Self {
            jobs: Mutex::new(jobs),
            ..Self::default()
        }
    }

    pub fn delay(&self, id: Uuid, delay: Duration) {
        self.delays.lock().unwrap().insert(id, delay);
    }

    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned()
    }

    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<PipelineRunRow> {
        self.runs.lock().unwrap().clone()
    }

    /// Makes every later `finish_pipeline_run` fail.
    pub fn fail_run_finish(&self) {
        self.fail_run_finish.store(true, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn patch_in_place(&self, id: Uuid, patch: JobPatch, from: Option<&[JobStatus]>) -> Option<Job> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.iter_mut().find(|j| j.id == id)?;
        if let Some(from) = from {
            if !from.contains(&job.status) {
                return None;
            }
        }
        if let Some(status) = patch.status {
            job.status = status;
        }
        if let Some(score) = patch.suitability_score {
            job.suitability_score = Some(score);
        }
        if let Some(reason) = patch.suitability_reason {
            job.suitability_reason = Some(reason);
        }
        if let Some(score) = patch.sponsor_match_score {
            job.sponsor_match_score = Some(score);
        }
        if let Some(names) = patch.sponsor_match_names {
            job.sponsor_match_names = Some(names);
        }
        if let Some(headline) = patch.tailored_headline {
            job.tailored_headline = Some(headline);
        }
        if let Some(summary) = patch.tailored_summary {
            job.tailored_summary = Some(summary);
        }
        if let Some(skills) = patch.tailored_skills {
            job.tailored_skills = skills;
        }
        if let Some(key) = patch.artifact_key {
            job.artifact_key = Some(key);
        }
        job.updated_at = Utc::now();
        Some(job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.lock().unwrap().get(&id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.job(id))
    }

    async fn list_discovered_for_scoring(&self) -> Result<Vec<Job>, AppError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.status == JobStatus::Discovered)
            .cloned()
            .collect())
    }

    async fn bulk_create(&self, new_jobs: &[NewJob]) -> Result<ImportSummary, AppError> {
        let mut jobs = self.jobs.lock().unwrap();
        let mut summary = ImportSummary::default();
        for new_job in new_jobs {
            if jobs.iter().any(|j| j.job_url == new_job.job_url) {
                summary.skipped += 1;
                continue;
            }
            let mut job = make_job(&new_job.title, JobStatus::Discovered);
            job.source = new_job.source.as_str().to_string();
            job.employer = new_job.employer.clone();
            job.job_url = new_job.job_url.clone();
            job.location = new_job.location.clone();
            job.description = new_job.description.clone();
            jobs.push(job);
            summary.created += 1;
        }
        Ok(summary)
    }

    async fn update_job(&self, id: Uuid, patch: JobPatch) -> Result<Option<Job>, AppError> {
        Ok(self.patch_in_place(id, patch, None))
    }

    async fn transition_job(
        &self,
        id: Uuid,
        from: &[JobStatus],
        patch: JobPatch,
    ) -> Result<Option<Job>, AppError> {
        Ok(self.patch_in_place(id, patch, Some(from)))
    }

    async fn create_pipeline_run(&self) -> Result<PipelineRunRow, AppError> {
        let run = PipelineRunRow {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            status: PipelineRunStatus::Running.as_str().to_string(),
            jobs_discovered: 0,
            jobs_processed: 0,
            error_message: None,
        };
        self.runs.lock().unwrap().push(run.clone());
        Ok(run)
    }

    async fn finish_pipeline_run(
        &self,
        id: Uuid,
        update: PipelineRunUpdate,
    ) -> Result<(), AppError> {
        if self.fail_run_finish.load(Ordering::SeqCst) {
            return Err(AppError::Internal(anyhow::anyhow!("pipeline_runs is unavailable")));
        }
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.iter_mut().find(|r| r.id == id) {
            run.status = update.status.as_str().to_string();
            run.jobs_discovered = update.jobs_discovered;
            run.jobs_processed = update.jobs_processed;
            run.error_message = update.error_message;
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn latest_pipeline_run(&self) -> Result<Option<PipelineRunRow>, AppError> {
        Ok(self.runs.lock().unwrap().last().cloned())
    }
}

/// Profile loader returning a fixed value (or a fixed failure), optionally
/// after a delay. Counts loads.
pub struct StaticProfile {
    value: Option<Value>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticProfile {
    pub fn new(value: Value) -> Self {
        Self {
            value: Some(value),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            value: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileLoader for StaticProfile {
    async fn load(&self) -> Result<Value, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.value
            .clone()
            .ok_or_else(|| AppError::NotFound("Profile not found".into()))
    }
}
