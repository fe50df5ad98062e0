//! Progress side channel for pipeline runs.
//!
//! Stages push counters into a `watch` channel; HTTP consumers subscribe and get
//! the latest snapshot. Delivery is best-effort: slow readers only ever see the
//! newest value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::models::job::JobSource;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    #[default]
    Idle,
    Crawling,
    Importing,
    Scoring,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlProgress {
    pub sources_completed: usize,
    pub sources_total: usize,
    pub current_source: Option<String>,
    pub phase: Option<String>,
    pub terms_processed: Option<u32>,
    pub terms_total: Option<u32>,
    pub jobs_found: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub step: PipelineStep,
    pub message: String,
    pub detail: Option<String>,
    pub crawl: CrawlProgress,
    pub jobs_discovered: usize,
    pub jobs_scored: usize,
    pub jobs_processed: usize,
    pub total_to_process: usize,
    pub current_job: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Adapter-reported crawl progress. Every field is optional; absent ones keep
/// their previous value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceProgressEvent {
    pub phase: Option<String>,
    pub terms_processed: Option<u32>,
    pub terms_total: Option<u32>,
    pub jobs_found: Option<u32>,
    pub detail: Option<String>,
}

#[derive(Clone)]
pub struct ProgressTracker {
    tx: Arc<watch::Sender<ProgressSnapshot>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.tx.borrow().clone()
    }

    fn update(&self, f: impl FnOnce(&mut ProgressSnapshot)) {
        self.tx.send_modify(|snapshot| {
            f(snapshot);
            snapshot.updated_at = Some(Utc::now());
        });
    }

    pub fn run_started(&self) {
        self.tx.send_replace(ProgressSnapshot {
            message: "Pipeline started".to_string(),
            started_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
            ..ProgressSnapshot::default()
        });
    }

    pub fn start_crawling(&self, sources_total: usize) {
        self.update(|s| {
            s.step = PipelineStep::Crawling;
            s.message = format!("Fetching jobs from {sources_total} source group(s)");
            s.crawl = CrawlProgress {
                sources_total,
                ..CrawlProgress::default()
            };
        });
    }

    pub fn start_source(&self, source: &str, completed: usize, total: usize, detail: &str) {
        self.update(|s| {
            s.step = PipelineStep::Crawling;
            s.crawl.current_source = Some(source.to_string());
            s.crawl.sources_completed = completed;
            s.crawl.sources_total = total;
            s.crawl.phase = None;
            s.crawl.terms_processed = None;
            s.crawl.jobs_found = None;
            s.detail = Some(detail.to_string());
        });
    }

    pub fn source_progress(&self, source: &str, event: &SourceProgressEvent) {
        self.update(|s| {
            s.crawl.current_source = Some(source.to_string());
            if event.phase.is_some() {
                s.crawl.phase = event.phase.clone();
            }
            if event.terms_processed.is_some() {
                s.crawl.terms_processed = event.terms_processed;
            }
            if event.terms_total.is_some() {
                s.crawl.terms_total = event.terms_total;
            }
            if event.jobs_found.is_some() {
                s.crawl.jobs_found = event.jobs_found;
            }
            if event.detail.is_some() {
                s.detail = event.detail.clone();
            }
        });
    }

    pub fn complete_source(&self, completed: usize, total: usize) {
        self.update(|s| {
            s.crawl.sources_completed = completed;
            s.crawl.sources_total = total;
            s.message = format!("Fetched {completed}/{total} source group(s)");
        });
    }

    pub fn crawling_complete(&self, jobs_found: usize) {
        self.update(|s| {
            s.crawl.current_source = None;
            s.jobs_discovered = jobs_found;
            s.message = format!("Discovery finished: {jobs_found} job(s) found");
        });
    }

    pub fn import_complete(&self, created: usize, skipped: usize) {
        self.update(|s| {
            s.step = PipelineStep::Importing;
            s.message = format!("Imported {created} new job(s), {skipped} duplicate(s) skipped");
        });
    }

    pub fn scoring_started(&self, total: usize) {
        self.update(|s| {
            s.step = PipelineStep::Scoring;
            s.jobs_discovered = total;
            s.jobs_scored = 0;
            s.jobs_processed = 0;
            s.total_to_process = 0;
            s.current_job = None;
            s.message = format!("Scoring {total} job(s)");
        });
    }

    pub fn scoring_job(&self, completed: usize, total: usize, label: &str) {
        self.update(|s| {
            s.jobs_scored = completed;
            s.current_job = Some(label.to_string());
            s.message = format!("Scored {completed}/{total}");
        });
    }

    pub fn scoring_complete(&self, scored: usize) {
        self.update(|s| {
            s.jobs_scored = scored;
            s.current_job = None;
            s.message = format!("Scoring finished: {scored} job(s) scored");
        });
    }

    pub fn processing_started(&self, total: usize) {
        self.update(|s| {
            s.step = PipelineStep::Processing;
            s.jobs_processed = 0;
            s.total_to_process = total;
            s.message = format!("Processing {total} selected job(s)");
        });
    }

    pub fn processing_job(&self, started: usize, total: usize, title: &str) {
        self.update(|s| {
            s.current_job = Some(title.to_string());
            s.message = format!("Processing {started}/{total}: {title}");
        });
    }

    pub fn job_complete(&self, completed: usize, total: usize) {
        self.update(|s| {
            s.jobs_processed = completed;
            s.total_to_process = total;
        });
    }

    pub fn finished(&self, step: PipelineStep, message: impl Into<String>) {
        let message = message.into();
        self.update(|s| {
            s.step = step;
            s.current_job = None;
            s.message = message;
        });
    }
}

/// Per-adapter progress handle: a tracker pinned to one adapter label.
#[derive(Clone)]
pub struct SourceProgress {
    tracker: ProgressTracker,
    label: String,
}

impl SourceProgress {
    pub fn new(tracker: ProgressTracker, label: impl Into<String>) -> Self {
        Self {
            tracker,
            label: label.into(),
        }
    }

    pub fn report(&self, event: SourceProgressEvent) {
        self.tracker.source_progress(&self.label, &event);
    }
}

pub fn source_labels(sources: &[JobSource]) -> String {
    sources
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_see_latest_snapshot() {
        let tracker = ProgressTracker::new();
        let rx = tracker.subscribe();

        tracker.run_started();
        tracker.start_crawling(2);
        tracker.start_source("jobspy", 0, 2, "JobSpy: indeed, linkedin...");
        tracker.source_progress(
            "jobspy",
            &SourceProgressEvent {
                phase: Some("list".into()),
                terms_processed: Some(1),
                terms_total: Some(3),
                ..SourceProgressEvent::default()
            },
        );
        tracker.complete_source(1, 2);

        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.step, PipelineStep::Crawling);
        assert_eq!(snapshot.crawl.sources_completed, 1);
        assert_eq!(snapshot.crawl.current_source.as_deref(), Some("jobspy"));
        assert_eq!(snapshot.crawl.terms_total, Some(3));
        assert_eq!(snapshot.detail.as_deref(), Some("JobSpy: indeed, linkedin..."));
    }

    #[test]
    fn test_run_started_resets_counters() {
        let tracker = ProgressTracker::new();
        tracker.scoring_started(10);
        tracker.scoring_job(4, 10, "Rust Engineer");
        tracker.run_started();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.step, PipelineStep::Idle);
        assert_eq!(snapshot.jobs_scored, 0);
        assert!(snapshot.started_at.is_some());
    }

    #[test]
    fn test_source_labels_join() {
        assert_eq!(
            source_labels(&[JobSource::Indeed, JobSource::Linkedin]),
            "indeed,linkedin"
        );
    }
}
