//! Discovery stage: fans requested sources out to their adapters and merges
//! what comes back.
//!
//! Sources sharing an adapter are grouped into a single run. Adapter failures
//! never escape a task: each becomes a labelled `"<source>: <message>"` string.
//! The stage only fails outright when nothing survived filtering and at least
//! one source reported an error.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::PipelineSettings;
use crate::models::job::{JobSource, NewJob};
use crate::pipeline::progress::{source_labels, ProgressTracker, SourceProgress};
use crate::pipeline::{CancelFlag, PipelineError};
use crate::pool::BoundedPool;
use crate::sources::{SourceAdapter, SourceRegistry, SourceResult, SourceRunContext};

const DISCOVERY_CONCURRENCY: f64 = 3.0;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryOutcome {
    pub jobs: Vec<NewJob>,
    /// Advisory: the caller logs these, it does not fail on them.
    pub source_errors: Vec<String>,
}

#[derive(Clone)]
struct SourceGroup {
    adapter: Arc<dyn SourceAdapter>,
    sources: Vec<JobSource>,
}

impl SourceGroup {
    fn detail(&self) -> String {
        if self.sources.len() > 1 {
            let names: Vec<&str> = self.sources.iter().map(|s| s.as_str()).collect();
            format!("{}: {}...", self.adapter.display_name(), names.join(", "))
        } else {
            format!("{}: fetching jobs...", self.adapter.display_name())
        }
    }
}

#[derive(Default)]
struct GroupOutcome {
    jobs: Vec<NewJob>,
    errors: Vec<String>,
}

/// Groups `requested` by adapter id, keeping first-seen order. Tags without an
/// adapter are reported as errors.
fn group_sources(registry: &SourceRegistry, requested: &[JobSource]) -> (Vec<SourceGroup>, Vec<String>) {
    let mut groups: Vec<SourceGroup> = Vec::new();
    let mut errors = Vec::new();

    for &source in requested {
        let Some(adapter) = registry.adapter_for(source) else {
            errors.push(format!("{source}: no source adapter registered"));
            continue;
        };

        match groups.iter_mut().find(|g| g.adapter.id() == adapter.id()) {
            Some(group) if group.sources.contains(&source) => {}
            Some(group) => group.sources.push(source),
            None => groups.push(SourceGroup {
                adapter: Arc::clone(adapter),
                sources: vec![source],
            }),
        }
    }

    (groups, errors)
}

pub fn is_blocked_employer(employer: Option<&str>, blocked_lowercase: &[String]) -> bool {
    let Some(employer) = employer else {
        return false;
    };
    let employer = employer.to_lowercase();
    blocked_lowercase.iter().any(|keyword| employer.contains(keyword.as_str()))
}

async fn run_group(
    group: SourceGroup,
    settings: &PipelineSettings,
    progress: &ProgressTracker,
    cancel: &CancelFlag,
) -> Result<GroupOutcome, Infallible> {
    let adapter_id = group.adapter.id();
    let ctx = SourceRunContext {
        sources: group.sources.clone(),
        search_terms: settings.search_terms.clone(),
        location: settings.location.clone(),
        results_per_term: settings.results_per_term,
        cancel: cancel.clone(),
        progress: SourceProgress::new(progress.clone(), adapter_id),
    };

    let outcome = match group.adapter.run(ctx).await {
        Ok(SourceResult::Success { jobs }) => {
            debug!(adapter = adapter_id, found = jobs.len(), "Source finished");
            GroupOutcome {
                jobs,
                errors: vec![],
            }
        }
        Ok(SourceResult::Failure { error }) => GroupOutcome {
            jobs: vec![],
            errors: vec![format!("{}: {error}", source_labels(&group.sources))],
        },
        Err(err) => {
            warn!(adapter = adapter_id, error = %err, "Discovery source task failed");
            GroupOutcome {
                jobs: vec![],
                errors: vec![format!("{adapter_id}: {err}")],
            }
        }
    };
    Ok(outcome)
}

/// Runs every requested source and returns the merged, filtered postings.
pub async fn discover_jobs(
    registry: &SourceRegistry,
    settings: &PipelineSettings,
    progress: &ProgressTracker,
    cancel: &CancelFlag,
) -> Result<DiscoveryOutcome, PipelineError> {
    info!(sources = ?settings.sources, "Running discovery step");

    let (groups, mut source_errors) = group_sources(registry, &settings.sources);
    let total = groups.len();
    progress.start_crawling(total);

    if cancel.is_cancelled() {
        return Ok(DiscoveryOutcome {
            jobs: vec![],
            source_errors,
        });
    }

    let completed = AtomicUsize::new(0);
    let pool = BoundedPool::<SourceGroup, GroupOutcome, Infallible>::new(DISCOVERY_CONCURRENCY)
        .should_stop(|| cancel.is_cancelled())
        .on_task_started(|group, _| {
            progress.start_source(
                group.adapter.id(),
                completed.load(Ordering::SeqCst),
                total,
                &group.detail(),
            );
        })
        .on_task_settled(|_, _, _| {
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress.complete_source(done, total);
        });

    let outcomes = pool
        .run(&groups, |group, _| run_group(group, settings, progress, cancel))
        .await
        .unwrap_or_else(|never| match never {});

    let mut jobs = Vec::new();
    for outcome in outcomes {
        jobs.extend(outcome.jobs);
        source_errors.extend(outcome.errors);
    }

    let blocked: Vec<String> = settings
        .blocked_company_keywords
        .iter()
        .map(|k| k.to_lowercase())
        .collect();
    let before = jobs.len();
    jobs.retain(|job| !is_blocked_employer(job.employer.as_deref(), &blocked));
    let dropped = before - jobs.len();
    if dropped > 0 {
        info!(
            dropped,
            blocked_keyword_count = blocked.len(),
            "Dropped discovered jobs matching blocked company keywords"
        );
    }

    if cancel.is_cancelled() {
        return Ok(DiscoveryOutcome { jobs, source_errors });
    }

    if jobs.is_empty() && !source_errors.is_empty() {
        return Err(PipelineError::AllSourcesFailed(source_errors));
    }

    if !source_errors.is_empty() {
        warn!(?source_errors, "Some discovery sources failed");
    }

    progress.crawling_complete(jobs.len());
    Ok(DiscoveryOutcome { jobs, source_errors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceError;
    use async_trait::async_trait;

    enum Script {
        Jobs(Vec<NewJob>),
        Fail(&'static str),
        Error,
    }

    struct ScriptedAdapter {
        id: &'static str,
        provides: &'static [JobSource],
        script: Script,
        calls: AtomicUsize,
        seen_sources: std::sync::Mutex<Vec<Vec<JobSource>>>,
    }

    impl ScriptedAdapter {
        fn new(id: &'static str, provides: &'static [JobSource], script: Script) -> Arc<Self> {
            Arc::new(Self {
                id,
                provides,
                script,
                calls: AtomicUsize::new(0),
                seen_sources: std::sync::Mutex::new(vec![]),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for ScriptedAdapter {
        fn id(&self) -> &'static str {
            self.id
        }
        fn display_name(&self) -> &'static str {
            self.id
        }
        fn provides(&self) -> &'static [JobSource] {
            self.provides
        }
        async fn run(&self, ctx: SourceRunContext) -> Result<SourceResult, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_sources.lock().unwrap().push(ctx.sources.clone());
            match &self.script {
                Script::Jobs(jobs) => Ok(SourceResult::Success { jobs: jobs.clone() }),
                Script::Fail(error) => Ok(SourceResult::Failure {
                    error: error.to_string(),
                }),
                Script::Error => Err(SourceError::Status {
                    status: 500,
                    body: "exploded".to_string(),
                }),
            }
        }
    }

    fn posting(title: &str, employer: &str) -> NewJob {
        NewJob {
            source: JobSource::Indeed,
            title: title.to_string(),
            employer: Some(employer.to_string()),
            job_url: format!("https://jobs.example/{title}"),
            location: None,
            description: None,
        }
    }

    fn settings(sources: Vec<JobSource>) -> PipelineSettings {
        PipelineSettings {
            sources,
            ..PipelineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_one_failing_source_is_advisory() {
        let x = posting("Backend Engineer", "Acme");
        let registry = SourceRegistry::new()
            .with(ScriptedAdapter::new("first", &[JobSource::Indeed], Script::Jobs(vec![x.clone()])))
            .with(ScriptedAdapter::new("second", &[JobSource::Adzuna], Script::Fail("boom")));

        let outcome = discover_jobs(
            &registry,
            &settings(vec![JobSource::Indeed, JobSource::Adzuna]),
            &ProgressTracker::new(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome,
            DiscoveryOutcome {
                jobs: vec![x],
                source_errors: vec!["adzuna: boom".to_string()],
            }
        );
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_a_hard_error() {
        let registry = SourceRegistry::new()
            .with(ScriptedAdapter::new("jobspy", &[JobSource::Indeed], Script::Fail("rate limited")))
            .with(ScriptedAdapter::new("adzuna", &[JobSource::Adzuna], Script::Error));

        let err = discover_jobs(
            &registry,
            &settings(vec![JobSource::Indeed, JobSource::Adzuna, JobSource::Glassdoor]),
            &ProgressTracker::new(),
            &CancelFlag::new(),
        )
        .await
        .unwrap_err();

        let message = err.to_string();
        assert!(message.starts_with("All sources failed: "));
        assert!(message.contains("glassdoor: no source adapter registered"));
        assert!(message.contains("indeed: rate limited"));
        assert!(message.contains("adzuna: upstream returned 500: exploded"));
    }

    #[tokio::test]
    async fn test_sources_sharing_an_adapter_run_once() {
        let shared = ScriptedAdapter::new(
            "jobspy",
            &[JobSource::Indeed, JobSource::Linkedin],
            Script::Jobs(vec![posting("Rust Dev", "Ferris")]),
        );
        let registry = SourceRegistry::new().with(shared.clone());
        let tracker = ProgressTracker::new();

        let outcome = discover_jobs(
            &registry,
            &settings(vec![JobSource::Indeed, JobSource::Linkedin, JobSource::Indeed]),
            &tracker,
            &CancelFlag::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome.jobs.len(), 1);
        assert_eq!(shared.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *shared.seen_sources.lock().unwrap(),
            vec![vec![JobSource::Indeed, JobSource::Linkedin]]
        );
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.crawl.sources_completed, 1);
        assert_eq!(snapshot.jobs_discovered, 1);
    }

    #[tokio::test]
    async fn test_blocked_employers_are_dropped() {
        let registry = SourceRegistry::new().with(ScriptedAdapter::new(
            "jobspy",
            &[JobSource::Indeed],
            Script::Jobs(vec![
                posting("A", "Mega Recruitment Ltd"),
                posting("B", "Honest Engineering"),
            ]),
        ));
        let mut settings = settings(vec![JobSource::Indeed]);
        settings.blocked_company_keywords = vec!["RECRUITMENT".to_string()];

        let outcome = discover_jobs(&registry, &settings, &ProgressTracker::new(), &CancelFlag::new())
            .await
            .unwrap();

        let titles: Vec<&str> = outcome.jobs.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["B"]);
    }

    #[tokio::test]
    async fn test_filtering_everything_with_errors_still_fails() {
        let registry = SourceRegistry::new()
            .with(ScriptedAdapter::new(
                "jobspy",
                &[JobSource::Indeed],
                Script::Jobs(vec![posting("A", "Blocked Corp")]),
            ))
            .with(ScriptedAdapter::new("adzuna", &[JobSource::Adzuna], Script::Fail("down")));
        let mut settings = settings(vec![JobSource::Indeed, JobSource::Adzuna]);
        settings.blocked_company_keywords = vec!["blocked".to_string()];

        let result = discover_jobs(&registry, &settings, &ProgressTracker::new(), &CancelFlag::new()).await;
        assert!(matches!(result, Err(PipelineError::AllSourcesFailed(errors)) if errors == vec!["adzuna: down"]));
    }

    #[tokio::test]
    async fn test_cancelled_discovery_skips_sources_and_never_fails() {
        let adapter = ScriptedAdapter::new("jobspy", &[JobSource::Indeed], Script::Fail("unused"));
        let registry = SourceRegistry::new().with(adapter.clone());
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = discover_jobs(
            &registry,
            &settings(vec![JobSource::Indeed, JobSource::Glassdoor]),
            &ProgressTracker::new(),
            &cancel,
        )
        .await
        .unwrap();

        assert!(outcome.jobs.is_empty());
        assert_eq!(outcome.source_errors, vec!["glassdoor: no source adapter registered"]);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_blocked_employer_match_is_case_insensitive_substring() {
        let blocked = vec!["staffing".to_string()];
        assert!(is_blocked_employer(Some("Global STAFFING Partners"), &blocked));
        assert!(!is_blocked_employer(Some("Staff Engineers Inc"), &blocked));
        assert!(!is_blocked_employer(None, &blocked));
        assert!(!is_blocked_employer(Some("anything"), &[]));
    }
}
