//! JobSpy sidecar adapter. One `POST /scrape` per search term; the sidecar
//! scrapes every requested site in a single call.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ensure_success, SourceAdapter, SourceError, SourceResult, SourceRunContext};
use crate::models::job::{JobSource, NewJob};
use crate::pipeline::progress::SourceProgressEvent;

const PROVIDES: &[JobSource] = &[JobSource::Indeed, JobSource::Linkedin, JobSource::Glassdoor];

pub struct JobSpyAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl JobSpyAdapter {
    pub fn new(http: reqwest::Client, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    site_name: Vec<&'static str>,
    search_term: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    results_wanted: u32,
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    jobs: Vec<ScrapedJob>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScrapedJob {
    site: String,
    title: Option<String>,
    company: Option<String>,
    job_url: Option<String>,
    location: Option<String>,
    description: Option<String>,
}

impl ScrapedJob {
    /// Drops rows without a title or URL, or from a site we did not ask for.
    fn into_new_job(self, requested: &[JobSource]) -> Option<NewJob> {
        let source = self.site.parse::<JobSource>().ok()?;
        if !requested.contains(&source) {
            return None;
        }
        Some(NewJob {
            source,
            title: self.title.filter(|t| !t.trim().is_empty())?,
            employer: self.company,
            job_url: self.job_url.filter(|u| !u.trim().is_empty())?,
            location: self.location,
            description: self.description,
        })
    }
}

#[async_trait]
impl SourceAdapter for JobSpyAdapter {
    fn id(&self) -> &'static str {
        "jobspy"
    }

    fn display_name(&self) -> &'static str {
        "JobSpy"
    }

    fn provides(&self) -> &'static [JobSource] {
        PROVIDES
    }

    async fn run(&self, ctx: SourceRunContext) -> Result<SourceResult, SourceError> {
        let sites: Vec<&'static str> = ctx.sources.iter().map(|s| s.as_str()).collect();
        let terms_total = ctx.search_terms.len() as u32;
        let mut jobs = Vec::new();

        for (index, term) in ctx.search_terms.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                info!(term, "JobSpy run cancelled before next term");
                break;
            }

            ctx.progress.report(SourceProgressEvent {
                phase: Some("search".to_string()),
                terms_processed: Some(index as u32),
                terms_total: Some(terms_total),
                detail: Some(format!("JobSpy: searching \"{term}\" ({}/{terms_total})", index + 1)),
                ..SourceProgressEvent::default()
            });

            let request = ScrapeRequest {
                site_name: sites.clone(),
                search_term: term,
                location: ctx.location.as_deref(),
                results_wanted: ctx.results_per_term,
            };
            let response = self
                .http
                .post(format!("{}/scrape", self.base_url))
                .json(&request)
                .send()
                .await?;
            let body: ScrapeResponse = ensure_success(response).await?.json().await?;

            if let Some(error) = body.error {
                return Ok(SourceResult::Failure { error });
            }

            let before = jobs.len();
            jobs.extend(
                body.jobs
                    .into_iter()
                    .filter_map(|job| job.into_new_job(&ctx.sources)),
            );
            debug!(term, found = jobs.len() - before, "JobSpy term finished");

            ctx.progress.report(SourceProgressEvent {
                terms_processed: Some(index as u32 + 1),
                jobs_found: Some(jobs.len() as u32),
                ..SourceProgressEvent::default()
            });
        }

        Ok(SourceResult::Success { jobs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::progress::{ProgressTracker, SourceProgress};
    use crate::pipeline::CancelFlag;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context(sources: Vec<JobSource>, terms: &[&str], tracker: &ProgressTracker) -> SourceRunContext {
        SourceRunContext {
            sources,
            search_terms: terms.iter().map(|t| t.to_string()).collect(),
            location: Some("London".to_string()),
            results_per_term: 20,
            cancel: CancelFlag::new(),
            progress: SourceProgress::new(tracker.clone(), "jobspy"),
        }
    }

    #[tokio::test]
    async fn test_collects_jobs_for_requested_sites() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/scrape"))
            .and(body_partial_json(json!({ "site_name": ["indeed"], "search_term": "rust developer" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobs": [
                    { "site": "indeed", "title": "Rust Developer", "company": "Ferris Ltd",
                      "job_url": "https://indeed.example/1", "location": "London", "description": "Rust" },
                    { "site": "linkedin", "title": "Not asked for", "job_url": "https://li.example/2" },
                    { "site": "indeed", "title": "", "job_url": "https://indeed.example/3" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tracker = ProgressTracker::new();
        let adapter = JobSpyAdapter::new(reqwest::Client::new(), server.uri());
        let result = adapter
            .run(context(vec![JobSource::Indeed], &["rust developer"], &tracker))
            .await
            .unwrap();

        let SourceResult::Success { jobs } = result else {
            panic!("expected success");
        };
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "Rust Developer");
        assert_eq!(jobs[0].employer.as_deref(), Some("Ferris Ltd"));
        assert_eq!(tracker.snapshot().crawl.jobs_found, Some(1));
    }

    #[tokio::test]
    async fn test_reported_error_becomes_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/scrape"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "blocked by captcha" })))
            .mount(&server)
            .await;

        let tracker = ProgressTracker::new();
        let adapter = JobSpyAdapter::new(reqwest::Client::new(), server.uri());
        let result = adapter
            .run(context(vec![JobSource::Linkedin], &["web developer"], &tracker))
            .await
            .unwrap();

        assert_eq!(
            result,
            SourceResult::Failure {
                error: "blocked by captcha".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_is_returned_as_err() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let tracker = ProgressTracker::new();
        let adapter = JobSpyAdapter::new(reqwest::Client::new(), server.uri());
        let err = adapter
            .run(context(vec![JobSource::Indeed], &["a"], &tracker))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "upstream returned 503: down");
    }

    #[tokio::test]
    async fn test_cancelled_run_makes_no_requests() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobs": [] })))
            .expect(0)
            .mount(&server)
            .await;

        let tracker = ProgressTracker::new();
        let ctx = context(vec![JobSource::Indeed], &["a", "b"], &tracker);
        ctx.cancel.cancel();
        let adapter = JobSpyAdapter::new(reqwest::Client::new(), server.uri());

        let result = adapter.run(ctx).await.unwrap();
        assert_eq!(result, SourceResult::Success { jobs: vec![] });
    }
}
