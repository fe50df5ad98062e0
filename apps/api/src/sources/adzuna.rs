//! Adzuna search API adapter.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ensure_success, SourceAdapter, SourceError, SourceResult, SourceRunContext};
use crate::config::AdzunaCredentials;
use crate::models::job::{JobSource, NewJob};
use crate::pipeline::progress::SourceProgressEvent;

const ADZUNA_API_URL: &str = "https://api.adzuna.com";
/// Adzuna caps `results_per_page` at 50.
const MAX_PAGE_SIZE: u32 = 50;

pub struct AdzunaAdapter {
    http: reqwest::Client,
    base_url: String,
    credentials: AdzunaCredentials,
}

impl AdzunaAdapter {
    pub fn new(http: reqwest::Client, credentials: AdzunaCredentials) -> Self {
        Self::with_base_url(http, credentials, ADZUNA_API_URL.to_string())
    }

    pub fn with_base_url(http: reqwest::Client, credentials: AdzunaCredentials, base_url: String) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<AdzunaJob>,
}

#[derive(Debug, Deserialize)]
struct AdzunaJob {
    title: Option<String>,
    company: Option<DisplayName>,
    location: Option<DisplayName>,
    redirect_url: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DisplayName {
    display_name: Option<String>,
}

impl AdzunaJob {
    fn into_new_job(self) -> Option<NewJob> {
        Some(NewJob {
            source: JobSource::Adzuna,
            title: self.title.filter(|t| !t.trim().is_empty())?,
            employer: self.company.and_then(|c| c.display_name),
            job_url: self.redirect_url.filter(|u| !u.trim().is_empty())?,
            location: self.location.and_then(|l| l.display_name),
            description: self.description,
        })
    }
}

#[async_trait]
impl SourceAdapter for AdzunaAdapter {
    fn id(&self) -> &'static str {
        "adzuna"
    }

    fn display_name(&self) -> &'static str {
        "Adzuna"
    }

    fn provides(&self) -> &'static [JobSource] {
        &[JobSource::Adzuna]
    }

    async fn run(&self, ctx: SourceRunContext) -> Result<SourceResult, SourceError> {
        let url = format!(
            "{}/v1/api/jobs/{}/search/1",
            self.base_url, self.credentials.country
        );
        let page_size = ctx.results_per_term.clamp(1, MAX_PAGE_SIZE).to_string();
        let terms_total = ctx.search_terms.len() as u32;
        let mut jobs = Vec::new();

        for (index, term) in ctx.search_terms.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                break;
            }

            let mut query = vec![
                ("app_id", self.credentials.app_id.as_str()),
                ("app_key", self.credentials.app_key.as_str()),
                ("what", term.as_str()),
                ("results_per_page", page_size.as_str()),
            ];
            if let Some(location) = ctx.location.as_deref() {
                query.push(("where", location));
            }

            let response = self.http.get(&url).query(&query).send().await?;
            let body: SearchResponse = ensure_success(response).await?.json().await?;
            jobs.extend(body.results.into_iter().filter_map(AdzunaJob::into_new_job));
            debug!(term, total = jobs.len(), "Adzuna term finished");

            ctx.progress.report(SourceProgressEvent {
                phase: Some("search".to_string()),
                terms_processed: Some(index as u32 + 1),
                terms_total: Some(terms_total),
                jobs_found: Some(jobs.len() as u32),
                detail: Some(format!("Adzuna: {}/{terms_total} terms", index + 1)),
            });
        }

        Ok(SourceResult::Success { jobs })
    }
}
