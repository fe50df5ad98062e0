//! Source adapters: pluggable fetchers for external job boards.
//!
//! Dispatch goes through [`SourceRegistry`], a table keyed by the closed
//! [`JobSource`] tag. Several tags may resolve to the same adapter (JobSpy
//! serves Indeed, LinkedIn and Glassdoor from one call); discovery groups by
//! [`SourceAdapter::id`] so each adapter runs once per pipeline.

pub mod adzuna;
pub mod jobspy;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;
use crate::models::job::{JobSource, NewJob};
use crate::pipeline::progress::SourceProgress;
use crate::pipeline::CancelFlag;

pub use adzuna::AdzunaAdapter;
pub use jobspy::JobSpyAdapter;

const HTTP_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// What an adapter reports for one run. A `Failure` is an expected,
/// adapter-described failure; unexpected errors come back as `Err(SourceError)`.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceResult {
    Success { jobs: Vec<NewJob> },
    Failure { error: String },
}

/// Parameters for one adapter run. `sources` holds only the tags this adapter
/// was selected for.
#[derive(Clone)]
pub struct SourceRunContext {
    pub sources: Vec<JobSource>,
    pub search_terms: Vec<String>,
    pub location: Option<String>,
    pub results_per_term: u32,
    pub cancel: CancelFlag,
    pub progress: SourceProgress,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier used for grouping and error labels.
    fn id(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    fn provides(&self) -> &'static [JobSource];

    async fn run(&self, ctx: SourceRunContext) -> Result<SourceResult, SourceError>;
}

/// Lookup table from source tag to the adapter that serves it.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    by_source: HashMap<JobSource, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `adapter` for every tag it provides. Later registrations win.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        for source in adapter.provides() {
            self.by_source.insert(*source, Arc::clone(&adapter));
        }
    }

    pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn adapter_for(&self, source: JobSource) -> Option<&Arc<dyn SourceAdapter>> {
        self.by_source.get(&source)
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }

    /// Registers the adapters whose upstream is configured.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        let mut registry = Self::new();

        if let Some(url) = &config.jobspy_url {
            registry.register(Arc::new(JobSpyAdapter::new(http.clone(), url.clone())));
        }
        if let Some(creds) = &config.adzuna {
            registry.register(Arc::new(AdzunaAdapter::new(http, creds.clone())));
        }

        Ok(registry)
    }
}

/// Reads a non-success response into a `SourceError::Status`.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Status {
        status: status.as_u16(),
        body,
    })
}
