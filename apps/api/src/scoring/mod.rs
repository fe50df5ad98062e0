//! Scoring collaborators: pluggable, trait-based.
//!
//! `JobScorer` rates a posting against the candidate profile. `LlmJobScorer`
//! asks Claude; `KeywordJobScorer` is the deterministic fallback used when no
//! API key is configured. `SponsorMatcher` looks an employer up in the visa
//! sponsor register.
//!
//! `AppState` and the pipeline hold these as `Arc<dyn ...>`.

pub mod keyword;
pub mod llm;
pub mod sponsors;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;
use crate::models::job::Job;

pub use keyword::KeywordJobScorer;
pub use llm::LlmJobScorer;
pub use sponsors::SponsorRegister;

/// Sponsor lookups made while scoring.
pub const SPONSOR_SEARCH_LIMIT: usize = 10;
pub const SPONSOR_MIN_SCORE: f64 = 50.0;

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suitability {
    /// 0 – 100
    pub score: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SponsorMatch {
    pub name: String,
    /// 0 – 100
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SponsorSummary {
    pub score: f64,
    pub names: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Traits
// ────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait JobScorer: Send + Sync {
    async fn score(&self, job: &Job, profile: &Value) -> Result<Suitability, AppError>;

    /// "keyword" | "llm"
    fn backend(&self) -> &'static str;
}

pub trait SponsorMatcher: Send + Sync {
    /// Best matches first, at most `limit`, none below `min_score`.
    fn search(&self, employer: &str, limit: usize, min_score: f64) -> Vec<SponsorMatch>;
}

/// Collapses matches into what is stored on the job: the best score and the
/// names that reached it.
pub fn summarize_sponsor_matches(matches: &[SponsorMatch]) -> SponsorSummary {
    let Some(best) = matches.iter().map(|m| m.score).reduce(f64::max) else {
        return SponsorSummary::default();
    };
    let names: Vec<&str> = matches
        .iter()
        .filter(|m| m.score >= best)
        .map(|m| m.name.as_str())
        .collect();
    SponsorSummary {
        score: best,
        names: Some(names.join(", ")),
    }
}
