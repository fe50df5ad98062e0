use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{JobScorer, Suitability};
use crate::errors::AppError;
use crate::llm_client::prompts::{truncate_chars, JSON_ONLY_SYSTEM, MAX_DESCRIPTION_CHARS};
use crate::llm_client::LlmClient;
use crate::models::job::Job;

pub struct LlmJobScorer(pub LlmClient);

#[derive(Debug, Deserialize)]
struct RawVerdict {
    score: f64,
    #[serde(default)]
    reason: String,
}

#[async_trait]
impl JobScorer for LlmJobScorer {
    async fn score(&self, job: &Job, profile: &Value) -> Result<Suitability, AppError> {
        let prompt = build_scoring_prompt(job, profile);
        let verdict: RawVerdict = self.0.call_json(&prompt, JSON_ONLY_SYSTEM).await?;
        debug!(job_id = %job.id, score = verdict.score, "LLM scored job");

        if !verdict.score.is_finite() {
            return Err(AppError::Llm(format!("non-numeric score for job {}", job.id)));
        }
        Ok(Suitability {
            score: verdict.score.clamp(0.0, 100.0).round(),
            reason: verdict.reason.trim().to_string(),
        })
    }

    fn backend(&self) -> &'static str {
        "llm"
    }
}

fn build_scoring_prompt(job: &Job, profile: &Value) -> String {
    let description = truncate_chars(job.description.as_deref().unwrap_or(""), MAX_DESCRIPTION_CHARS);
    format!(
        "Rate how well this candidate fits the job on a 0-100 scale.\n\
         \n\
         Return JSON: {{\"score\": <integer 0-100>, \"reason\": \"<one or two sentences>\"}}\n\
         \n\
         ## Candidate profile\n{profile}\n\
         \n\
         ## Job\nTitle: {title}\nEmployer: {employer}\nLocation: {location}\n\n{description}\n",
        profile = serde_json::to_string_pretty(profile).unwrap_or_default(),
        title = job.title,
        employer = job.employer.as_deref().unwrap_or("unknown"),
        location = job.location.as_deref().unwrap_or("unspecified"),
    )
}
