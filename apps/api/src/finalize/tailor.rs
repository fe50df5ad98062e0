use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;
use crate::llm_client::prompts::{
    truncate_chars, GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM, MAX_DESCRIPTION_CHARS,
};
use crate::llm_client::LlmClient;
use crate::models::job::Job;
use crate::scoring::keyword::profile_keywords;

const MAX_TAILORED_SKILLS: usize = 12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tailoring {
    pub headline: String,
    pub summary: String,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[async_trait]
pub trait Tailor: Send + Sync {
    async fn tailor(&self, job: &Job, profile: &Value) -> Result<Tailoring, AppError>;
}

/// Claude-backed tailoring.
pub struct LlmTailor(pub LlmClient);

#[async_trait]
impl Tailor for LlmTailor {
    async fn tailor(&self, job: &Job, profile: &Value) -> Result<Tailoring, AppError> {
        let prompt = build_tailoring_prompt(job, profile);
        let mut tailoring: Tailoring = self.0.call_json(&prompt, JSON_ONLY_SYSTEM).await?;
        tailoring.skills.truncate(MAX_TAILORED_SKILLS);
        Ok(tailoring)
    }
}

fn build_tailoring_prompt(job: &Job, profile: &Value) -> String {
    let description = truncate_chars(job.description.as_deref().unwrap_or(""), MAX_DESCRIPTION_CHARS);
    format!(
        "Tailor the candidate's resume header for this job.\n\
         {GROUNDING_INSTRUCTION}\n\
         \n\
         Return JSON: {{\"headline\": \"...\", \"summary\": \"<3 sentences max>\", \
         \"skills\": [\"<up to {MAX_TAILORED_SKILLS}, most relevant first>\"]}}\n\
         \n\
         ## Candidate profile\n{profile}\n\
         \n\
         ## Job\nTitle: {title}\nEmployer: {employer}\n\n{description}\n",
        profile = serde_json::to_string_pretty(profile).unwrap_or_default(),
        title = job.title,
        employer = job.employer.as_deref().unwrap_or("unknown"),
    )
}

/// No-LLM tailoring straight from the profile: headline and summary from
/// `basics`, skills narrowed to the ones the posting mentions.
pub struct ProfileTailor;

#[async_trait]
impl Tailor for ProfileTailor {
    async fn tailor(&self, job: &Job, profile: &Value) -> Result<Tailoring, AppError> {
        let basics = profile.get("basics");
        let text = |key: &str| {
            basics
                .and_then(|b| b.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let haystack = format!(
            "{} {}",
            job.title.to_lowercase(),
            job.description.as_deref().unwrap_or_default().to_lowercase()
        );
        let all_skills = profile_keywords(profile);
        let mut skills: Vec<String> = all_skills
            .iter()
            .filter(|skill| haystack.contains(skill.as_str()))
            .cloned()
            .collect();
        if skills.is_empty() {
            skills = all_skills;
        }
        skills.truncate(MAX_TAILORED_SKILLS);

        Ok(Tailoring {
            headline: text("label").unwrap_or_else(|| job.title.clone()),
            summary: text("summary").unwrap_or_default(),
            skills,
        })
    }
}
