use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle status of a job posting. Transitions are owned by the stage or
/// action that performs them; nothing moves a job back to `Discovered`
/// except a failed finalize restoring its previous status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Discovered,
    Processing,
    Ready,
    Applied,
    InProgress,
    Skipped,
    Expired,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Discovered => "discovered",
            JobStatus::Processing => "processing",
            JobStatus::Ready => "ready",
            JobStatus::Applied => "applied",
            JobStatus::InProgress => "in_progress",
            JobStatus::Skipped => "skipped",
            JobStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(JobStatus::Discovered),
            "processing" => Ok(JobStatus::Processing),
            "ready" => Ok(JobStatus::Ready),
            "applied" => Ok(JobStatus::Applied),
            "in_progress" => Ok(JobStatus::InProgress),
            "skipped" => Ok(JobStatus::Skipped),
            "expired" => Ok(JobStatus::Expired),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Job boards a source adapter can serve. Closed set; adapters register
/// against these tags in the `SourceRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    Indeed,
    Linkedin,
    Glassdoor,
    Adzuna,
}

impl JobSource {
    pub const ALL: [JobSource; 4] = [
        JobSource::Indeed,
        JobSource::Linkedin,
        JobSource::Glassdoor,
        JobSource::Adzuna,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Indeed => "indeed",
            JobSource::Linkedin => "linkedin",
            JobSource::Glassdoor => "glassdoor",
            JobSource::Adzuna => "adzuna",
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobSource::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown job source '{s}'"))
    }
}

/// Raw `jobs` table row. `status` stays textual here and is parsed into
/// [`JobStatus`] when converted to [`Job`].
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub source: String,
    pub title: String,
    pub employer: Option<String>,
    pub job_url: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub suitability_score: Option<f64>,
    pub suitability_reason: Option<String>,
    pub sponsor_match_score: Option<f64>,
    pub sponsor_match_names: Option<String>,
    pub tailored_headline: Option<String>,
    pub tailored_summary: Option<String>,
    pub tailored_skills: Vec<String>,
    pub artifact_key: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub source: String,
    pub title: String,
    pub employer: Option<String>,
    pub job_url: String,
    pub location: Option<String>,
    pub description: Option<String>,
    pub status: JobStatus,
    pub suitability_score: Option<f64>,
    pub suitability_reason: Option<String>,
    pub sponsor_match_score: Option<f64>,
    pub sponsor_match_names: Option<String>,
    pub tailored_headline: Option<String>,
    pub tailored_summary: Option<String>,
    pub tailored_skills: Vec<String>,
    pub artifact_key: Option<String>,
    pub discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A score is usable cache only when present and a real number.
    pub fn cached_score(&self) -> Option<f64> {
        self.suitability_score.filter(|score| !score.is_nan())
    }
}

impl TryFrom<JobRow> for Job {
    type Error = String;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            status: row.status.parse()?,
            id: row.id,
            source: row.source,
            title: row.title,
            employer: row.employer,
            job_url: row.job_url,
            location: row.location,
            description: row.description,
            suitability_score: row.suitability_score,
            suitability_reason: row.suitability_reason,
            sponsor_match_score: row.sponsor_match_score,
            sponsor_match_names: row.sponsor_match_names,
            tailored_headline: row.tailored_headline,
            tailored_summary: row.tailored_summary,
            tailored_skills: row.tailored_skills,
            artifact_key: row.artifact_key,
            discovered_at: row.discovered_at,
            updated_at: row.updated_at,
        })
    }
}

/// A posting returned by a source adapter, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub source: JobSource,
    pub title: String,
    pub employer: Option<String>,
    pub job_url: String,
    pub location: Option<String>,
    pub description: Option<String>,
}

/// Partial update applied in a single persistence call. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub suitability_score: Option<f64>,
    pub suitability_reason: Option<String>,
    pub sponsor_match_score: Option<f64>,
    pub sponsor_match_names: Option<String>,
    pub tailored_headline: Option<String>,
    pub tailored_summary: Option<String>,
    pub tailored_skills: Option<Vec<String>>,
    pub artifact_key: Option<String>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// A job carrying a definite suitability score.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredJob {
    #[serde(flatten)]
    pub job: Job,
    pub suitability_score: f64,
    pub suitability_reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            JobStatus::Discovered,
            JobStatus::Processing,
            JobStatus::Ready,
            JobStatus::Applied,
            JobStatus::InProgress,
            JobStatus::Skipped,
            JobStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!("archived".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::InProgress).unwrap(),
            r#""in_progress""#
        );
    }

    #[test]
    fn test_source_parse_is_case_insensitive() {
        assert_eq!("LinkedIn".parse::<JobSource>(), Ok(JobSource::Linkedin));
        assert_eq!(" adzuna ".parse::<JobSource>(), Ok(JobSource::Adzuna));
        assert!("monster".parse::<JobSource>().is_err());
    }
}
