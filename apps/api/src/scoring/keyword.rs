use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;

use super::{JobScorer, Suitability};
use crate::errors::AppError;
use crate::models::job::Job;

/// Deterministic scorer: how many profile skills does the posting mention?
///
/// Algorithm:
/// 1. Collect skill keywords from the profile (`skills[]` as strings, or JSON
///    Resume style `{name, keywords[]}` objects).
/// 2. For each keyword: title match → 1.0, description match → 0.6, else 0.0.
/// 3. score = Σ strength / keyword count × 100, rounded.
pub struct KeywordJobScorer;

#[async_trait]
impl JobScorer for KeywordJobScorer {
    async fn score(&self, job: &Job, profile: &Value) -> Result<Suitability, AppError> {
        Ok(keyword_suitability(job, &profile_keywords(profile)))
    }

    fn backend(&self) -> &'static str {
        "keyword"
    }
}

/// Lowercased, de-duplicated skill keywords in profile order.
pub fn profile_keywords(profile: &Value) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    let mut push = |raw: &str| {
        let keyword = raw.trim().to_lowercase();
        if !keyword.is_empty() && seen.insert(keyword.clone()) {
            keywords.push(keyword);
        }
    };

    for skill in profile.get("skills").and_then(Value::as_array).into_iter().flatten() {
        match skill {
            Value::String(name) => push(name),
            Value::Object(obj) => {
                if let Some(name) = obj.get("name").and_then(Value::as_str) {
                    push(name);
                }
                for kw in obj.get("keywords").and_then(Value::as_array).into_iter().flatten() {
                    if let Some(kw) = kw.as_str() {
                        push(kw);
                    }
                }
            }
            _ => {}
        }
    }

    keywords
}

fn keyword_suitability(job: &Job, keywords: &[String]) -> Suitability {
    if keywords.is_empty() {
        return Suitability {
            score: 0.0,
            reason: "Profile lists no skills; cannot score fit.".to_string(),
        };
    }

    let title = job.title.to_lowercase();
    let description = job.description.as_deref().unwrap_or_default().to_lowercase();

    let mut total = 0.0_f64;
    let mut matched = Vec::new();
    let mut missing = Vec::new();

    for keyword in keywords {
        let strength = if title.contains(keyword.as_str()) {
            1.0
        } else if description.contains(keyword.as_str()) {
            0.6
        } else {
            0.0
        };
        total += strength;
        if strength > 0.0 {
            matched.push(keyword.as_str());
        } else {
            missing.push(keyword.as_str());
        }
    }

    let score = ((total / keywords.len() as f64) * 100.0).round();
    Suitability {
        score,
        reason: build_reason(score, &matched, &missing),
    }
}

fn build_reason(score: f64, matched: &[&str], missing: &[&str]) -> String {
    let top_matched: Vec<&str> = matched.iter().take(5).copied().collect();
    let top_missing: Vec<&str> = missing.iter().take(3).copied().collect();

    if matched.is_empty() {
        "No profile skills appear in this posting.".to_string()
    } else if score >= 80.0 {
        format!("Strong keyword overlap: {}.", top_matched.join(", "))
    } else {
        format!(
            "Partial overlap ({score}/100). Matched: {}. Not mentioned: {}.",
            top_matched.join(", "),
            top_missing.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobStatus;
    use crate::testing::make_job;
    use serde_json::json;

    #[test]
    fn test_profile_keywords_accepts_both_skill_shapes() {
        let profile = json!({
            "skills": ["Rust", { "name": "Databases", "keywords": ["Postgres", "rust"] }, 42]
        });
        assert_eq!(profile_keywords(&profile), vec!["rust", "databases", "postgres"]);
        assert!(profile_keywords(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_title_and_description_matches_are_weighted() {
        // title "Rust Engineer"; description mentions Rust, Postgres, Kubernetes
        let job = make_job("Rust Engineer", JobStatus::Discovered);
        let profile = json!({ "skills": ["rust", "postgres", "haskell"] });

        let result = KeywordJobScorer.score(&job, &profile).await.unwrap();
        // (1.0 + 0.6 + 0.0) / 3
        assert_eq!(result.score, 53.0);
        assert!(result.reason.contains("haskell"));
    }

    #[tokio::test]
    async fn test_empty_profile_scores_zero() {
        let job = make_job("Rust Engineer", JobStatus::Discovered);
        let result = KeywordJobScorer.score(&job, &json!({})).await.unwrap();
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_score_bounded_0_to_100() {
        let job = make_job("Rust Postgres Kubernetes", JobStatus::Discovered);
        let profile = json!({ "skills": ["rust", "postgres", "kubernetes"] });
        let result = KeywordJobScorer.score(&job, &profile).await.unwrap();
        assert_eq!(result.score, 100.0);
    }
}
