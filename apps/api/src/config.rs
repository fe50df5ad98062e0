use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::models::job::JobSource;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    /// Optional: without it scoring falls back to keyword overlap and tailoring
    /// is derived from the profile.
    pub anthropic_api_key: Option<String>,
    pub jobspy_url: Option<String>,
    pub adzuna: Option<AdzunaCredentials>,
    pub profile_path: PathBuf,
    pub sponsor_register_path: Option<PathBuf>,
    pub pipeline_webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    /// Hour of day (0-23, local time) for the daily pipeline run.
    pub pipeline_schedule_hour: Option<u32>,
    pub port: u16,
    pub rust_log: String,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone)]
pub struct AdzunaCredentials {
    pub app_id: String,
    pub app_key: String,
    pub country: String,
}

/// Immutable knobs handed to every pipeline stage explicitly. Stages never read
/// the environment themselves.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub sources: Vec<JobSource>,
    pub search_terms: Vec<String>,
    pub location: Option<String>,
    pub blocked_company_keywords: Vec<String>,
    pub auto_skip_score_threshold: Option<f64>,
    pub min_suitability_score: f64,
    pub top_n: usize,
    pub results_per_term: u32,
    pub render_enabled: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            sources: vec![JobSource::Indeed, JobSource::Linkedin],
            search_terms: vec!["web developer".to_string()],
            location: None,
            blocked_company_keywords: vec![],
            auto_skip_score_threshold: None,
            min_suitability_score: 50.0,
            top_n: 10,
            results_per_term: 50,
            render_enabled: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let adzuna = match (optional_env("ADZUNA_APP_ID"), optional_env("ADZUNA_APP_KEY")) {
            (Some(app_id), Some(app_key)) => Some(AdzunaCredentials {
                app_id,
                app_key,
                country: optional_env("ADZUNA_COUNTRY").unwrap_or_else(|| "gb".to_string()),
            }),
            _ => None,
        };

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            jobspy_url: optional_env("JOBSPY_URL"),
            adzuna,
            profile_path: optional_env("PROFILE_PATH")
                .unwrap_or_else(|| "data/profile.json".to_string())
                .into(),
            sponsor_register_path: optional_env("SPONSOR_REGISTER_PATH").map(PathBuf::from),
            pipeline_webhook_url: optional_env("PIPELINE_WEBHOOK_URL")
                .or_else(|| optional_env("WEBHOOK_URL")),
            webhook_secret: optional_env("WEBHOOK_SECRET"),
            pipeline_schedule_hour: optional_env("PIPELINE_SCHEDULE_HOUR")
                .map(|v| v.parse::<u32>())
                .transpose()
                .context("PIPELINE_SCHEDULE_HOUR must be an hour between 0 and 23")?
                .filter(|hour| *hour < 24),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            pipeline: PipelineSettings::from_lookup(optional_env)?,
        })
    }
}

impl PipelineSettings {
    /// Builds settings from a key lookup so parsing stays testable without
    /// touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let sources = match lookup("PIPELINE_SOURCES") {
            Some(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.parse::<JobSource>().map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()
                .context("PIPELINE_SOURCES must be a comma-separated list of known sources")?,
            None => defaults.sources,
        };

        let search_terms = lookup("SEARCH_TERMS")
            .map(|raw| split_search_terms(&raw))
            .filter(|terms| !terms.is_empty())
            .unwrap_or(defaults.search_terms);

        let blocked_company_keywords = lookup("BLOCKED_COMPANY_KEYWORDS")
            .map(|raw| parse_keyword_list(&raw))
            .unwrap_or_default();

        Ok(Self {
            sources,
            search_terms,
            location: lookup("SEARCH_LOCATION"),
            blocked_company_keywords,
            auto_skip_score_threshold: parse_optional(&lookup, "AUTO_SKIP_SCORE_THRESHOLD")?,
            min_suitability_score: parse_optional(&lookup, "MIN_SUITABILITY_SCORE")?
                .unwrap_or(defaults.min_suitability_score),
            top_n: parse_optional(&lookup, "TOP_N")?.unwrap_or(defaults.top_n),
            results_per_term: parse_optional(&lookup, "RESULTS_PER_TERM")?
                .unwrap_or(defaults.results_per_term),
            render_enabled: lookup("RENDER_ENABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(defaults.render_enabled),
        })
    }
}

/// `|`-separated search terms, trimmed, empties dropped.
pub fn split_search_terms(raw: &str) -> Vec<String> {
    raw.split('|')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses a JSON array of strings, trimming and dropping empty or duplicate
/// (case-insensitive) entries. Anything that is not an array yields an empty list.
pub fn parse_keyword_list(raw: &str) -> Vec<String> {
    let Ok(serde_json::Value::Array(values)) = serde_json::from_str::<serde_json::Value>(raw) else {
        return vec![];
    };

    let mut seen = std::collections::HashSet::new();
    values
        .iter()
        .filter_map(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.to_lowercase()))
        .map(str::to_string)
        .collect()
}

fn parse_optional<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    lookup(key)
        .map(|raw| raw.trim().parse::<T>())
        .transpose()
        .map_err(|_| anyhow::anyhow!("{key} has an invalid value"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let settings = PipelineSettings::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(settings, PipelineSettings::default());
    }

    #[test]
    fn test_parses_overrides() {
        let settings = PipelineSettings::from_lookup(lookup_from(&[
            ("PIPELINE_SOURCES", "indeed, adzuna"),
            ("SEARCH_TERMS", "rust engineer | | backend developer"),
            ("BLOCKED_COMPANY_KEYWORDS", r#"["Acme", "acme", " ", "Globex"]"#),
            ("AUTO_SKIP_SCORE_THRESHOLD", "30"),
            ("MIN_SUITABILITY_SCORE", "65.5"),
            ("TOP_N", "3"),
            ("RENDER_ENABLED", "false"),
        ]))
        .unwrap();

        assert_eq!(settings.sources, vec![JobSource::Indeed, JobSource::Adzuna]);
        assert_eq!(settings.search_terms, vec!["rust engineer", "backend developer"]);
        assert_eq!(settings.blocked_company_keywords, vec!["Acme", "Globex"]);
        assert_eq!(settings.auto_skip_score_threshold, Some(30.0));
        assert_eq!(settings.min_suitability_score, 65.5);
        assert_eq!(settings.top_n, 3);
        assert!(!settings.render_enabled);
    }

    #[test]
    fn test_rejects_unknown_source() {
        let result = PipelineSettings::from_lookup(lookup_from(&[("PIPELINE_SOURCES", "monster")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_number() {
        let result = PipelineSettings::from_lookup(lookup_from(&[("TOP_N", "many")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_keyword_list_ignores_non_arrays() {
        assert!(parse_keyword_list("not json").is_empty());
        assert!(parse_keyword_list(r#"{"a": 1}"#).is_empty());
        assert_eq!(parse_keyword_list(r#"["x", 3, "y"]"#), vec!["x", "y"]);
    }
}
