//! Visa sponsor register: in-memory fuzzy lookup of licensed sponsor names.
//!
//! Names are normalised (lowercase, punctuation stripped, legal suffixes such
//! as "ltd" and "plc" dropped) and compared by token overlap.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::{SponsorMatch, SponsorMatcher};

const LEGAL_SUFFIXES: &[&str] = &[
    "ltd", "limited", "plc", "llp", "llc", "inc", "corp", "corporation", "co", "company", "group",
    "uk", "the",
];

struct Entry {
    name: String,
    tokens: HashSet<String>,
}

#[derive(Default)]
pub struct SponsorRegister {
    entries: Vec<Entry>,
}

impl SponsorRegister {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = names
            .into_iter()
            .map(Into::into)
            .filter_map(|name: String| {
                let tokens = normalize(&name);
                (!tokens.is_empty()).then_some(Entry { name, tokens })
            })
            .collect();
        Self { entries }
    }

    /// Loads one organisation name per line. A CSV export works too: only the
    /// first column is used and a header row starting with "Organisation" is skipped.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read sponsor register {}", path.display()))?;
        let names = raw
            .lines()
            .map(|line| first_csv_column(line).trim().to_string())
            .filter(|name| !name.is_empty() && !name.starts_with("Organisation"));
        let register = Self::from_names(names);
        info!(entries = register.len(), "Sponsor register loaded");
        Ok(register)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl SponsorMatcher for SponsorRegister {
    fn search(&self, employer: &str, limit: usize, min_score: f64) -> Vec<SponsorMatch> {
        let query = normalize(employer);
        if query.is_empty() {
            return vec![];
        }

        let mut matches: Vec<SponsorMatch> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = overlap_score(&query, &entry.tokens);
                (score >= min_score).then(|| SponsorMatch {
                    name: entry.name.clone(),
                    score,
                })
            })
            .collect();

        // stable: equal scores keep register order
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(limit);
        matches
    }
}

fn first_csv_column(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix('"') {
        return rest.split('"').next().unwrap_or_default();
    }
    line.split(',').next().unwrap_or_default()
}

fn normalize(name: &str) -> HashSet<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty() && !LEGAL_SUFFIXES.contains(token))
        .map(str::to_string)
        .collect()
}

/// Dice coefficient over token sets, scaled to 0 – 100.
fn overlap_score(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let shared = a.intersection(b).count() as f64;
    let score = 2.0 * shared / (a.len() + b.len()) as f64 * 100.0;
    score.round()
}
