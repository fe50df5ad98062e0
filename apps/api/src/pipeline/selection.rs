use crate::models::job::ScoredJob;

/// Keeps jobs scoring at least `min_score`, highest first, at most `top_n`.
/// Ties keep their incoming order.
pub fn select_jobs(scored: &[ScoredJob], min_score: f64, top_n: usize) -> Vec<ScoredJob> {
    let mut eligible: Vec<&ScoredJob> = scored
        .iter()
        .filter(|job| job.suitability_score >= min_score)
        .collect();
    // sort_by is stable
    eligible.sort_by(|a, b| b.suitability_score.total_cmp(&a.suitability_score));
    eligible.into_iter().take(top_n).cloned().collect()
}
