use tracing::info;

use crate::errors::AppError;
use crate::models::job::NewJob;
use crate::pipeline::progress::ProgressTracker;
use crate::store::{ImportSummary, JobStore};

/// Persists discovered postings. URLs already stored are counted as skipped.
pub async fn import_jobs(
    store: &dyn JobStore,
    jobs: &[NewJob],
    progress: &ProgressTracker,
) -> Result<ImportSummary, AppError> {
    info!(count = jobs.len(), "Importing discovered jobs");
    let summary = store.bulk_create(jobs).await?;
    progress.import_complete(summary.created, summary.skipped);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobSource;
    use crate::testing::MemoryJobStore;

    #[tokio::test]
    async fn test_duplicate_urls_are_skipped() {
        let store = MemoryJobStore::default();
        let posting = NewJob {
            source: JobSource::Adzuna,
            title: "Platform Engineer".to_string(),
            employer: Some("Crab Co".to_string()),
            job_url: "https://adzuna.example/42".to_string(),
            location: None,
            description: None,
        };
        let tracker = ProgressTracker::new();

        let first = import_jobs(&store, &[posting.clone(), posting.clone()], &tracker)
            .await
            .unwrap();
        let second = import_jobs(&store, &[posting], &tracker).await.unwrap();

        assert_eq!(first, ImportSummary { created: 1, skipped: 1 });
        assert_eq!(second, ImportSummary { created: 0, skipped: 1 });
        assert_eq!(store.all_jobs().len(), 1);
        assert_eq!(store.all_jobs()[0].source, "adzuna");
    }
}
