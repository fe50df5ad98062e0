use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{info, warn};

use crate::finalize::{FinalizeOptions, JobFinalizer};
use crate::models::job::ScoredJob;
use crate::pipeline::progress::ProgressTracker;
use crate::pipeline::CancelFlag;
use crate::pool::BoundedPool;

const PROCESSING_CONCURRENCY: f64 = 3.0;

/// Finalizes the selected jobs without forcing re-tailoring. Failures are
/// logged and counted out. Returns how many jobs finalized.
pub async fn process_jobs(
    finalizer: &dyn JobFinalizer,
    selected: &[ScoredJob],
    progress: &ProgressTracker,
    cancel: &CancelFlag,
) -> usize {
    if selected.is_empty() {
        return 0;
    }

    let total = selected.len();
    let started = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    progress.processing_started(total);

    let pool = BoundedPool::<ScoredJob, bool, Infallible>::new(PROCESSING_CONCURRENCY)
        .should_stop(|| cancel.is_cancelled())
        .on_task_started(|job, _| {
            let n = started.fetch_add(1, Ordering::SeqCst) + 1;
            progress.processing_job(n, total, &job.job.title);
        })
        .on_task_settled(|_, _, _| {
            let n = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress.job_complete(n, total);
        });

    let outcomes = pool
        .run(selected, |scored, _| async move {
            let job_id = scored.job.id;
            match finalizer.finalize(job_id, FinalizeOptions { force: false }).await {
                Ok(_) => Ok(true),
                Err(err) => {
                    warn!(%job_id, error = %err, "Failed to process job");
                    Ok(false)
                }
            }
        })
        .await
        .unwrap_or_else(|never| match never {});

    let processed = outcomes.into_iter().filter(|ok| *ok).count();
    info!(processed, total, "Processing step completed");
    processed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::models::job::Job;
    use crate::testing::make_scored;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingFinalizer {
        failing: Vec<Uuid>,
        seen: Mutex<Vec<(Uuid, bool)>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobFinalizer for RecordingFinalizer {
        async fn finalize(&self, job_id: Uuid, options: FinalizeOptions) -> Result<Job, AppError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.seen.lock().unwrap().push((job_id, options.force));
            if self.failing.contains(&job_id) {
                return Err(AppError::Llm("tailoring failed".into()));
            }
            Ok(crate::testing::make_job("done", crate::models::job::JobStatus::Ready))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_successes_and_never_forces() {
        let selected: Vec<ScoredJob> = (0..7).map(|i| make_scored(&format!("job {i}"), 90.0)).collect();
        let finalizer = RecordingFinalizer {
            failing: vec![selected[2].job.id, selected[5].job.id],
            ..RecordingFinalizer::default()
        };
        let tracker = ProgressTracker::new();

        let processed = process_jobs(&finalizer, &selected, &tracker, &CancelFlag::new()).await;

        assert_eq!(processed, 5);
        assert_eq!(finalizer.peak.load(Ordering::SeqCst), 3);
        let seen = finalizer.seen.lock().unwrap();
        assert_eq!(seen.len(), 7);
        assert!(seen.iter().all(|(_, force)| !force));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.jobs_processed, 7);
        assert_eq!(snapshot.total_to_process, 7);
    }

    #[tokio::test]
    async fn test_nothing_selected_is_a_no_op() {
        let finalizer = RecordingFinalizer::default();
        let processed = process_jobs(&finalizer, &[], &ProgressTracker::new(), &CancelFlag::new()).await;
        assert_eq!(processed, 0);
        assert!(finalizer.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_new_claims() {
        let selected: Vec<ScoredJob> = (0..5).map(|i| make_scored(&format!("job {i}"), 90.0)).collect();
        let finalizer = RecordingFinalizer::default();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let processed = process_jobs(&finalizer, &selected, &ProgressTracker::new(), &cancel).await;
        assert_eq!(processed, 0);
    }
}
