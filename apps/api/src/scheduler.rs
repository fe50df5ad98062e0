//! Daily pipeline trigger.

use std::sync::Arc;

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::pipeline::driver::PipelineRunRequest;
use crate::pipeline::{PipelineDriver, PipelineError};

/// Next instant strictly after `now` whose wall-clock time is `hour:00`.
/// `None` for an out-of-range hour.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> Option<DateTime<Tz>> {
    let at = NaiveTime::from_hms_opt(hour, 0, 0)?;
    let tz = now.timezone();
    let mut date = now.date_naive();
    // a DST gap can swallow the slot on one day; the next day has it
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            if candidate > *now {
                return Some(candidate);
            }
        }
        date = date.succ_opt()?;
    }
    None
}

/// Runs the pipeline every day at `hour` local time. A slot that finds a run
/// already in progress is skipped.
pub fn spawn_daily(driver: Arc<PipelineDriver>, hour: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Local::now();
            let Some(next) = next_run_after(&now, hour) else {
                error!(hour, "Invalid pipeline schedule hour, scheduler stopped");
                return;
            };
            let wait = (next - now).max(Duration::zero());
            info!(next_run = %next, "Next scheduled pipeline run");
            tokio::time::sleep(wait.to_std().unwrap_or_default()).await;

            match driver.run(PipelineRunRequest::default()).await {
                Ok(summary) => info!(
                    run_id = %summary.pipeline_run_id,
                    success = summary.success,
                    processed = summary.jobs_processed,
                    "Scheduled pipeline run finished"
                ),
                Err(PipelineError::AlreadyRunning) => {
                    warn!("Scheduled pipeline run skipped: a run is already in progress")
                }
                Err(err) => error!(error = %err, "Scheduled pipeline run failed"),
            }
        }
    })
}
