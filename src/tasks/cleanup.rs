//! Scheduled cleanup task driven by a cron expression

use crate::scheduler::{JobId, JobScheduler};
use crate::service::CleanupService;
use chrono::Local;
use cron::Schedule;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Background task that runs the cleanup on every cron occurrence.
///
/// The job registry guards each run: if the previous occurrence is somehow
/// still running, the new one is skipped rather than stacked.
pub async fn scheduled_cleanup_task(
    schedule: Schedule,
    scheduler: Arc<JobScheduler>,
    service: Arc<CleanupService>,
) {
    info!(schedule = %schedule, "Cleanup task started");

    loop {
        let Some(next) = schedule.upcoming(Local).next() else {
            warn!("Cleanup schedule has no upcoming occurrences, task exiting");
            return;
        };

        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);
        info!(next_run = %next, "Next automatic cleanup scheduled");
        tokio::time::sleep(wait).await;

        if let Err(e) = scheduler.try_start(JobId::Automatic) {
            warn!(error = %e, "Skipping scheduled cleanup");
            continue;
        }

        match service.run().await {
            Ok(info) => scheduler.finish(JobId::Automatic, Some(info)),
            Err(e) => {
                error!(error = %e, "Scheduled cleanup failed");
                scheduler.finish(JobId::Automatic, None);
            }
        }
    }
}
