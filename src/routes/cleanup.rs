//! Manual cleanup trigger and job status endpoints

use axum::{extract::State, Json};
use tracing::error;

use crate::error::Result;
use crate::models::{CleanupInfo, JobStatusResponse};
use crate::scheduler::JobId;
use crate::state::AppState;

/// POST /api/v1/cleanup
///
/// Runs a cleanup immediately. Returns 409 when a manual cleanup is already
/// in progress; the request is not queued or retried.
pub async fn trigger_cleanup(State(state): State<AppState>) -> Result<Json<CleanupInfo>> {
    state.scheduler.try_start(JobId::Manual)?;

    match state.cleanup.run().await {
        Ok(info) => {
            state.scheduler.finish(JobId::Manual, Some(info.clone()));
            Ok(Json(info))
        }
        Err(e) => {
            state.scheduler.finish(JobId::Manual, None);
            error!(error = %e, "Manual cleanup failed");
            Err(e)
        }
    }
}

/// GET /api/v1/cleanup/status
///
/// Scheduled jobs with their next run time, plus past cleanup results.
pub async fn cleanup_status(State(state): State<AppState>) -> Json<JobStatusResponse> {
    Json(state.scheduler.status())
}
