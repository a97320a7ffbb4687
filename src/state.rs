//! Application state shared across handlers

use crate::db::Database;
use crate::scheduler::JobScheduler;
use crate::service::CleanupService;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: Arc<Database>,
    /// Job registry guarding cleanup runs
    pub scheduler: Arc<JobScheduler>,
    /// Cleanup service invoked by the scheduled task and the manual trigger
    pub cleanup: Arc<CleanupService>,
}

impl AppState {
    pub fn new(
        db: Arc<Database>,
        scheduler: Arc<JobScheduler>,
        cleanup: Arc<CleanupService>,
    ) -> Self {
        Self {
            db,
            scheduler,
            cleanup,
        }
    }
}
