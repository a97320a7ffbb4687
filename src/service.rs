//! Cleanup service: wraps the engine with before/after accounting

use crate::backup::BackupTrigger;
use crate::cleaner::DatabaseCleaner;
use crate::config::CleanupConfig;
use crate::db::Database;
use crate::error::Result;
use crate::models::{CleanupInfo, CleanupStatus};
use chrono::Local;
use std::sync::Arc;
use tracing::info;

/// Runs one full cleanup and reports how much the store shrank.
pub struct CleanupService {
    db: Arc<Database>,
    cleanup: CleanupConfig,
    backup: Option<Arc<dyn BackupTrigger>>,
}

impl CleanupService {
    pub fn new(
        db: Arc<Database>,
        cleanup: CleanupConfig,
        backup: Option<Arc<dyn BackupTrigger>>,
    ) -> Self {
        Self { db, cleanup, backup }
    }

    /// Snapshot the store, enforce all retention policies for today, snapshot
    /// again and return the difference.
    ///
    /// The policy list is rebuilt from configuration on every invocation; the
    /// engine carries no state between runs.
    pub async fn run(&self) -> Result<CleanupInfo> {
        let start_time = Local::now().naive_local();
        let before = self.db.database_info().await?;

        let cleaner = DatabaseCleaner::new(
            self.cleanup.retention_policies.clone(),
            self.cleanup.force_backup_after_cleanup,
            self.backup.clone(),
        );
        cleaner.clean(self.db.as_ref(), Local::now().date_naive()).await?;

        let after = self.db.database_info().await?;
        let difference = before.diff(&after);

        info!(
            deleted_measurements = difference.number_of_measurements,
            freed_mb = difference.size_on_disk_in_mb,
            "Cleanup finished"
        );

        Ok(CleanupInfo {
            status: CleanupStatus::Finished,
            before,
            after,
            difference,
            start_time,
            end_time: Local::now().naive_local(),
        })
    }
}
