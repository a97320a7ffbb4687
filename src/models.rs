//! Core domain models for SensorVault

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A sensor attached to a device
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Sensor {
    pub id: i32,
    pub device_id: i32,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub sensor_type: String,
}

/// A single sensor reading.
///
/// Read-only to the cleanup engine; the only mutation the engine ever
/// requests is deletion by id set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Measurement {
    pub id: i32,
    pub sensor_id: i32,
    pub value: String,
    pub timestamp: NaiveDateTime,
}

/// Aggregate store snapshot used for cleanup accounting
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub number_of_measurements: i64,
    pub size_on_disk_in_mb: i64,
}

impl DatabaseInfo {
    /// Difference between two snapshots (before minus after)
    pub fn diff(&self, after: &DatabaseInfo) -> DatabaseInfo {
        DatabaseInfo {
            number_of_measurements: self.number_of_measurements - after.number_of_measurements,
            size_on_disk_in_mb: self.size_on_disk_in_mb - after.size_on_disk_in_mb,
        }
    }
}

/// Status of a cleanup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupStatus {
    Undefined,
    Running,
    Finished,
}

/// Result of one cleanup run, including before/after accounting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupInfo {
    pub status: CleanupStatus,
    pub before: DatabaseInfo,
    pub after: DatabaseInfo,
    pub difference: DatabaseInfo,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

/// A scheduled job as reported by the job scheduler
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledJob {
    pub job_id: String,
    pub run_frequency: String,
    pub next_run: Option<NaiveDateTime>,
}

/// Response payload for the cleanup status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub jobs: Vec<ScheduledJob>,
    pub job_results: Vec<CleanupInfo>,
}
