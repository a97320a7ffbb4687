//! Job registry guarding cleanup runs against concurrent execution

use crate::error::{AppError, Result};
use crate::models::{CleanupInfo, JobStatusResponse, ScheduledJob};
use chrono::{Local, NaiveDateTime};
use cron::Schedule;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Number of past cleanup results kept for the status endpoint
const MAX_RESULTS: usize = 50;

/// The two cleanup job flavors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobId {
    Automatic,
    Manual,
}

impl JobId {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobId::Automatic => "Automatic cleanup",
            JobId::Manual => "Manual cleanup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Idle,
    Running,
}

/// Tracks per-job `Idle`/`Running` state and past results.
///
/// At most one run of a given job id executes at a time: callers must
/// acquire the job via [`try_start`](Self::try_start) before running and
/// release it with [`finish`](Self::finish). Held in `AppState` rather than
/// as a process-wide singleton.
pub struct JobScheduler {
    schedule: Schedule,
    states: Mutex<HashMap<JobId, JobState>>,
    results: Mutex<Vec<CleanupInfo>>,
}

impl JobScheduler {
    pub fn new(schedule: Schedule) -> Self {
        let states = HashMap::from([
            (JobId::Automatic, JobState::Idle),
            (JobId::Manual, JobState::Idle),
        ]);
        Self {
            schedule,
            states: Mutex::new(states),
            results: Mutex::new(Vec::new()),
        }
    }

    /// Transition a job to `Running`, rejecting the request when it already
    /// is.
    pub fn try_start(&self, job: JobId) -> Result<()> {
        let mut states = self.states.lock();
        match states.get(&job) {
            Some(JobState::Running) => Err(AppError::JobAlreadyRunning(job.as_str().to_string())),
            _ => {
                states.insert(job, JobState::Running);
                debug!(job = job.as_str(), "Job started");
                Ok(())
            }
        }
    }

    /// Transition a job back to `Idle`, recording its result if it produced
    /// one.
    pub fn finish(&self, job: JobId, result: Option<CleanupInfo>) {
        self.states.lock().insert(job, JobState::Idle);
        debug!(job = job.as_str(), "Job finished");

        if let Some(info) = result {
            let mut results = self.results.lock();
            results.push(info);
            if results.len() > MAX_RESULTS {
                let excess = results.len() - MAX_RESULTS;
                results.drain(..excess);
            }
        }
    }

    /// Next fire time of the automatic job in local time
    pub fn next_run(&self) -> Option<NaiveDateTime> {
        self.schedule.upcoming(Local).next().map(|dt| dt.naive_local())
    }

    pub fn status(&self) -> JobStatusResponse {
        let jobs = vec![
            ScheduledJob {
                job_id: JobId::Automatic.as_str().to_string(),
                run_frequency: self.schedule.to_string(),
                next_run: self.next_run(),
            },
            ScheduledJob {
                job_id: JobId::Manual.as_str().to_string(),
                run_frequency: "on demand".to_string(),
                next_run: None,
            },
        ];

        JobStatusResponse {
            jobs,
            job_results: self.results.lock().clone(),
        }
    }
}
