//! Retention policies and ideal-sample-point generation

use crate::error::{AppError, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Minutes in one calendar day
const MINUTES_PER_DAY: u32 = 24 * 60;

/// A retention rule: keep at most `points_per_day` measurements per day for
/// data older than `age_in_days` days.
///
/// `points_per_day` must be even and positive so the sample points bracket a
/// day symmetrically; this is checked when points are generated, not at
/// construction, since policies arrive straight from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub points_per_day: u32,
    pub age_in_days: u32,
}

impl RetentionPolicy {
    pub fn new(points_per_day: u32, age_in_days: u32) -> Self {
        Self {
            points_per_day,
            age_in_days,
        }
    }

    /// Checks the policy invariants without generating points.
    pub fn validate(&self) -> Result<()> {
        if self.points_per_day == 0 {
            return Err(AppError::InvalidPolicy(
                "\"points_per_day\" must be larger than zero".into(),
            ));
        }
        if self.points_per_day % 2 != 0 {
            return Err(AppError::InvalidPolicy(
                "\"points_per_day\" must be an even number".into(),
            ));
        }
        Ok(())
    }

    /// Splits `date` into `points_per_day` evenly spaced timestamps.
    ///
    /// The first point lies at 00:00:00 and each subsequent one is
    /// `1440 / points_per_day` minutes later, so all points fall within the
    /// half-open day `[date 00:00, date+1 00:00)`. Pure and deterministic.
    pub fn determine_measurement_points(&self, date: NaiveDate) -> Result<Vec<NaiveDateTime>> {
        self.validate()?;

        let start = NaiveDateTime::new(date, NaiveTime::MIN);
        let step_in_minutes = MINUTES_PER_DAY / self.points_per_day;

        let points = (0..self.points_per_day)
            .map(|index| start + Duration::minutes((step_in_minutes * index) as i64))
            .collect();

        Ok(points)
    }
}
