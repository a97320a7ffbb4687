//! Retention-based downsampling engine.
//!
//! For every policy, every sensor and every day older than the policy's age
//! threshold, the cleaner keeps the measurement closest to each of the day's
//! ideal sample points and deletes the rest. Deletion is the only mutation;
//! re-running over unchanged data deletes nothing.

use crate::backup::BackupTrigger;
use crate::error::Result;
use crate::models::{Measurement, Sensor};
use crate::retention::RetentionPolicy;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read/delete access to the measurement store, as consumed by the cleaner.
///
/// Implemented by [`crate::db::Database`] over Postgres and by in-memory
/// stores in tests.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn sensors(&self) -> Result<Vec<Sensor>>;

    /// The single oldest measurement of a sensor, if any. Bounds the
    /// backward day-walk so sensors with long histories are not scanned
    /// past their first reading.
    async fn earliest_measurement(&self, sensor_id: i32) -> Result<Option<Measurement>>;

    /// All measurements of a sensor with `start <= timestamp <= end`,
    /// ordered by timestamp.
    async fn measurements_in_range(
        &self,
        sensor_id: i32,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Measurement>>;

    /// Batch delete by id. No-op on an empty set.
    async fn delete_measurements(&self, ids: &HashSet<i32>) -> Result<u64>;
}

/// Applies retention policies across all sensors, day by day.
pub struct DatabaseCleaner {
    policies: Vec<RetentionPolicy>,
    force_backup: bool,
    backup: Option<Arc<dyn BackupTrigger>>,
}

impl DatabaseCleaner {
    pub fn new(
        policies: Vec<RetentionPolicy>,
        force_backup: bool,
        backup: Option<Arc<dyn BackupTrigger>>,
    ) -> Self {
        Self {
            policies,
            force_backup,
            backup,
        }
    }

    /// Enforces every policy in order across every sensor.
    ///
    /// Policies are evaluated fully before the next one starts. Store errors
    /// abort the run and bubble out unmodified; days already cleaned stay
    /// cleaned. A failing backup trigger is logged and never propagated.
    pub async fn clean(&self, store: &dyn MeasurementStore, current_date: NaiveDate) -> Result<()> {
        info!("Performing database cleanup...");

        for policy in &self.policies {
            debug!(?policy, "Enforcing retention policy");

            let policy_start = current_date - Duration::days(i64::from(policy.age_in_days));
            let sensors = store.sensors().await?;

            for sensor in &sensors {
                self.clean_sensor(store, sensor, policy, policy_start).await?;
            }
        }

        info!("Database cleanup done");

        if self.force_backup {
            self.trigger_backup().await;
        }

        Ok(())
    }

    /// Walks one sensor backward from the policy start to the day of its
    /// earliest measurement, thinning each day.
    async fn clean_sensor(
        &self,
        store: &dyn MeasurementStore,
        sensor: &Sensor,
        policy: &RetentionPolicy,
        policy_start: NaiveDate,
    ) -> Result<()> {
        let Some(earliest) = store.earliest_measurement(sensor.id).await? else {
            debug!(sensor_id = sensor.id, "Sensor has no measurements, skipping");
            return Ok(());
        };

        let min_date = earliest.timestamp.date();
        let mut processed_date = policy_start;

        while processed_date >= min_date {
            let (kept, to_delete) =
                Self::categorize_measurements_for_day(store, processed_date, policy, sensor.id)
                    .await?;

            if !to_delete.is_empty() {
                store.delete_measurements(&to_delete).await?;
                debug!(
                    sensor_id = sensor.id,
                    day = %processed_date,
                    kept = kept.len(),
                    deleted = to_delete.len(),
                    "Thinned measurements for day"
                );
            }

            processed_date -= Duration::days(1);
        }

        Ok(())
    }

    /// Splits one day of one sensor into kept representatives and deletion
    /// candidates.
    ///
    /// Each ideal point queries the window from the previous point to the
    /// next one (the first window starts at its own point, the last ends at
    /// 23:59:59), so a measurement is inspected by at most two adjacent
    /// windows. Everything seen but never chosen closest is deleted.
    async fn categorize_measurements_for_day(
        store: &dyn MeasurementStore,
        day: NaiveDate,
        policy: &RetentionPolicy,
        sensor_id: i32,
    ) -> Result<(Vec<i32>, HashSet<i32>)> {
        let points = policy.determine_measurement_points(day)?;
        let end_of_day = NaiveDateTime::new(day, NaiveTime::MIN) + Duration::seconds(86_399);

        let mut seen = HashSet::new();
        let mut keep = Vec::new();

        for (index, point) in points.iter().enumerate() {
            let lower = if index == 0 { *point } else { points[index - 1] };
            let upper = points.get(index + 1).copied().unwrap_or(end_of_day);

            let candidates = store.measurements_in_range(sensor_id, lower, upper).await?;
            seen.extend(candidates.iter().map(|m| m.id));

            if let Some(closest) = closest_measurement_for_point(&candidates, *point) {
                keep.push(closest.id);
            }
        }

        let keep_set: HashSet<i32> = keep.iter().copied().collect();
        let to_delete = &seen - &keep_set;

        Ok((keep, to_delete))
    }

    async fn trigger_backup(&self) {
        let Some(backup) = &self.backup else {
            warn!("Forced backup requested but no backup trigger is configured");
            return;
        };

        info!("Triggering backup after cleanup");
        if let Err(e) = backup.backup().await {
            warn!(error = %e, "Backup trigger failed");
        }
    }
}

/// The candidate whose timestamp is nearest `point`.
///
/// Ties are broken in favor of the first minimal candidate in input order;
/// a later candidate replaces the current best only when strictly closer.
fn closest_measurement_for_point(
    measurements: &[Measurement],
    point: NaiveDateTime,
) -> Option<&Measurement> {
    let mut best: Option<(&Measurement, Duration)> = None;

    for measurement in measurements {
        let distance = (measurement.timestamp - point).abs();
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((measurement, distance)),
        }
    }

    best.map(|(measurement, _)| measurement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sensor(id: i32) -> Sensor {
        Sensor {
            id,
            device_id: 1,
            name: format!("sensor-{id}"),
            sensor_type: "temperature".into(),
        }
    }

    fn measurement(id: i32, sensor_id: i32, timestamp: NaiveDateTime) -> Measurement {
        Measurement {
            id,
            sensor_id,
            value: "5".into(),
            timestamp,
        }
    }

    fn ts(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 8, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    /// In-memory store that records delete batches and removes deleted rows.
    struct MockStore {
        sensors: Vec<Sensor>,
        measurements: Mutex<Vec<Measurement>>,
        delete_batches: Mutex<Vec<HashSet<i32>>>,
        sensor_queries: AtomicUsize,
    }

    impl MockStore {
        fn new(sensors: Vec<Sensor>, measurements: Vec<Measurement>) -> Self {
            Self {
                sensors,
                measurements: Mutex::new(measurements),
                delete_batches: Mutex::new(Vec::new()),
                sensor_queries: AtomicUsize::new(0),
            }
        }

        fn remaining_ids(&self) -> HashSet<i32> {
            self.measurements.lock().iter().map(|m| m.id).collect()
        }
    }

    #[async_trait]
    impl MeasurementStore for MockStore {
        async fn sensors(&self) -> Result<Vec<Sensor>> {
            self.sensor_queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.sensors.clone())
        }

        async fn earliest_measurement(&self, sensor_id: i32) -> Result<Option<Measurement>> {
            Ok(self
                .measurements
                .lock()
                .iter()
                .filter(|m| m.sensor_id == sensor_id)
                .min_by_key(|m| m.timestamp)
                .cloned())
        }

        async fn measurements_in_range(
            &self,
            sensor_id: i32,
            start: NaiveDateTime,
            end: NaiveDateTime,
        ) -> Result<Vec<Measurement>> {
            let mut rows: Vec<Measurement> = self
                .measurements
                .lock()
                .iter()
                .filter(|m| m.sensor_id == sensor_id && m.timestamp >= start && m.timestamp <= end)
                .cloned()
                .collect();
            rows.sort_by_key(|m| (m.timestamp, m.id));
            Ok(rows)
        }

        async fn delete_measurements(&self, ids: &HashSet<i32>) -> Result<u64> {
            if ids.is_empty() {
                return Ok(0);
            }
            self.delete_batches.lock().push(ids.clone());
            let mut measurements = self.measurements.lock();
            let before = measurements.len();
            measurements.retain(|m| !ids.contains(&m.id));
            Ok((before - measurements.len()) as u64)
        }
    }

    fn cleaner(policies: Vec<RetentionPolicy>) -> DatabaseCleaner {
        DatabaseCleaner::new(policies, false, None)
    }

    mod closest_point {
        use super::*;

        #[test]
        fn empty_input_yields_nothing() {
            assert_eq!(None, closest_measurement_for_point(&[], ts(18, 22, 0)));
        }

        #[test]
        fn all_candidates_before_the_point() {
            let candidates = vec![
                measurement(1, 15, ts(18, 21, 50)),
                measurement(2, 15, ts(18, 21, 55)),
            ];
            let result = closest_measurement_for_point(&candidates, ts(18, 22, 0));
            assert_eq!(Some(2), result.map(|m| m.id));
        }

        #[test]
        fn all_candidates_after_the_point() {
            let candidates = vec![
                measurement(1, 15, ts(18, 22, 15)),
                measurement(2, 15, ts(18, 22, 30)),
            ];
            let result = closest_measurement_for_point(&candidates, ts(18, 22, 0));
            assert_eq!(Some(1), result.map(|m| m.id));
        }

        #[test]
        fn candidates_on_both_sides() {
            let candidates = vec![
                measurement(1, 15, ts(18, 21, 55)),
                measurement(2, 15, ts(18, 22, 10)),
            ];
            let result = closest_measurement_for_point(&candidates, ts(18, 22, 0));
            assert_eq!(Some(1), result.map(|m| m.id));
        }

        #[test]
        fn equal_distance_keeps_the_first_candidate() {
            let candidates = vec![
                measurement(1, 15, ts(18, 21, 55)),
                measurement(2, 15, ts(18, 22, 5)),
            ];
            let result = closest_measurement_for_point(&candidates, ts(18, 22, 0));
            assert_eq!(Some(1), result.map(|m| m.id));
        }
    }

    fn one_sensor_day() -> Vec<Measurement> {
        vec![
            measurement(1, 1, ts(18, 6, 55)),
            measurement(2, 1, ts(18, 13, 15)),
            measurement(3, 1, ts(18, 13, 45)),
            measurement(4, 1, ts(18, 13, 48)),
        ]
    }

    #[tokio::test]
    async fn categorize_keeps_closest_per_point_and_deletes_the_rest() {
        let store = MockStore::new(vec![sensor(1)], one_sensor_day());
        let policy = RetentionPolicy::new(4, 10);

        let (kept, to_delete) = DatabaseCleaner::categorize_measurements_for_day(
            &store,
            NaiveDate::from_ymd_opt(2021, 8, 18).unwrap(),
            &policy,
            1,
        )
        .await
        .unwrap();

        // 06:55 is nearest the 06:00 point, 13:15 the 12:00 point and
        // 13:48 the 18:00 point; 13:45 is seen by two windows but never
        // chosen closest.
        assert_eq!(vec![1, 2, 4], kept);
        assert_eq!(HashSet::from([3]), to_delete);
    }

    #[tokio::test]
    async fn no_policies_touches_nothing() {
        let store = MockStore::new(vec![sensor(1)], one_sensor_day());

        cleaner(vec![]).clean(&store, ts(19, 0, 0).date()).await.unwrap();

        assert_eq!(0, store.sensor_queries.load(Ordering::SeqCst));
        assert!(store.delete_batches.lock().is_empty());
    }

    #[tokio::test]
    async fn one_policy_one_sensor_deletes_the_superseded_row() {
        let store = MockStore::new(vec![sensor(1)], one_sensor_day());
        let policy = RetentionPolicy::new(4, 1);

        cleaner(vec![policy]).clean(&store, ts(19, 0, 0).date()).await.unwrap();

        assert_eq!(vec![HashSet::from([3])], store.delete_batches.lock().clone());
        assert_eq!(HashSet::from([1, 2, 4]), store.remaining_ids());
    }

    #[tokio::test]
    async fn two_sensors_produce_separate_delete_batches() {
        let mut measurements = one_sensor_day();
        measurements.extend([
            measurement(5, 2, ts(18, 5, 0)),
            measurement(6, 2, ts(18, 5, 10)),
            measurement(7, 2, ts(18, 5, 12)),
        ]);
        let store = MockStore::new(vec![sensor(1), sensor(2)], measurements);
        let policy = RetentionPolicy::new(4, 1);

        cleaner(vec![policy]).clean(&store, ts(19, 0, 0).date()).await.unwrap();

        // Sensor 2: 05:00 is nearest the 00:00 point, 05:12 the 06:00 point.
        assert_eq!(
            vec![HashSet::from([3]), HashSet::from([6])],
            store.delete_batches.lock().clone()
        );
        assert_eq!(HashSet::from([1, 2, 4, 5, 7]), store.remaining_ids());
    }

    #[tokio::test]
    async fn two_policies_run_in_order_and_delete_separately() {
        let store = MockStore::new(vec![sensor(1)], one_sensor_day());
        let policies = vec![RetentionPolicy::new(4, 1), RetentionPolicy::new(2, 1)];

        cleaner(policies).clean(&store, ts(19, 0, 0).date()).await.unwrap();

        // The first policy thins to {06:55, 13:15, 13:48}; the second sees
        // that result and thins further to the two-point day {06:55, 13:15}.
        assert_eq!(
            vec![HashSet::from([3]), HashSet::from([4])],
            store.delete_batches.lock().clone()
        );
        assert_eq!(HashSet::from([1, 2]), store.remaining_ids());
    }

    #[tokio::test]
    async fn sensor_without_measurements_is_skipped() {
        let store = MockStore::new(vec![sensor(1)], vec![]);
        let policy = RetentionPolicy::new(4, 1);

        cleaner(vec![policy]).clean(&store, ts(19, 0, 0).date()).await.unwrap();

        assert!(store.delete_batches.lock().is_empty());
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let store = MockStore::new(vec![sensor(1)], one_sensor_day());
        let policy = RetentionPolicy::new(4, 1);
        let cleaner = cleaner(vec![policy]);

        cleaner.clean(&store, ts(19, 0, 0).date()).await.unwrap();
        assert_eq!(1, store.delete_batches.lock().len());

        cleaner.clean(&store, ts(19, 0, 0).date()).await.unwrap();
        assert_eq!(1, store.delete_batches.lock().len());
        assert_eq!(HashSet::from([1, 2, 4]), store.remaining_ids());
    }

    #[tokio::test]
    async fn day_walk_reaches_back_to_the_earliest_measurement() {
        let measurements = vec![
            measurement(10, 1, ts(16, 10, 0)),
            measurement(11, 1, ts(17, 10, 0)),
            measurement(12, 1, ts(17, 10, 5)),
            measurement(13, 1, ts(17, 10, 7)),
        ];
        let store = MockStore::new(vec![sensor(1)], measurements);
        let policy = RetentionPolicy::new(4, 1);

        cleaner(vec![policy]).clean(&store, ts(19, 0, 0).date()).await.unwrap();

        // Day 17: 10:00 is nearest the 06:00 point, 10:07 the 12:00 point.
        // Day 16 holds a single measurement which is kept untouched.
        assert_eq!(vec![HashSet::from([12])], store.delete_batches.lock().clone());
        assert_eq!(HashSet::from([10, 11, 13]), store.remaining_ids());
    }

    #[tokio::test]
    async fn recent_data_is_not_touched() {
        // All data on the current day; a one-day policy must not reach it.
        let store = MockStore::new(vec![sensor(1)], one_sensor_day());
        let policy = RetentionPolicy::new(4, 1);

        cleaner(vec![policy]).clean(&store, ts(18, 0, 0).date()).await.unwrap();

        assert!(store.delete_batches.lock().is_empty());
        assert_eq!(4, store.remaining_ids().len());
    }

    #[tokio::test]
    async fn invalid_policy_aborts_the_run() {
        let store = MockStore::new(vec![sensor(1)], one_sensor_day());
        let policy = RetentionPolicy::new(3, 1);

        let result = cleaner(vec![policy]).clean(&store, ts(19, 0, 0).date()).await;

        assert!(matches!(result, Err(crate::error::AppError::InvalidPolicy(_))));
        assert!(store.delete_batches.lock().is_empty());
    }

    struct FailingBackup {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BackupTrigger for FailingBackup {
        async fn backup(&self) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("backup endpoint unreachable")
        }
    }

    #[tokio::test]
    async fn failing_backup_does_not_fail_the_cleanup() {
        let store = MockStore::new(vec![sensor(1)], one_sensor_day());
        let backup = Arc::new(FailingBackup {
            calls: AtomicUsize::new(0),
        });
        let cleaner = DatabaseCleaner::new(
            vec![RetentionPolicy::new(4, 1)],
            true,
            Some(backup.clone()),
        );

        cleaner.clean(&store, ts(19, 0, 0).date()).await.unwrap();

        assert_eq!(1, backup.calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn backup_is_not_triggered_unless_forced() {
        let store = MockStore::new(vec![sensor(1)], one_sensor_day());
        let backup = Arc::new(FailingBackup {
            calls: AtomicUsize::new(0),
        });
        let cleaner = DatabaseCleaner::new(
            vec![RetentionPolicy::new(4, 1)],
            false,
            Some(backup.clone()),
        );

        cleaner.clean(&store, ts(19, 0, 0).date()).await.unwrap();

        assert_eq!(0, backup.calls.load(Ordering::SeqCst));
    }
}
