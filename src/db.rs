//! Database access layer with SQLx and PostgreSQL

use crate::cleaner::MeasurementStore;
use crate::error::{AppError, Result};
use crate::models::{DatabaseInfo, Measurement, Sensor};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use std::time::Duration;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS devices (
    id SERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS sensors (
    id SERIAL PRIMARY KEY,
    device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    UNIQUE (device_id, name)
);
CREATE TABLE IF NOT EXISTS measurements (
    id SERIAL PRIMARY KEY,
    sensor_id INTEGER NOT NULL REFERENCES sensors(id) ON DELETE CASCADE,
    value TEXT NOT NULL,
    "timestamp" TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_measurements_sensor_timestamp
    ON measurements (sensor_id, "timestamp");
"#;

/// Database connection pool and operations
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(connection_string)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect: {}", e)))?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist yet
    pub async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("Database schema is up to date");
        Ok(())
    }

    /// Aggregate snapshot used by the cleanup service for before/after
    /// accounting.
    pub async fn database_info(&self) -> Result<DatabaseInfo> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM measurements")
            .fetch_one(&self.pool)
            .await?;

        let size_in_bytes: i64 =
            sqlx::query_scalar("SELECT pg_database_size(current_database())")
                .fetch_one(&self.pool)
                .await?;

        Ok(DatabaseInfo {
            number_of_measurements: count,
            size_on_disk_in_mb: size_in_bytes / 1024 / 1024,
        })
    }
}

#[async_trait]
impl MeasurementStore for Database {
    async fn sensors(&self) -> Result<Vec<Sensor>> {
        let sensors = sqlx::query_as::<_, Sensor>(
            r#"
            SELECT id, device_id, name, type
            FROM sensors
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(sensors)
    }

    async fn earliest_measurement(&self, sensor_id: i32) -> Result<Option<Measurement>> {
        let measurement = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT id, sensor_id, value, "timestamp"
            FROM measurements
            WHERE sensor_id = $1
            ORDER BY "timestamp" ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(sensor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(measurement)
    }

    async fn measurements_in_range(
        &self,
        sensor_id: i32,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Measurement>> {
        let measurements = sqlx::query_as::<_, Measurement>(
            r#"
            SELECT id, sensor_id, value, "timestamp"
            FROM measurements
            WHERE sensor_id = $1 AND "timestamp" >= $2 AND "timestamp" <= $3
            ORDER BY "timestamp" ASC, id ASC
            "#,
        )
        .bind(sensor_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(measurements)
    }

    async fn delete_measurements(&self, ids: &HashSet<i32>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<i32> = ids.iter().copied().collect();
        let result = sqlx::query("DELETE FROM measurements WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Check that the database answers a trivial query, for readiness probes.
pub async fn ping(db: &Database) -> Result<()> {
    let row = sqlx::query("SELECT 1").fetch_one(db.pool()).await?;
    let _: i32 = row.get(0);
    Ok(())
}
