//! Inserts for environment readings and durable alerts.
//!
//! Each insert runs in its own transaction. On failure the transaction is
//! rolled back and the error returned; callers log and drop the message.

use chrono::Utc;
use ess_types::{DurableAlertPayload, EnvironmentReading};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::DbError;

/// Operations on `environment_data` and `alert_events`.
pub struct EventStore<'a> {
    pool: &'a PgPool,
}

impl<'a> EventStore<'a> {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert one environment reading. Returns the new row id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert or commit fails.
    pub async fn insert_environment(&self, reading: &EnvironmentReading) -> Result<i64, DbError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query_as::<_, (i64,)>(
            r"INSERT INTO environment_data (temperature, humidity)
              VALUES ($1, $2)
              RETURNING id",
        )
        .bind(reading.temperature)
        .bind(reading.humidity)
        .fetch_one(&mut *tx)
        .await;

        let id = finish(tx, inserted, "environment_data").await?;
        tracing::debug!(
            id,
            temperature = reading.temperature,
            humidity = reading.humidity,
            "Saved environment reading"
        );
        Ok(id)
    }

    /// Insert one alert in its durable shape. A missing `ts` falls back to
    /// the database clock. Returns the new row id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert or commit fails.
    pub async fn insert_alert(&self, alert: &DurableAlertPayload) -> Result<i64, DbError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query_as::<_, (i64,)>(
            r"INSERT INTO alert_events (event_type, level, value, location, message, ts)
              VALUES ($1, $2, $3, $4, $5, COALESCE($6, now()))
              RETURNING id",
        )
        .bind(&alert.event_type)
        .bind(&alert.level)
        .bind(alert.value)
        .bind(&alert.location)
        .bind(&alert.message)
        .bind(alert.ts.map(|ts| ts.with_timezone(&Utc)))
        .fetch_one(&mut *tx)
        .await;

        let id = finish(tx, inserted, "alert_events").await?;
        tracing::info!(
            id,
            level = %alert.level,
            value = alert.value,
            location = %alert.location,
            "Saved alert"
        );
        Ok(id)
    }
}

/// Commit on success, roll back explicitly on failure.
pub(crate) async fn finish(
    tx: Transaction<'_, Postgres>,
    inserted: Result<(i64,), sqlx::Error>,
    table: &str,
) -> Result<i64, DbError> {
    match inserted {
        Ok(row) => {
            tx.commit().await?;
            Ok(row.0)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(table, error = %rollback, "Rollback failed");
            }
            Err(e.into())
        }
    }
}
