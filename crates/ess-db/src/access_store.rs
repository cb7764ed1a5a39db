//! Admin lookup and access audit log.
//!
//! The `admins` table is maintained elsewhere and only read here.
//! `access_logs` is append-only.

use ess_types::{AdminRecord, AuditRecord};
use sqlx::PgPool;

use crate::error::DbError;
use crate::event_store::finish;

/// Operations on `admins` and `access_logs`.
pub struct AccessStore<'a> {
    pool: &'a PgPool,
}

impl<'a> AccessStore<'a> {
    /// Create a store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Look up an administrator by badge id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn find_admin(&self, admin_id: &str) -> Result<Option<AdminRecord>, DbError> {
        let row = sqlx::query_as::<_, AdminRow>(
            r"SELECT id, admin_id, access_points
              FROM admins
              WHERE admin_id = $1",
        )
        .bind(admin_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(row.map(AdminRecord::from))
    }

    /// Append one audit record. Returns the new row id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert or commit fails.
    pub async fn log_access(&self, record: &AuditRecord) -> Result<i64, DbError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query_as::<_, (i64,)>(
            r"INSERT INTO access_logs (admin_id, access_point, result, created_at)
              VALUES ($1, $2, $3, $4)
              RETURNING id",
        )
        .bind(&record.admin_id)
        .bind(&record.access_point)
        .bind(record.result.as_str())
        .bind(record.timestamp)
        .fetch_one(&mut *tx)
        .await;

        let id = finish(tx, inserted, "access_logs").await?;
        tracing::info!(
            id,
            admin_id = %record.admin_id,
            access_point = %record.access_point,
            result = %record.result,
            "Logged access decision"
        );
        Ok(id)
    }
}

/// A row from the `admins` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdminRow {
    /// Primary key.
    pub id: i64,
    /// Badge identifier.
    pub admin_id: String,
    /// Comma-separated access point names.
    pub access_points: Option<String>,
}

impl From<AdminRow> for AdminRecord {
    fn from(row: AdminRow) -> Self {
        Self {
            id: row.id,
            admin_id: row.admin_id,
            access_points: row.access_points.unwrap_or_default(),
        }
    }
}
