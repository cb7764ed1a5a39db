//! Storage seam used by the consumer.
//!
//! [`GuardianStore`] covers the four operations the consumer needs. The
//! `PostgreSQL` implementation delegates to [`EventStore`] and
//! [`AccessStore`]; tests substitute an in-memory store.

use async_trait::async_trait;
use ess_types::{AdminRecord, AuditRecord, DurableAlertPayload, EnvironmentReading};

use crate::access_store::AccessStore;
use crate::error::DbError;
use crate::event_store::EventStore;
use crate::postgres::PostgresPool;

/// Durable storage for the consumer.
#[async_trait]
pub trait GuardianStore: Send + Sync {
    /// Persist an environment reading.
    async fn insert_environment(&self, reading: &EnvironmentReading) -> Result<i64, DbError>;

    /// Persist an alert.
    async fn insert_alert(&self, alert: &DurableAlertPayload) -> Result<i64, DbError>;

    /// Look up an administrator by badge id.
    async fn find_admin(&self, admin_id: &str) -> Result<Option<AdminRecord>, DbError>;

    /// Append an access audit record.
    async fn log_access(&self, record: &AuditRecord) -> Result<i64, DbError>;
}

#[async_trait]
impl GuardianStore for PostgresPool {
    async fn insert_environment(&self, reading: &EnvironmentReading) -> Result<i64, DbError> {
        EventStore::new(self.pool()).insert_environment(reading).await
    }

    async fn insert_alert(&self, alert: &DurableAlertPayload) -> Result<i64, DbError> {
        EventStore::new(self.pool()).insert_alert(alert).await
    }

    async fn find_admin(&self, admin_id: &str) -> Result<Option<AdminRecord>, DbError> {
        AccessStore::new(self.pool()).find_admin(admin_id).await
    }

    async fn log_access(&self, record: &AuditRecord) -> Result<i64, DbError> {
        AccessStore::new(self.pool()).log_access(record).await
    }
}
