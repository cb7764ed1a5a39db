//! Data layer for ESS Guardian (`PostgreSQL`).
//!
//! ```text
//! Consumer
//!     |
//!     +-- GuardianStore ---------> PostgreSQL (PostgresPool)
//!         |-- EventStore       (environment_data, alert_events)
//!         +-- AccessStore      (admins lookup, access_logs audit)
//! ```
//!
//! # Modules
//!
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`event_store`] -- Environment reading and alert inserts
//! - [`access_store`] -- Admin lookup and access audit log
//! - [`store`] -- [`GuardianStore`] trait used by the consumer
//! - [`error`] -- Shared error types

pub mod access_store;
pub mod error;
pub mod event_store;
pub mod postgres;
pub mod store;

pub use access_store::{AccessStore, AdminRow};
pub use error::DbError;
pub use event_store::EventStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::GuardianStore;
