//! Shared data model for the ESS Guardian pipeline.
//!
//! Every message that crosses a process boundary is defined here: the
//! snapshot file written by the capture daemon, the alert payloads published
//! by the gate, and the environment and access messages handled by the
//! consumer.
//!
//! # Modules
//!
//! - [`snapshot`] -- Thermal status snapshot and ROI geometry
//! - [`alert`] -- Alert levels, alerts, and their bus payloads
//! - [`access`] -- Access requests, decisions, admin records, audit entries
//! - [`environment`] -- Environment readings and their wire adapter

pub mod access;
pub mod alert;
pub mod environment;
pub mod snapshot;

pub use access::{AccessDecision, AccessRequest, AccessResult, AdminRecord, AuditRecord};
pub use alert::{
    ACK_PROCESSED, Alert, AlertLevel, DebugAlertPayload, DiagnosticEvent, DurableAlertPayload,
    THERMAL_EVENT_TYPE,
};
pub use environment::{EnvironmentPayload, EnvironmentReading};
pub use snapshot::{CaptureOutcome, Hotspot, LEGACY_MAX_KEYS, PixelPos, Roi, Snapshot};
