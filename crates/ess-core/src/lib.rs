//! Capture aggregation, gate evaluation, and alert dissemination for ESS
//! Guardian.
//!
//! This crate holds the pipeline logic shared by the three daemons. It has
//! no transport or database code of its own: the sensor, the bus, and the
//! store sit behind traits implemented in the binaries and adapter crates.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `ess-guardian.yaml` into
//!   strongly-typed structs, with environment overrides.
//! - [`error`] -- [`PipelineError`] and its [`FaultKind`] classification.
//! - [`roi`] -- ROI centering and hotspot reduction.
//! - [`snapshot_store`] -- Atomically replaced snapshot file.
//! - [`capture`] -- Sensor traits and the per-tick [`CaptureAggregator`].
//! - [`gate`] -- Alert state machine and [`GateEvaluator`].
//! - [`publish`] -- [`BusPublisher`] seam and an in-memory publisher.
//! - [`dissemination`] -- Alert fan-out onto the debug and durable subjects.
//! - [`gate_service`] -- Gate wired to the snapshot file and the bus.
//! - [`logging`] -- `tracing` subscriber setup shared by the daemons.
//! - [`shutdown`] -- Ctrl-C / SIGTERM shutdown channel.

pub mod capture;
pub mod config;
pub mod dissemination;
pub mod error;
pub mod gate;
pub mod gate_service;
pub mod logging;
pub mod publish;
pub mod roi;
pub mod shutdown;
pub mod snapshot_store;

pub use capture::{CaptureAggregator, CaptureSettings, RefreshRate, SensorConnector, ThermalSensor};
pub use config::{ConfigError, GuardianConfig};
pub use error::{FaultKind, PipelineError};
pub use gate::{AlertState, GateDecision, GateEvaluator, GatePolicy, evaluate};
pub use gate_service::GateService;
pub use publish::{BusPublisher, MemoryPublisher};
pub use snapshot_store::SnapshotStore;
