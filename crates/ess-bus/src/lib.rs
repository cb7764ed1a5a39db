//! NATS transport for ESS Guardian.
//!
//! # Modules
//!
//! - [`client`] -- [`NatsBus`], the NATS-backed [`BusPublisher`] with
//!   acknowledged publishes.
//! - [`reconnect`] -- Connection state machine and delay policy.
//! - [`supervisor`] -- Reconnect loop driving a [`Session`].
//!
//! [`BusPublisher`]: ess_core::BusPublisher
//! [`Session`]: supervisor::Session

pub mod client;
pub mod reconnect;
pub mod supervisor;

pub use client::NatsBus;
pub use reconnect::{ConnectionState, ReconnectPolicy, Reconnector};
pub use supervisor::{Session, SessionEnd, supervise};
