//! Gate control daemon for ESS Guardian.
//!
//! Waits for trigger ids on the control subject. For each trigger it reads
//! the latest thermal snapshot, acknowledges, publishes a diagnostic event,
//! and disseminates a de-duplicated alert when the reading crosses a
//! threshold.
//!
//! # Architecture
//!
//! ```text
//! NATS (control) --> GateService --> SnapshotStore (read)
//!                         |
//!                         +--> NATS (ack, events, debug alert, durable alert)
//! ```

mod session;

use ess_bus::{ReconnectPolicy, supervise};
use ess_core::{GuardianConfig, logging, shutdown};
use tracing::info;

use crate::session::GateSession;

/// Application entry point.
///
/// Loads configuration, initializes logging, then runs the gate session
/// under the reconnect supervisor until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GuardianConfig::load()?;
    logging::init(&config.logging);

    info!("ess-gate starting");
    info!(
        bus = %config.bus.url(),
        control = %config.topics.control,
        warn_c = config.gate.warn_c,
        crit_c = config.gate.crit_c,
        cooldown_secs = config.gate.cooldown_secs,
        location = %config.gate.location,
        "configuration loaded"
    );

    let policy = ReconnectPolicy::from_config(&config.bus);
    let mut session = GateSession::new(config);
    let state = supervise(&mut session, policy, shutdown::signal_channel()).await;
    session.close().await;

    info!(state = %state, "ess-gate stopped");
    Ok(())
}
