//! Persistence and access-control consumer for ESS Guardian.
//!
//! Stores environment readings and durable alerts, and answers badge access
//! requests with an audited allow/deny decision.
//!
//! # Architecture
//!
//! ```text
//! NATS (env, alert, access request) --> ConsumerHandler --> PostgreSQL
//!                                            |
//!                                            +--> NATS (access reply)
//! ```

mod handler;
mod session;

use std::sync::Arc;

use ess_bus::{ReconnectPolicy, supervise};
use ess_core::{GuardianConfig, logging, shutdown};
use ess_db::{PostgresConfig, PostgresPool};
use tracing::info;

use crate::session::ConsumerSession;

/// Application entry point.
///
/// Loads configuration, connects to `PostgreSQL` and runs migrations, then
/// consumes under the reconnect supervisor until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the database
/// cannot be reached at startup.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = GuardianConfig::load()?;
    logging::init(&config.logging);

    info!("ess-consumer starting");
    info!(
        bus = %config.bus.url(),
        env = %config.topics.env,
        alert = %config.topics.alert,
        access_request = %config.topics.access_request,
        "configuration loaded"
    );

    let pg_config = PostgresConfig::new(&config.database.url, config.database.max_connections);
    let pool = PostgresPool::connect(&pg_config).await?;
    pool.run_migrations().await?;
    let pool = Arc::new(pool);

    let policy = ReconnectPolicy::from_config(&config.bus);
    let mut session = ConsumerSession::new(config, pool.clone());
    let state = supervise(&mut session, policy, shutdown::signal_channel()).await;
    session.close().await;

    pool.close().await;
    info!(state = %state, "ess-consumer stopped");
    Ok(())
}
