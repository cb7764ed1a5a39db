//! Bus session for the consumer.
//!
//! Subscribes to the environment, alert, and access-request subjects and
//! merges them into one stream, so messages are handled one at a time.

use std::sync::Arc;

use async_trait::async_trait;
use ess_bus::{NatsBus, Session, SessionEnd};
use ess_core::{BusPublisher, GuardianConfig, PipelineError};
use ess_db::GuardianStore;
use futures::stream::{SelectAll, StreamExt, select_all};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::handler::{ConsumerHandler, Disposition};

/// NATS client name when the config does not set one.
pub const CLIENT_NAME: &str = "ess-consumer";

/// Reconnectable consumer session.
pub struct ConsumerSession {
    config: GuardianConfig,
    store: Arc<dyn GuardianStore>,
    handler: Option<ConsumerHandler>,
    bus: Option<NatsBus>,
}

impl ConsumerSession {
    /// Create a session over `store`. Nothing connects until the supervisor
    /// starts it.
    pub fn new(config: GuardianConfig, store: Arc<dyn GuardianStore>) -> Self {
        Self {
            config,
            store,
            handler: None,
            bus: None,
        }
    }

    /// Flush outstanding replies before exit.
    pub async fn close(&self) {
        let Some(bus) = &self.bus else {
            return;
        };
        if let Err(e) = bus.flush().await {
            warn!(error = %e, "final flush failed");
        }
    }
}

fn log_disposition(subject: &str, disposition: &Disposition) {
    match disposition {
        Disposition::Stored { table, id } => debug!(subject, table, id, "stored"),
        Disposition::Answered {
            result,
            audited,
            replied,
        } => debug!(subject, %result, audited, replied, "access request handled"),
        Disposition::Dropped { kind, reason } => {
            warn!(subject, kind = ?kind, reason = %reason, "message dropped");
        }
        Disposition::Unrouted => debug!(subject, "no route for subject"),
    }
}

#[async_trait]
impl Session for ConsumerSession {
    type Connection = SelectAll<async_nats::Subscriber>;

    async fn connect(&mut self) -> Result<Self::Connection, PipelineError> {
        let bus = NatsBus::connect(&self.config.bus, CLIENT_NAME).await?;
        let publisher: Arc<dyn BusPublisher> = Arc::new(bus.clone());

        match self.handler.as_mut() {
            Some(handler) => handler.rebind(publisher),
            None => {
                self.handler = Some(ConsumerHandler::new(
                    Arc::clone(&self.store),
                    publisher,
                    self.config.topics.clone(),
                ));
            }
        }

        let topics = &self.config.topics;
        let mut subscribers = Vec::with_capacity(3);
        for subject in [&topics.env, &topics.alert, &topics.access_request] {
            subscribers.push(bus.subscribe(subject).await?);
        }

        self.bus = Some(bus);
        Ok(select_all(subscribers))
    }

    async fn run(
        &mut self,
        mut messages: Self::Connection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, PipelineError> {
        let Some(handler) = self.handler.as_ref() else {
            return Err(PipelineError::TransportDisconnect {
                reason: "session run before connect".to_owned(),
            });
        };
        info!("consuming");

        loop {
            tokio::select! {
                message = messages.next() => {
                    let Some(message) = message else {
                        return Ok(SessionEnd::StreamClosed);
                    };
                    let disposition = handler
                        .handle(&message.subject, message.reply.as_deref(), &message.payload)
                        .await;
                    log_disposition(&message.subject, &disposition);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }
}
