//! Control-subject session for the gate.
//!
//! Each control message carries a trigger id as a plain integer. Triggers
//! are handled one at a time in arrival order. The [`GateService`] (and with
//! it the alert state) survives reconnects; only its publisher is swapped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use ess_bus::{NatsBus, Session, SessionEnd};
use ess_core::gate::TriggerOutcome;
use ess_core::{BusPublisher, GateService, GuardianConfig, PipelineError};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// NATS client name when the config does not set one.
pub const CLIENT_NAME: &str = "ess-gate";

/// Parse a control payload into a trigger id.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidPayload`] if the payload is not an
/// integer.
pub fn parse_trigger(subject: &str, payload: &[u8]) -> Result<i64, PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidPayload {
        subject: subject.to_owned(),
        reason,
    };
    let text = std::str::from_utf8(payload).map_err(|e| invalid(e.to_string()))?;
    text.trim()
        .parse::<i64>()
        .map_err(|e| invalid(format!("{text:?}: {e}")))
}

/// Handle one control message. Invalid payloads are logged and dropped.
pub async fn on_control(
    service: &mut GateService,
    subject: &str,
    payload: &[u8],
    offset: FixedOffset,
) -> Option<TriggerOutcome> {
    match parse_trigger(subject, payload) {
        Ok(n) => {
            debug!(n, "trigger received");
            Some(service.handle_trigger(n, Utc::now().with_timezone(&offset)).await)
        }
        Err(e) => {
            warn!(error = %e, "control message dropped");
            None
        }
    }
}

/// Reconnectable gate session.
pub struct GateSession {
    config: GuardianConfig,
    service: Option<GateService>,
    bus: Option<NatsBus>,
}

impl GateSession {
    /// Create a session. Nothing connects until the supervisor starts it.
    pub const fn new(config: GuardianConfig) -> Self {
        Self {
            config,
            service: None,
            bus: None,
        }
    }

    /// Flush outstanding publishes before exit.
    pub async fn close(&self) {
        let Some(bus) = &self.bus else {
            return;
        };
        if let Err(e) = bus.flush().await {
            warn!(error = %e, "final flush failed");
        }
    }
}

#[async_trait]
impl Session for GateSession {
    type Connection = async_nats::Subscriber;

    async fn connect(&mut self) -> Result<async_nats::Subscriber, PipelineError> {
        let bus = NatsBus::connect(&self.config.bus, CLIENT_NAME).await?;
        let subscriber = bus.subscribe(&self.config.topics.control).await?;

        let publisher: Arc<dyn BusPublisher> = Arc::new(bus.clone());
        match self.service.as_mut() {
            Some(service) => service.rebind(publisher),
            None => self.service = Some(GateService::from_config(&self.config, publisher)),
        }
        self.bus = Some(bus);
        Ok(subscriber)
    }

    async fn run(
        &mut self,
        mut subscriber: async_nats::Subscriber,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, PipelineError> {
        let offset = self.config.gate.offset();
        let Some(service) = self.service.as_mut() else {
            return Err(PipelineError::TransportDisconnect {
                reason: "session run before connect".to_owned(),
            });
        };
        info!(subject = %self.config.topics.control, "waiting for triggers");

        loop {
            tokio::select! {
                message = subscriber.next() => {
                    let Some(message) = message else {
                        return Ok(SessionEnd::StreamClosed);
                    };
                    on_control(service, &message.subject, &message.payload, offset).await;
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
