//! NATS client wrapper.
//!
//! Publishes are acknowledged: [`NatsBus::publish`] returns only after the
//! server has processed a flush following the message. Every flush is
//! bounded by `bus.flush_timeout_ms`, so an outage surfaces as an error
//! instead of holding the caller until the reconnect completes.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ess_core::config::BusConfig;
use ess_core::{BusPublisher, PipelineError};
use tracing::{debug, info, warn};

/// How long a single connect attempt may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// NATS connection shared by a daemon's publishers and subscriptions.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
    flush_timeout: Duration,
}

impl NatsBus {
    /// Connect using the bus config section.
    ///
    /// `default_name` is the client name used when the config leaves it
    /// unset.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TransportDisconnect`] if the connection
    /// cannot be established.
    pub async fn connect(config: &BusConfig, default_name: &str) -> Result<Self, PipelineError> {
        let url = config.url();
        let name = config.client_name_or(default_name).to_owned();
        info!(url = %url, client = %name, "connecting to NATS server");

        let client = async_nats::ConnectOptions::new()
            .name(name)
            .connection_timeout(CONNECT_TIMEOUT)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Connected => info!("NATS connected"),
                    async_nats::Event::Disconnected => warn!("NATS disconnected"),
                    other => debug!(event = %other, "NATS event"),
                }
            })
            .connect(url.as_str())
            .await
            .map_err(|e| PipelineError::TransportDisconnect {
                reason: format!("failed to connect to {url}: {e}"),
            })?;
        info!("NATS connection established");
        Ok(Self {
            client,
            flush_timeout: config.flush_timeout(),
        })
    }

    /// Subscribe to `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TransportDisconnect`] if the subscription
    /// fails.
    pub async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, PipelineError> {
        let subscriber = self
            .client
            .subscribe(subject.to_owned())
            .await
            .map_err(|e| PipelineError::TransportDisconnect {
                reason: format!("failed to subscribe to {subject}: {e}"),
            })?;
        info!(subject = subject, "subscribed");
        Ok(subscriber)
    }

    /// Flush pending messages to the server.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::TransportDisconnect`] if the flush fails or
    /// is not confirmed within the flush timeout.
    pub async fn flush(&self) -> Result<(), PipelineError> {
        bounded_flush(self.flush_timeout, self.client.flush())
            .await
            .map_err(|reason| PipelineError::TransportDisconnect {
                reason: format!("flush failed: {reason}"),
            })
    }
}

/// Await `flush` for at most `limit`.
async fn bounded_flush<F, E>(limit: Duration, flush: F) -> Result<(), String>
where
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    match tokio::time::timeout(limit, flush).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no confirmation within {} ms", limit.as_millis())),
    }
}

#[async_trait]
impl BusPublisher for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), PipelineError> {
        debug!(subject = subject, bytes = payload.len(), "publishing");
        self.client
            .publish(subject.to_owned(), payload.into())
            .await
            .map_err(|e| PipelineError::Publish {
                subject: subject.to_owned(),
                reason: e.to_string(),
            })?;
        bounded_flush(self.flush_timeout, self.client.flush())
            .await
            .map_err(|reason| PipelineError::Publish {
                subject: subject.to_owned(),
                reason: format!("not acknowledged: {reason}"),
            })
    }
}

impl std::fmt::Debug for NatsBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBus")
            .field("flush_timeout", &self.flush_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stalled_flush_times_out() {
        let stalled = std::future::pending::<Result<(), std::io::Error>>();
        let err = bounded_flush(Duration::from_secs(2), stalled).await.unwrap_err();
        assert!(err.contains("2000 ms"), "{err}");
    }

    #[tokio::test]
    async fn flush_outcome_passes_through() {
        let ok = async { Ok::<(), std::io::Error>(()) };
        assert!(bounded_flush(Duration::from_secs(2), ok).await.is_ok());

        let failed = async { Err::<(), _>(std::io::Error::other("connection reset")) };
        let err = bounded_flush(Duration::from_secs(2), failed).await.unwrap_err();
        assert_eq!(err, "connection reset");
    }
}
