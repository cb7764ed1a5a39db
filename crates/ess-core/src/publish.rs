//! Bus publishing seam.
//!
//! The gate and the consumer publish through [`BusPublisher`] so their logic
//! runs against [`MemoryPublisher`] in tests and against NATS in production.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PipelineError;

/// Publishes raw payloads onto bus subjects.
///
/// Implementations complete only once the bus has accepted the message
/// (acknowledged delivery), or fail with [`PipelineError::Publish`].
#[async_trait]
pub trait BusPublisher: Send + Sync {
    /// Publish `payload` on `subject`.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), PipelineError>;
}

/// Serialize `value` as JSON and publish it.
///
/// # Errors
///
/// Returns [`PipelineError::Publish`] if serialization or the publish fails.
pub async fn publish_json<T>(
    publisher: &dyn BusPublisher,
    subject: &str,
    value: &T,
) -> Result<(), PipelineError>
where
    T: Serialize + Sync + ?Sized,
{
    let payload = serde_json::to_vec(value).map_err(|e| PipelineError::Publish {
        subject: subject.to_owned(),
        reason: format!("serialize: {e}"),
    })?;
    publisher.publish(subject, payload).await
}

/// A message captured by [`MemoryPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Subject it was published on.
    pub subject: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Payload parsed as JSON.
    ///
    /// # Errors
    ///
    /// Returns the parse error if the payload is not JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// In-memory publisher that records every message.
///
/// Subjects registered with [`MemoryPublisher::fail_on`] reject publishes,
/// which lets callers exercise their failure paths.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<PublishedMessage>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryPublisher {
    /// Create an empty publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish on `subject` fail.
    pub fn fail_on(&self, subject: &str) {
        lock(&self.failing).insert(subject.to_owned());
    }

    /// Messages accepted so far, in publish order.
    pub fn sent(&self) -> Vec<PublishedMessage> {
        lock(&self.sent).clone()
    }

    /// Messages accepted on `subject`, in publish order.
    pub fn sent_on(&self, subject: &str) -> Vec<PublishedMessage> {
        lock(&self.sent)
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BusPublisher for MemoryPublisher {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), PipelineError> {
        if lock(&self.failing).contains(subject) {
            return Err(PipelineError::Publish {
                subject: subject.to_owned(),
                reason: "rejected by memory publisher".to_owned(),
            });
        }
        lock(&self.sent).push(PublishedMessage {
            subject: subject.to_owned(),
            payload,
        });
        Ok(())
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::error::FaultKind;

    #[tokio::test]
    async fn records_in_order() {
        let bus = MemoryPublisher::new();
        publish_json(&bus, "a", &serde_json::json!({"x": 1})).await.unwrap();
        bus.publish("b", b"1".to_vec()).await.unwrap();
        let sent = bus.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].json().unwrap()["x"], 1);
        assert_eq!(bus.sent_on("b")[0].payload, b"1");
    }

    #[tokio::test]
    async fn failing_subject_rejects() {
        let bus = MemoryPublisher::new();
        bus.fail_on("ess.alert");
        let err = bus.publish("ess.alert", b"{}".to_vec()).await.unwrap_err();
        assert_eq!(err.kind(), FaultKind::Publish);
        assert!(bus.sent().is_empty());
    }
}
