//! Alert fan-out onto the debug and durable subjects.

use std::sync::Arc;

use ess_types::Alert;

use crate::error::PipelineError;
use crate::publish::{BusPublisher, publish_json};

/// Per-subject result of one dissemination.
#[derive(Debug)]
pub struct DisseminationReport {
    /// Debug feed publish.
    pub debug: Result<(), PipelineError>,
    /// Durable-store feed publish.
    pub durable: Result<(), PipelineError>,
}

impl DisseminationReport {
    /// Whether both publishes succeeded.
    pub const fn is_complete(&self) -> bool {
        self.debug.is_ok() && self.durable.is_ok()
    }
}

/// Stateless fan-out of alerts onto two subjects.
#[derive(Clone)]
pub struct DisseminationGateway {
    publisher: Arc<dyn BusPublisher>,
    debug_subject: String,
    durable_subject: String,
}

impl DisseminationGateway {
    /// Create a gateway publishing through `publisher`.
    pub fn new(
        publisher: Arc<dyn BusPublisher>,
        debug_subject: impl Into<String>,
        durable_subject: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            debug_subject: debug_subject.into(),
            durable_subject: durable_subject.into(),
        }
    }

    /// Same subjects, different publisher.
    #[must_use]
    pub fn with_publisher(&self, publisher: Arc<dyn BusPublisher>) -> Self {
        Self {
            publisher,
            debug_subject: self.debug_subject.clone(),
            durable_subject: self.durable_subject.clone(),
        }
    }

    /// Publish `alert` on both subjects.
    ///
    /// The durable publish is attempted even when the debug publish fails.
    /// Failures are logged and returned in the report, never retried.
    pub async fn disseminate(&self, alert: &Alert) -> DisseminationReport {
        let debug = publish_json(
            self.publisher.as_ref(),
            &self.debug_subject,
            &alert.debug_payload(),
        )
        .await;
        if let Err(e) = &debug {
            tracing::warn!(n = alert.n, error = %e, "debug alert publish failed");
        }

        let durable = publish_json(
            self.publisher.as_ref(),
            &self.durable_subject,
            &alert.durable_payload(),
        )
        .await;
        if let Err(e) = &durable {
            tracing::warn!(n = alert.n, error = %e, "durable alert publish failed");
        }

        DisseminationReport { debug, durable }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use chrono::DateTime;
    use ess_types::AlertLevel;

    use super::*;
    use crate::publish::MemoryPublisher;

    fn alert() -> Alert {
        Alert {
            n: 12,
            level: AlertLevel::Critical,
            value: 52.0,
            timestamp: DateTime::parse_from_rfc3339("2026-03-02T10:15:00+09:00").unwrap(),
            location: "robot_1".to_owned(),
        }
    }

    #[tokio::test]
    async fn publishes_both_shapes() {
        let bus = Arc::new(MemoryPublisher::new());
        let gateway = DisseminationGateway::new(bus.clone(), "ess.thermal.alert", "ess.alert");
        let report = gateway.disseminate(&alert()).await;
        assert!(report.is_complete());

        let debug = bus.sent_on("ess.thermal.alert")[0].json().unwrap();
        assert_eq!(debug, serde_json::json!({"n": 12, "max": 52.0, "level": "critical"}));

        let durable = bus.sent_on("ess.alert")[0].json().unwrap();
        assert_eq!(durable["event_type"], "thermal");
        assert_eq!(durable["level"], "critical");
        assert_eq!(durable["value"], 52.0);
        assert_eq!(durable["location"], "robot_1");
        assert_eq!(durable["message"], "THERMAL CRITICAL");
        assert_eq!(durable["ts"], "2026-03-02T10:15:00+09:00");
    }

    #[tokio::test]
    async fn debug_failure_does_not_block_durable() {
        let bus = Arc::new(MemoryPublisher::new());
        bus.fail_on("ess.thermal.alert");
        let gateway = DisseminationGateway::new(bus.clone(), "ess.thermal.alert", "ess.alert");
        let report = gateway.disseminate(&alert()).await;
        assert!(report.debug.is_err());
        assert!(report.durable.is_ok());
        assert_eq!(bus.sent_on("ess.alert").len(), 1);
    }
}
