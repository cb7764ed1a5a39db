//! Gate evaluation wired to the snapshot file and the bus.
//!
//! For every trigger: read the latest snapshot, acknowledge, publish the
//! diagnostic event, then disseminate the alert if the evaluator decided to
//! emit one. Publish failures are logged and never stop the next trigger.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use ess_types::ACK_PROCESSED;

use crate::config::GuardianConfig;
use crate::dissemination::DisseminationGateway;
use crate::gate::{GateEvaluator, GatePolicy, TriggerOutcome};
use crate::publish::{BusPublisher, publish_json};
use crate::snapshot_store::SnapshotStore;

/// Triggered gate with its side effects.
pub struct GateService {
    evaluator: GateEvaluator,
    store: SnapshotStore,
    publisher: Arc<dyn BusPublisher>,
    gateway: DisseminationGateway,
    ack_subject: String,
    events_subject: String,
}

impl GateService {
    /// Build a gate from the loaded configuration.
    pub fn from_config(config: &GuardianConfig, publisher: Arc<dyn BusPublisher>) -> Self {
        let gateway = DisseminationGateway::new(
            Arc::clone(&publisher),
            config.topics.debug_alert.clone(),
            config.topics.alert.clone(),
        );
        Self {
            evaluator: GateEvaluator::new(GatePolicy::from_config(&config.gate)),
            store: SnapshotStore::new(config.thermal.status_path.clone()),
            publisher,
            gateway,
            ack_subject: config.topics.ack.clone(),
            events_subject: config.topics.events.clone(),
        }
    }

    /// Swap in a new publisher after a reconnect. Alert state is kept.
    pub fn rebind(&mut self, publisher: Arc<dyn BusPublisher>) {
        self.gateway = self.gateway.with_publisher(Arc::clone(&publisher));
        self.publisher = publisher;
    }

    /// Evaluator state, for inspection.
    pub const fn evaluator(&self) -> &GateEvaluator {
        &self.evaluator
    }

    /// Handle control signal `n` received at `now`.
    pub async fn handle_trigger(&mut self, n: i64, now: DateTime<FixedOffset>) -> TriggerOutcome {
        let snapshot = match self.store.read() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(n, error = %e, "snapshot unreadable, treating as no reading");
                None
            }
        };
        let outcome = self.evaluator.on_trigger(n, snapshot.as_ref(), now);

        if let Err(e) = publish_json(self.publisher.as_ref(), &self.ack_subject, &ACK_PROCESSED).await
        {
            tracing::warn!(n, error = %e, "ack publish failed");
        }
        if let Err(e) =
            publish_json(self.publisher.as_ref(), &self.events_subject, &outcome.diagnostic).await
        {
            tracing::warn!(n, error = %e, "diagnostic publish failed");
        }

        if let Some(alert) = outcome.decision.alert() {
            let report = self.gateway.disseminate(alert).await;
            if !report.is_complete() {
                tracing::warn!(n, "alert only partially disseminated");
            }
        }
        outcome
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::float_cmp)]
mod tests {
    use chrono::TimeDelta;
    use ess_types::{AlertLevel, Roi, Snapshot};

    use super::*;
    use crate::gate::GateDecision;
    use crate::publish::MemoryPublisher;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: GuardianConfig,
        bus: Arc<MemoryPublisher>,
        service: GateService,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GuardianConfig::default();
        config.thermal.status_path = dir.path().join("status.json");
        let bus = Arc::new(MemoryPublisher::new());
        let service = GateService::from_config(&config, bus.clone());
        Fixture {
            _dir: dir,
            config,
            bus,
            service,
        }
    }

    fn t0() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-03-02T10:15:00+09:00").unwrap()
    }

    #[tokio::test]
    async fn no_snapshot_still_acks_and_reports() {
        let mut f = fixture();
        let out = f.service.handle_trigger(4, t0()).await;
        assert_eq!(out.decision, GateDecision::NoReading);

        let ack = f.bus.sent_on(&f.config.topics.ack);
        assert_eq!(ack.len(), 1);
        assert_eq!(ack[0].payload, b"1");

        let events = f.bus.sent_on(&f.config.topics.events);
        let event = events[0].json().unwrap();
        assert_eq!(event["n"], 4);
        assert!(event["max"].is_null());
        assert!(f.bus.sent_on(&f.config.topics.alert).is_empty());
    }

    #[tokio::test]
    async fn critical_snapshot_with_cooldown() {
        let mut f = fixture();
        std::fs::write(&f.config.thermal.status_path, br#"{"max_c": 52}"#).unwrap();

        f.service.handle_trigger(1, t0()).await;
        f.service.handle_trigger(2, t0() + TimeDelta::seconds(1)).await;
        f.service.handle_trigger(3, t0() + TimeDelta::seconds(3)).await;

        let debug = f.bus.sent_on(&f.config.topics.debug_alert);
        let durable = f.bus.sent_on(&f.config.topics.alert);
        assert_eq!(debug.len(), 2);
        assert_eq!(durable.len(), 2);
        assert_eq!(debug[0].json().unwrap()["level"], "critical");
        assert_eq!(durable[0].json().unwrap()["value"], 52.0);
        assert_eq!(debug[1].json().unwrap()["n"], 3);
        assert_eq!(f.bus.sent_on(&f.config.topics.ack).len(), 3);
        assert_eq!(f.bus.sent_on(&f.config.topics.events).len(), 3);
    }

    #[tokio::test]
    async fn offset_less_snapshot_timestamp_still_alerts() {
        let mut f = fixture();
        std::fs::write(
            &f.config.thermal.status_path,
            br#"{"timestamp":"2026-03-02T10:15:00","min_c":24.0,"max_c":52.0}"#,
        )
        .unwrap();

        let out = f.service.handle_trigger(1, t0()).await;
        assert_eq!(out.diagnostic.max, Some(52.0));
        assert_eq!(out.decision.alert().unwrap().level, AlertLevel::Critical);
        assert_eq!(f.bus.sent_on(&f.config.topics.alert).len(), 1);
    }

    #[tokio::test]
    async fn publish_failures_do_not_block_later_triggers() {
        let mut f = fixture();
        let store = SnapshotStore::new(&f.config.thermal.status_path);
        store
            .write(&Snapshot::failed(t0(), Roi::new(12, 2, 7, 20), "init_fail: no device"))
            .unwrap();
        f.bus.fail_on(&f.config.topics.ack);
        f.bus.fail_on(&f.config.topics.debug_alert);

        let out = f.service.handle_trigger(1, t0()).await;
        assert_eq!(out.diagnostic.max, None);

        std::fs::write(&f.config.thermal.status_path, br#"{"max_c": 40}"#).unwrap();
        let out = f.service.handle_trigger(2, t0()).await;
        assert_eq!(out.decision.alert().unwrap().level, AlertLevel::Warning);
        assert_eq!(f.bus.sent_on(&f.config.topics.alert).len(), 1);
        assert_eq!(
            f.service.evaluator().state().last_level,
            Some(AlertLevel::Warning)
        );
    }

    #[tokio::test]
    async fn rebind_keeps_alert_state() {
        let mut f = fixture();
        std::fs::write(&f.config.thermal.status_path, br#"{"max_c": 52}"#).unwrap();
        f.service.handle_trigger(1, t0()).await;

        let fresh = Arc::new(MemoryPublisher::new());
        f.service.rebind(fresh.clone());
        let out = f.service.handle_trigger(2, t0() + TimeDelta::seconds(1)).await;

        assert!(matches!(out.decision, GateDecision::Suppressed { .. }));
        assert_eq!(fresh.sent_on(&f.config.topics.ack).len(), 1);
        assert_eq!(f.bus.sent_on(&f.config.topics.ack).len(), 1);
    }
}
