//! Message handling for the consumer.
//!
//! Every inbound message is routed by subject and handled to completion
//! before the next one. Nothing here returns an error to the caller: store
//! and bus failures end up in the returned [`Disposition`].

use std::sync::Arc;

use chrono::Utc;
use ess_core::config::TopicConfig;
use ess_core::publish::publish_json;
use ess_core::{BusPublisher, FaultKind, PipelineError};
use ess_db::{DbError, GuardianStore};
use ess_types::{
    AccessDecision, AccessRequest, AccessResult, AuditRecord, DurableAlertPayload,
    EnvironmentPayload, EnvironmentReading,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Persisted as row `id` of `table`.
    Stored {
        /// Target table.
        table: &'static str,
        /// New row id.
        id: i64,
    },
    /// An access request was decided.
    Answered {
        /// Decision sent back.
        result: AccessResult,
        /// Whether the audit record was written.
        audited: bool,
        /// Whether the reply was published.
        replied: bool,
    },
    /// The message was logged and dropped.
    Dropped {
        /// Why it was dropped.
        kind: FaultKind,
        /// Error description.
        reason: String,
    },
    /// No route for the subject.
    Unrouted,
}

impl Disposition {
    fn dropped(e: &PipelineError) -> Self {
        Self::Dropped {
            kind: e.kind(),
            reason: e.to_string(),
        }
    }
}

/// Routes consumer subjects to the store and answers access requests.
pub struct ConsumerHandler {
    store: Arc<dyn GuardianStore>,
    publisher: Arc<dyn BusPublisher>,
    topics: TopicConfig,
}

impl ConsumerHandler {
    /// Create a handler over `store`, replying through `publisher`.
    pub fn new(
        store: Arc<dyn GuardianStore>,
        publisher: Arc<dyn BusPublisher>,
        topics: TopicConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            topics,
        }
    }

    /// Swap in a new publisher after a reconnect.
    pub fn rebind(&mut self, publisher: Arc<dyn BusPublisher>) {
        self.publisher = publisher;
    }

    /// Handle one message received on `subject`.
    ///
    /// `reply` is the requester's reply subject, if the message carried one.
    pub async fn handle(&self, subject: &str, reply: Option<&str>, payload: &[u8]) -> Disposition {
        if subject == self.topics.env {
            self.on_environment(subject, payload).await
        } else if subject == self.topics.alert {
            self.on_alert(subject, payload).await
        } else if subject == self.topics.access_request {
            self.on_access_request(subject, reply, payload).await
        } else {
            Disposition::Unrouted
        }
    }

    async fn on_environment(&self, subject: &str, payload: &[u8]) -> Disposition {
        let wire = match decode::<EnvironmentPayload>(subject, payload) {
            Ok(wire) => wire,
            Err(e) => return Disposition::dropped(&e),
        };
        let reading = EnvironmentReading::from(wire);
        match self.store.insert_environment(&reading).await {
            Ok(id) => {
                debug!(
                    id,
                    temperature = ?reading.temperature,
                    humidity = ?reading.humidity,
                    "environment reading stored"
                );
                Disposition::Stored {
                    table: "environment_data",
                    id,
                }
            }
            Err(e) => Disposition::dropped(&persistence(&e)),
        }
    }

    async fn on_alert(&self, subject: &str, payload: &[u8]) -> Disposition {
        let alert = match decode::<DurableAlertPayload>(subject, payload) {
            Ok(alert) => alert,
            Err(e) => return Disposition::dropped(&e),
        };
        match self.store.insert_alert(&alert).await {
            Ok(id) => {
                info!(
                    id,
                    event_type = %alert.event_type,
                    level = %alert.level,
                    location = %alert.location,
                    "alert stored"
                );
                Disposition::Stored {
                    table: "alert_events",
                    id,
                }
            }
            Err(e) => Disposition::dropped(&persistence(&e)),
        }
    }

    async fn on_access_request(
        &self,
        subject: &str,
        reply: Option<&str>,
        payload: &[u8],
    ) -> Disposition {
        let request = match decode::<AccessRequest>(subject, payload) {
            Ok(request) => request.normalized(),
            Err(e) => return Disposition::dropped(&e),
        };
        if !request.is_complete() {
            let e = PipelineError::InvalidPayload {
                subject: subject.to_owned(),
                reason: "admin_id and access_point are required".to_owned(),
            };
            return Disposition::dropped(&e);
        }

        let result = self.decide(&request).await;

        let audit = AuditRecord {
            admin_id: request.admin_id.clone(),
            access_point: request.access_point.clone(),
            result,
            timestamp: Utc::now(),
        };
        let audited = match self.store.log_access(&audit).await {
            Ok(_) => true,
            Err(e) => {
                error!(admin_id = %request.admin_id, error = %e, "access audit write failed");
                false
            }
        };

        let target = reply.unwrap_or(&self.topics.access_response);
        let replied = match publish_json(self.publisher.as_ref(), target, &AccessDecision { result })
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(subject = target, error = %e, "access reply failed");
                false
            }
        };

        info!(
            admin_id = %request.admin_id,
            access_point = %request.access_point,
            result = %result,
            "access request decided"
        );
        Disposition::Answered {
            result,
            audited,
            replied,
        }
    }

    /// Look up the admin and check the requested access point. `request`
    /// is already normalized.
    async fn decide(&self, request: &AccessRequest) -> AccessResult {
        match self.store.find_admin(&request.admin_id).await {
            Ok(Some(admin)) if admin.permits(&request.access_point) => AccessResult::Success,
            Ok(Some(_)) => AccessResult::Fail,
            Ok(None) => {
                debug!(admin_id = %request.admin_id, "unknown admin");
                AccessResult::Fail
            }
            Err(e) => {
                error!(admin_id = %request.admin_id, error = %e, "admin lookup failed");
                AccessResult::Fail
            }
        }
    }
}

fn decode<T: DeserializeOwned>(subject: &str, payload: &[u8]) -> Result<T, PipelineError> {
    serde_json::from_slice(payload).map_err(|e| PipelineError::InvalidPayload {
        subject: subject.to_owned(),
        reason: e.to_string(),
    })
}

fn persistence(e: &DbError) -> PipelineError {
    PipelineError::Persistence {
        reason: e.to_string(),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::arithmetic_side_effects
)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ess_core::MemoryPublisher;
    use ess_types::AdminRecord;

    use super::*;

    #[derive(Default)]
    struct MemoryStore {
        admins: HashMap<String, AdminRecord>,
        environment: Mutex<Vec<EnvironmentReading>>,
        alerts: Mutex<Vec<DurableAlertPayload>>,
        audits: Mutex<Vec<AuditRecord>>,
        fail_writes: bool,
        fail_lookup: bool,
        fail_audit: bool,
    }

    impl MemoryStore {
        fn with_admin(mut self, admin_id: &str, points: &str) -> Self {
            let id = i64::try_from(self.admins.len()).unwrap() + 1;
            self.admins.insert(
                admin_id.to_owned(),
                AdminRecord {
                    id,
                    admin_id: admin_id.to_owned(),
                    access_points: points.to_owned(),
                },
            );
            self
        }

        fn audits(&self) -> Vec<AuditRecord> {
            self.audits.lock().unwrap().clone()
        }
    }

    fn down() -> DbError {
        DbError::Postgres(sqlx::Error::PoolClosed)
    }

    fn push<T>(rows: &Mutex<Vec<T>>, row: T) -> i64 {
        let mut rows = rows.lock().unwrap();
        rows.push(row);
        i64::try_from(rows.len()).unwrap()
    }

    #[async_trait]
    impl GuardianStore for MemoryStore {
        async fn insert_environment(&self, reading: &EnvironmentReading) -> Result<i64, DbError> {
            if self.fail_writes {
                return Err(down());
            }
            Ok(push(&self.environment, *reading))
        }

        async fn insert_alert(&self, alert: &DurableAlertPayload) -> Result<i64, DbError> {
            if self.fail_writes {
                return Err(down());
            }
            Ok(push(&self.alerts, alert.clone()))
        }

        async fn find_admin(&self, admin_id: &str) -> Result<Option<AdminRecord>, DbError> {
            if self.fail_lookup {
                return Err(down());
            }
            Ok(self.admins.get(admin_id).cloned())
        }

        async fn log_access(&self, record: &AuditRecord) -> Result<i64, DbError> {
            if self.fail_audit {
                return Err(down());
            }
            Ok(push(&self.audits, record.clone()))
        }
    }

    fn fixture(store: MemoryStore) -> (ConsumerHandler, Arc<MemoryStore>, Arc<MemoryPublisher>) {
        let store = Arc::new(store);
        let bus = Arc::new(MemoryPublisher::new());
        let handler = ConsumerHandler::new(store.clone(), bus.clone(), TopicConfig::default());
        (handler, store, bus)
    }

    async fn request(handler: &ConsumerHandler, body: &str) -> Disposition {
        handler.handle("ess.access.request", None, body.as_bytes()).await
    }

    #[tokio::test]
    async fn environment_reading_is_stored() {
        let (handler, store, _) = fixture(MemoryStore::default());
        let out = handler.handle("ess.env", None, br#"{"t": 23.1, "h": 55.3}"#).await;
        assert_eq!(
            out,
            Disposition::Stored {
                table: "environment_data",
                id: 1
            }
        );
        let rows = store.environment.lock().unwrap();
        assert_eq!(rows[0].temperature, Some(23.1));
        assert_eq!(rows[0].humidity, Some(55.3));
    }

    #[tokio::test]
    async fn store_failure_drops_message_and_keeps_going() {
        let (handler, _, _) = fixture(MemoryStore {
            fail_writes: true,
            ..MemoryStore::default()
        });
        let out = handler.handle("ess.env", None, br#"{"t": 20}"#).await;
        assert!(matches!(
            out,
            Disposition::Dropped {
                kind: FaultKind::Persistence,
                ..
            }
        ));

        let out = handler
            .handle(
                "ess.alert",
                None,
                br#"{"event_type":"thermal","level":"warning","value":40,"location":"robot_1","message":"THERMAL WARNING"}"#,
            )
            .await;
        assert!(matches!(out, Disposition::Dropped { .. }));
    }

    #[tokio::test]
    async fn alert_without_ts_is_stored() {
        let (handler, store, _) = fixture(MemoryStore::default());
        let out = handler
            .handle(
                "ess.alert",
                None,
                br#"{"event_type":"thermal","level":"critical","value":52.0,"location":"robot_1","message":"THERMAL CRITICAL"}"#,
            )
            .await;
        assert!(matches!(out, Disposition::Stored { table: "alert_events", .. }));
        let alerts = store.alerts.lock().unwrap();
        assert_eq!(alerts[0].ts, None);
        assert_eq!(alerts[0].value, 52.0);
    }

    #[tokio::test]
    async fn malformed_json_is_dropped() {
        let (handler, store, bus) = fixture(MemoryStore::default());
        for subject in ["ess.env", "ess.alert", "ess.access.request"] {
            let out = handler.handle(subject, None, b"{not json").await;
            assert!(
                matches!(
                    out,
                    Disposition::Dropped {
                        kind: FaultKind::InvalidPayload,
                        ..
                    }
                ),
                "{subject}: {out:?}"
            );
        }
        assert!(store.audits().is_empty());
        assert!(bus.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_admin_is_denied_and_audited_once() {
        let (handler, store, bus) = fixture(MemoryStore::default());
        let out = request(&handler, r#"{"admin_id":"FFFF","access_point":"main"}"#).await;
        assert_eq!(
            out,
            Disposition::Answered {
                result: AccessResult::Fail,
                audited: true,
                replied: true
            }
        );
        let audits = store.audits();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].result, AccessResult::Fail);

        let replies = bus.sent_on("ess.access.response");
        assert_eq!(replies[0].json().unwrap(), serde_json::json!({"result": "fail"}));
    }

    #[tokio::test]
    async fn numeric_badge_is_looked_up_and_audited() {
        let (handler, store, bus) =
            fixture(MemoryStore::default().with_admin("12345678", "main"));

        let out = request(&handler, r#"{"admin_id":12345678,"access_point":"main"}"#).await;
        assert!(matches!(
            out,
            Disposition::Answered {
                result: AccessResult::Success,
                ..
            }
        ));
        let out = request(&handler, r#"{"admin_id":87654321,"access_point":"main"}"#).await;
        assert!(matches!(
            out,
            Disposition::Answered {
                result: AccessResult::Fail,
                ..
            }
        ));

        let audits = store.audits();
        assert_eq!(audits.len(), 2);
        assert_eq!(audits[0].admin_id, "12345678");
        assert_eq!(audits[1].admin_id, "87654321");
        let replies = bus.sent_on("ess.access.response");
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[1].json().unwrap()["result"], "fail");
    }

    #[tokio::test]
    async fn audit_records_the_trimmed_badge() {
        let (handler, store, _) = fixture(MemoryStore::default().with_admin("04A1", "main"));
        let out = request(&handler, r#"{"admin_id":" 04A1 ","access_point":" main"}"#).await;
        assert!(matches!(
            out,
            Disposition::Answered {
                result: AccessResult::Success,
                ..
            }
        ));
        let audits = store.audits();
        assert_eq!(audits[0].admin_id, "04A1");
        assert_eq!(audits[0].access_point, "main");
    }

    #[tokio::test]
    async fn permission_list_decides_access() {
        let (handler, store, bus) = fixture(MemoryStore::default().with_admin("04A1", "main,ew2"));

        request(&handler, r#"{"admin_id":"04A1","access_point":"ew2"}"#).await;
        request(&handler, r#"{"admin_id":"04A1","access_point":"lobby"}"#).await;

        let results: Vec<_> = store.audits().iter().map(|a| a.result).collect();
        assert_eq!(results, [AccessResult::Success, AccessResult::Fail]);

        let replies = bus.sent_on("ess.access.response");
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].json().unwrap()["result"], "success");
        assert_eq!(replies[1].json().unwrap()["result"], "fail");
    }

    #[tokio::test]
    async fn incomplete_request_gets_no_audit_and_no_reply() {
        let (handler, store, bus) = fixture(MemoryStore::default().with_admin("04A1", "main"));
        for body in [
            r#"{"admin_id":"04A1"}"#,
            r#"{"access_point":"main"}"#,
            r#"{"admin_id":"","access_point":"main"}"#,
        ] {
            let out = request(&handler, body).await;
            assert!(matches!(out, Disposition::Dropped { .. }), "{body}");
        }
        assert!(store.audits().is_empty());
        assert!(bus.sent().is_empty());
    }

    #[tokio::test]
    async fn lookup_failure_answers_fail() {
        let (handler, store, bus) = fixture(MemoryStore {
            fail_lookup: true,
            ..MemoryStore::default().with_admin("04A1", "main")
        });
        let out = request(&handler, r#"{"admin_id":"04A1","access_point":"main"}"#).await;
        assert!(matches!(
            out,
            Disposition::Answered {
                result: AccessResult::Fail,
                ..
            }
        ));
        assert_eq!(store.audits().len(), 1);
        assert_eq!(bus.sent_on("ess.access.response").len(), 1);
    }

    #[tokio::test]
    async fn audit_failure_still_replies() {
        let (handler, _, bus) = fixture(MemoryStore {
            fail_audit: true,
            ..MemoryStore::default().with_admin("04A1", "main")
        });
        let out = request(&handler, r#"{"admin_id":"04A1","access_point":"main"}"#).await;
        assert_eq!(
            out,
            Disposition::Answered {
                result: AccessResult::Success,
                audited: false,
                replied: true
            }
        );
        assert_eq!(
            bus.sent_on("ess.access.response")[0].json().unwrap()["result"],
            "success"
        );
    }

    #[tokio::test]
    async fn reply_subject_is_honored() {
        let (handler, _, bus) = fixture(MemoryStore::default().with_admin("04A1", "main"));
        handler
            .handle(
                "ess.access.request",
                Some("_INBOX.abc"),
                br#"{"admin_id":"04A1","access_point":"main"}"#,
            )
            .await;
        assert_eq!(bus.sent_on("_INBOX.abc").len(), 1);
        assert!(bus.sent_on("ess.access.response").is_empty());
    }

    #[tokio::test]
    async fn failed_reply_is_reported() {
        let (handler, store, bus) = fixture(MemoryStore::default());
        bus.fail_on("ess.access.response");
        let out = request(&handler, r#"{"admin_id":"X","access_point":"main"}"#).await;
        assert!(matches!(out, Disposition::Answered { replied: false, .. }));
        assert_eq!(store.audits().len(), 1);
    }

    #[tokio::test]
    async fn unknown_subject_is_unrouted() {
        let (handler, _, _) = fixture(MemoryStore::default());
        assert_eq!(handler.handle("ess.other", None, b"{}").await, Disposition::Unrouted);
    }
}
