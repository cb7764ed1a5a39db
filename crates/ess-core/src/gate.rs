//! Triggered gate evaluation.
//!
//! Each control signal re-reads the latest snapshot, classifies its maximum
//! temperature, and decides whether an alert goes out. De-duplication is
//! per level: a repeat of the last emitted level is suppressed inside the
//! cooldown window, while any level change emits immediately. A normal
//! reading clears the remembered level so the next excursion always emits.
//!
//! [`evaluate`] holds the decision logic as a pure function.
//! [`GateEvaluator`] owns the [`AlertState`] between triggers.

use chrono::{DateTime, FixedOffset, TimeDelta};
use ess_types::{Alert, AlertLevel, DiagnosticEvent, Snapshot};

use crate::config::GateConfig;

/// Thresholds and alert metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct GatePolicy {
    /// Warning threshold (inclusive), degrees Celsius.
    pub warn_c: f64,
    /// Critical threshold (inclusive), degrees Celsius.
    pub crit_c: f64,
    /// Minimum spacing between two alerts of the same level.
    pub cooldown: TimeDelta,
    /// Location tag copied into every alert.
    pub location: String,
}

impl GatePolicy {
    /// Build a policy from the gate config section.
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            warn_c: config.warn_c,
            crit_c: config.crit_c,
            cooldown: config.cooldown(),
            location: config.location.clone(),
        }
    }
}

/// De-duplication memory. Starts empty and is never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertState {
    /// Level of the last emitted alert, cleared by a normal reading.
    pub last_level: Option<AlertLevel>,
    /// Time of the last emitted alert.
    pub last_emit_time: Option<DateTime<FixedOffset>>,
}

/// What a trigger resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// The snapshot carried no temperature. State unchanged.
    NoReading,
    /// Below the warning threshold. Remembered level cleared.
    Normal,
    /// Same level as the last alert, inside the cooldown window.
    Suppressed {
        /// Level that would have been emitted.
        level: AlertLevel,
        /// Time since the last emitted alert.
        since_last: TimeDelta,
    },
    /// Disseminate this alert.
    Emit(Alert),
}

impl GateDecision {
    /// The alert to disseminate, if any.
    pub const fn alert(&self) -> Option<&Alert> {
        match self {
            Self::Emit(alert) => Some(alert),
            _ => None,
        }
    }
}

/// Decide what trigger `n` produces for `max_c` at `now`.
///
/// Returns the successor state together with the decision. The input state
/// is never modified.
pub fn evaluate(
    state: &AlertState,
    n: i64,
    max_c: Option<f64>,
    now: DateTime<FixedOffset>,
    policy: &GatePolicy,
) -> (AlertState, GateDecision) {
    let Some(value) = max_c else {
        return (*state, GateDecision::NoReading);
    };

    let level = AlertLevel::classify(value, policy.warn_c, policy.crit_c);
    if !level.is_alerting() {
        let next = AlertState {
            last_level: None,
            ..*state
        };
        return (next, GateDecision::Normal);
    }

    if state.last_level == Some(level) {
        if let Some(last) = state.last_emit_time {
            let since_last = now.signed_duration_since(last);
            if since_last < policy.cooldown {
                return (*state, GateDecision::Suppressed { level, since_last });
            }
        }
    }

    let next = AlertState {
        last_level: Some(level),
        last_emit_time: Some(now),
    };
    let alert = Alert {
        n,
        level,
        value,
        timestamp: now,
        location: policy.location.clone(),
    };
    (next, GateDecision::Emit(alert))
}

/// Result of handling one trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
    /// Diagnostic event, emitted for every trigger.
    pub diagnostic: DiagnosticEvent,
    /// Alert decision.
    pub decision: GateDecision,
}

/// Owns the alert state of one gate.
#[derive(Debug, Clone)]
pub struct GateEvaluator {
    policy: GatePolicy,
    state: AlertState,
}

impl GateEvaluator {
    /// Create an evaluator with empty state.
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            state: AlertState::default(),
        }
    }

    /// Current state.
    pub const fn state(&self) -> &AlertState {
        &self.state
    }

    /// Policy in force.
    pub const fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Handle trigger `n` against the latest snapshot (if any).
    pub fn on_trigger(
        &mut self,
        n: i64,
        snapshot: Option<&Snapshot>,
        now: DateTime<FixedOffset>,
    ) -> TriggerOutcome {
        let max_c = snapshot.and_then(Snapshot::max_c);
        let (next, decision) = evaluate(&self.state, n, max_c, now, &self.policy);
        self.state = next;

        match &decision {
            GateDecision::NoReading => tracing::debug!(n, "no thermal reading"),
            GateDecision::Normal => tracing::debug!(n, max_c, "thermal normal"),
            GateDecision::Suppressed { level, since_last } => tracing::debug!(
                n,
                level = %level,
                since_last_ms = since_last.num_milliseconds(),
                "alert suppressed by cooldown"
            ),
            GateDecision::Emit(alert) => tracing::info!(
                n,
                level = %alert.level,
                value = alert.value,
                location = %alert.location,
                "thermal alert"
            ),
        }

        TriggerOutcome {
            diagnostic: DiagnosticEvent { n, max: max_c, ts: now },
            decision,
        }
    }
}
