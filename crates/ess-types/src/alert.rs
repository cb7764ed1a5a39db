//! Alert levels, alerts, and the payload shapes published for them.
//!
//! An [`Alert`] is built once by the gate and never modified. Each bus
//! audience gets its own payload type so the debug feed and the durable feed
//! can evolve independently.

use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Value published on the acknowledgment subject after every trigger.
pub const ACK_PROCESSED: i32 = 1;

/// `event_type` used for alerts raised by the thermal gate.
pub const THERMAL_EVENT_TYPE: &str = "thermal";

/// Severity derived from the ROI maximum temperature.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Below the warning threshold. Never published.
    Normal,
    /// At or above the warning threshold.
    Warning,
    /// At or above the critical threshold.
    Critical,
}

impl AlertLevel {
    /// Classify a temperature against `warn_c < crit_c` using `>=`.
    ///
    /// NaN classifies as [`AlertLevel::Normal`].
    pub fn classify(max_c: f64, warn_c: f64, crit_c: f64) -> Self {
        if max_c >= crit_c {
            Self::Critical
        } else if max_c >= warn_c {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    /// Lowercase wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Whether this level produces an alert.
    pub const fn is_alerting(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A leveled, de-duplicated thermal alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Trigger sequence id that produced this alert.
    pub n: i64,
    /// Severity.
    pub level: AlertLevel,
    /// Maximum ROI temperature that was classified.
    pub value: f64,
    /// Evaluation time.
    pub timestamp: DateTime<FixedOffset>,
    /// Deployment location tag.
    pub location: String,
}

impl Alert {
    /// Compact payload for the debug feed.
    pub const fn debug_payload(&self) -> DebugAlertPayload {
        DebugAlertPayload {
            n: self.n,
            max: self.value,
            level: self.level,
        }
    }

    /// Canonical payload for the durable-store feed.
    pub fn durable_payload(&self) -> DurableAlertPayload {
        DurableAlertPayload {
            event_type: THERMAL_EVENT_TYPE.to_owned(),
            level: self.level.as_str().to_owned(),
            value: self.value,
            location: self.location.clone(),
            message: format!("THERMAL {}", self.level.as_str().to_uppercase()),
            ts: Some(self.timestamp),
        }
    }
}

/// `{n, max, level}` published on the debug alert subject.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DebugAlertPayload {
    /// Trigger sequence id.
    pub n: i64,
    /// Maximum ROI temperature.
    pub max: f64,
    /// Severity.
    pub level: AlertLevel,
}

/// Canonical alert shape stored by the consumer.
///
/// Other producers share the durable subject, so `event_type` and `level`
/// stay free-form strings here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableAlertPayload {
    /// Source of the alert (`thermal` for the gate).
    pub event_type: String,
    /// Severity name.
    pub level: String,
    /// Measured value.
    pub value: f64,
    /// Deployment location tag.
    pub location: String,
    /// Operator-facing message.
    pub message: String,
    /// Event time. The store default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<FixedOffset>>,
}

/// `{n, max, ts}` published on the diagnostic subject after every trigger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEvent {
    /// Trigger sequence id.
    pub n: i64,
    /// Maximum ROI temperature, `null` when no reading was available.
    pub max: Option<f64>,
    /// Evaluation time.
    pub ts: DateTime<FixedOffset>,
}
