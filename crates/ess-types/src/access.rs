//! Access-control request, decision, and audit types.
//!
//! Requests arrive from badge readers as `{admin_id, access_point}` and are
//! answered with `{result}` only. Permission contents never travel back over
//! the request/response channel.
//!
//! Some readers send the badge number as a JSON integer; request fields
//! accept either form and are held as strings.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Badge read from an access point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Badge (RFID) identifier of the administrator.
    #[serde(default, deserialize_with = "text_or_number")]
    pub admin_id: String,
    /// Name of the door or gate being opened.
    #[serde(default, deserialize_with = "text_or_number")]
    pub access_point: String,
}

impl AccessRequest {
    /// Create a request.
    pub fn new(admin_id: impl Into<String>, access_point: impl Into<String>) -> Self {
        Self {
            admin_id: admin_id.into(),
            access_point: access_point.into(),
        }
    }

    /// Whether both fields are present and non-blank.
    pub fn is_complete(&self) -> bool {
        !self.admin_id.trim().is_empty() && !self.access_point.trim().is_empty()
    }

    /// Same request with surrounding whitespace stripped from both fields.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self::new(self.admin_id.trim(), self.access_point.trim())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

/// String field that also accepts a JSON integer; `null` reads as empty.
fn text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<TextOrNumber>::deserialize(deserializer)? {
        Some(TextOrNumber::Text(text)) => text,
        Some(TextOrNumber::Signed(n)) => n.to_string(),
        Some(TextOrNumber::Unsigned(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Outcome of an access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessResult {
    /// The admin holds a permission for the access point.
    Success,
    /// Unknown admin, missing permission, or lookup failure.
    Fail,
}

impl AccessResult {
    /// Lowercase wire and storage name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for AccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply sent to the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Allow or deny.
    pub result: AccessResult,
}

/// Administrator row, read-only to this system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRecord {
    /// Primary key.
    pub id: i64,
    /// Badge identifier.
    pub admin_id: String,
    /// Comma-separated access point names as stored.
    pub access_points: String,
}

impl AdminRecord {
    /// Parse the stored list into a set of trimmed, non-empty names.
    pub fn permitted_points(&self) -> BTreeSet<&str> {
        self.access_points
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Whether this admin may open `access_point`.
    pub fn permits(&self, access_point: &str) -> bool {
        self.permitted_points().contains(access_point.trim())
    }
}

/// Append-only audit entry written for every access decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Badge identifier as requested.
    pub admin_id: String,
    /// Access point as requested.
    pub access_point: String,
    /// Decision taken.
    pub result: AccessResult,
    /// Decision time.
    pub timestamp: DateTime<Utc>,
}
