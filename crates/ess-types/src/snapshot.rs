//! Thermal status snapshot shared between the capture daemon and the gate.
//!
//! The snapshot file holds a single JSON object that the capture daemon
//! replaces on every tick. A snapshot carries either a hotspot reading or an
//! error string, never both. [`CaptureOutcome`] is flattened into the object
//! so the file keeps its flat shape:
//!
//! ```text
//! {"timestamp": "...", "roi": {...}, "min_c": 24.1, "max_c": 41.7, "max_pos": {...}, "max_pos_roi": {...}}
//! {"timestamp": "...", "roi": {...}, "error": "frame_fail: ..."}
//! ```
//!
//! Readers tolerate missing optional fields and ignore unknown keys. Older
//! writers used other names for the maximum temperature; those are mapped
//! onto `max_c` by [`Snapshot::from_json_slice`] and nowhere else.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Key names older status writers used for the maximum temperature.
pub const LEGACY_MAX_KEYS: [&str; 4] = ["max", "tmax", "max_temp", "maxC"];

/// Canonical key for the maximum temperature.
const MAX_KEY: &str = "max_c";

/// Integer pixel coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPos {
    /// Column.
    pub x: u32,
    /// Row.
    pub y: u32,
}

impl PixelPos {
    /// Create a pixel coordinate.
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Rectangular region of interest in full-frame coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Roi {
    /// Left edge (inclusive).
    pub x0: u32,
    /// Top edge (inclusive).
    pub y0: u32,
    /// Width in pixels.
    pub w: u32,
    /// Height in pixels.
    pub h: u32,
}

impl Roi {
    /// Create a rectangle from origin and size.
    pub const fn new(x0: u32, y0: u32, w: u32, h: u32) -> Self {
        Self { x0, y0, w, h }
    }

    /// Whether the rectangle covers no pixels.
    pub const fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    /// Translate an absolute coordinate into ROI-relative coordinates.
    pub const fn relative(&self, abs: PixelPos) -> PixelPos {
        PixelPos::new(abs.x.saturating_sub(self.x0), abs.y.saturating_sub(self.y0))
    }
}

/// Hotspot statistics over the ROI.
///
/// Only `max_c` is required on read. The capture daemon always writes every
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    /// Minimum temperature inside the ROI (degrees Celsius).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_c: Option<f64>,
    /// Maximum temperature inside the ROI (degrees Celsius).
    pub max_c: f64,
    /// First pixel (row-major) holding `max_c`, full-frame coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pos: Option<PixelPos>,
    /// Same pixel relative to the ROI origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pos_roi: Option<PixelPos>,
}

/// Result of one capture tick: a reading or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CaptureOutcome {
    /// The tick produced no reading. Temperature fields are absent.
    Failed {
        /// Human-readable failure description, prefixed with its kind
        /// (`init_fail`, `frame_fail`, `empty_roi`).
        error: String,
    },
    /// The tick produced a hotspot reading.
    Hotspot(Hotspot),
}

/// The latest sensor-derived status record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Capture time with the local UTC offset.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// I2C bus the sensor sits on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i2c_bus: Option<u32>,
    /// ROI actually scanned, after clamping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<Roi>,
    /// Reading or error.
    #[serde(flatten)]
    pub outcome: CaptureOutcome,
}

impl Snapshot {
    /// Build a snapshot carrying a hotspot reading.
    pub const fn reading(timestamp: DateTime<FixedOffset>, roi: Roi, hotspot: Hotspot) -> Self {
        Self {
            timestamp: Some(timestamp),
            i2c_bus: None,
            roi: Some(roi),
            outcome: CaptureOutcome::Hotspot(hotspot),
        }
    }

    /// Build a snapshot carrying an error and no temperatures.
    pub fn failed(timestamp: DateTime<FixedOffset>, roi: Roi, error: impl Into<String>) -> Self {
        Self {
            timestamp: Some(timestamp),
            i2c_bus: None,
            roi: Some(roi),
            outcome: CaptureOutcome::Failed {
                error: error.into(),
            },
        }
    }

    /// Attach the sensor bus number.
    #[must_use]
    pub const fn with_i2c_bus(mut self, bus: u32) -> Self {
        self.i2c_bus = Some(bus);
        self
    }

    /// Maximum ROI temperature, or `None` for an error snapshot.
    pub const fn max_c(&self) -> Option<f64> {
        match &self.outcome {
            CaptureOutcome::Hotspot(h) => Some(h.max_c),
            CaptureOutcome::Failed { .. } => None,
        }
    }

    /// Hotspot reading, if any.
    pub const fn hotspot(&self) -> Option<&Hotspot> {
        match &self.outcome {
            CaptureOutcome::Hotspot(h) => Some(h),
            CaptureOutcome::Failed { .. } => None,
        }
    }

    /// Error description, if this is an error snapshot.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            CaptureOutcome::Failed { error } => Some(error),
            CaptureOutcome::Hotspot(_) => None,
        }
    }

    /// Parse a snapshot file, mapping legacy maximum-temperature keys onto
    /// `max_c` first.
    ///
    /// A canonical `max_c` always wins over a legacy alias. Legacy keys
    /// with a `null` value are ignored.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`serde_json::Error`] if the bytes are not a
    /// JSON object or do not match the snapshot schema.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut map: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(bytes)?;
        normalize_legacy_keys(&mut map);
        serde_json::from_value(serde_json::Value::Object(map))
    }
}

/// Accept RFC 3339, the colon-less `%z` offset, and offset-less local
/// times older writers emitted.
///
/// An offset-less time is taken as UTC. A timestamp that is not a string or
/// matches none of these forms reads as absent; it never invalidates the
/// temperature fields next to it.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(serde_json::Value::as_str).and_then(parse_timestamp))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc().fixed_offset())
        })
}

/// Rename the first non-null legacy maximum key to `max_c` and drop the rest.
fn normalize_legacy_keys(map: &mut serde_json::Map<String, serde_json::Value>) {
    let has_canonical = map.get(MAX_KEY).is_some_and(|v| !v.is_null());
    if !has_canonical {
        map.remove(MAX_KEY);
    }
    for key in LEGACY_MAX_KEYS {
        if let Some(value) = map.remove(key) {
            if !value.is_null() && !map.contains_key(MAX_KEY) {
                map.insert(MAX_KEY.to_owned(), value);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn ts() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-03-02T10:15:00+09:00").unwrap()
    }

    #[test]
    fn reading_snapshot_serializes_flat() {
        let snap = Snapshot::reading(
            ts(),
            Roi::new(12, 2, 7, 20),
            Hotspot {
                min_c: Some(22.5),
                max_c: 41.0,
                max_pos: Some(PixelPos::new(14, 9)),
                max_pos_roi: Some(PixelPos::new(2, 7)),
            },
        )
        .with_i2c_bus(9);
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["max_c"], 41.0);
        assert_eq!(value["min_c"], 22.5);
        assert_eq!(value["max_pos"]["x"], 14);
        assert_eq!(value["roi"]["w"], 7);
        assert_eq!(value["i2c_bus"], 9);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn error_snapshot_has_no_temperatures() {
        let snap = Snapshot::failed(ts(), Roi::new(0, 0, 1, 1), "init_fail: no device");
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["error"], "init_fail: no device");
        assert!(value.get("max_c").is_none());
        assert_eq!(snap.max_c(), None);
    }

    #[test]
    fn error_wins_when_both_present() {
        let raw = br#"{"timestamp":"2026-03-02T10:15:00+09:00","error":"frame_fail: x","max_c":60}"#;
        let snap = Snapshot::from_json_slice(raw).unwrap();
        assert_eq!(snap.max_c(), None);
        assert_eq!(snap.error(), Some("frame_fail: x"));
    }

    #[test]
    fn minimal_snapshot_is_accepted() {
        let snap = Snapshot::from_json_slice(br#"{"max_c": 52}"#).unwrap();
        assert_eq!(snap.max_c(), Some(52.0));
        assert!(snap.timestamp.is_none());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let raw = br#"{"max_c": 30.5, "firmware": "1.2", "extra": {"a": 1}}"#;
        let snap = Snapshot::from_json_slice(raw).unwrap();
        assert_eq!(snap.max_c(), Some(30.5));
    }

    #[test]
    fn legacy_keys_map_onto_max_c() {
        for key in LEGACY_MAX_KEYS {
            let raw = format!(r#"{{"{key}": 47.25}}"#);
            let snap = Snapshot::from_json_slice(raw.as_bytes()).unwrap();
            assert_eq!(snap.max_c(), Some(47.25), "alias {key}");
        }
    }

    #[test]
    fn canonical_key_wins_over_legacy() {
        let snap = Snapshot::from_json_slice(br#"{"max": 10, "max_c": 20}"#).unwrap();
        assert_eq!(snap.max_c(), Some(20.0));
    }

    #[test]
    fn null_max_falls_back_to_legacy() {
        let snap = Snapshot::from_json_slice(br#"{"max_c": null, "tmax": 33}"#).unwrap();
        assert_eq!(snap.max_c(), Some(33.0));
    }

    #[test]
    fn no_temperature_and_no_error_is_rejected() {
        assert!(Snapshot::from_json_slice(br#"{"roi": {"x0":0,"y0":0,"w":1,"h":1}}"#).is_err());
        assert!(Snapshot::from_json_slice(b"[1,2]").is_err());
    }

    #[test]
    fn colon_less_offset_is_accepted() {
        let snap = Snapshot::from_json_slice(br#"{"timestamp":"2026-03-02T10:15:00+0900","max_c":30}"#)
            .unwrap();
        assert_eq!(snap.timestamp, Some(ts()));
    }

    #[test]
    fn offset_less_timestamp_reads_as_utc() {
        let snap = Snapshot::from_json_slice(br#"{"timestamp":"2026-03-02T10:15:00","max_c":52.0}"#)
            .unwrap();
        assert_eq!(snap.max_c(), Some(52.0));
        let expected = DateTime::parse_from_rfc3339("2026-03-02T10:15:00+00:00").unwrap();
        assert_eq!(snap.timestamp, Some(expected));

        let snap =
            Snapshot::from_json_slice(br#"{"timestamp":"2026-03-02T10:15:00.250","max_c":40}"#)
                .unwrap();
        assert!(snap.timestamp.is_some());
    }

    #[test]
    fn unreadable_timestamp_keeps_the_reading() {
        for raw in [
            r#"{"timestamp":"yesterday","max_c":52.0}"#,
            r#"{"timestamp":1772414100,"max_c":52.0}"#,
            r#"{"timestamp":null,"max_c":52.0}"#,
        ] {
            let snap = Snapshot::from_json_slice(raw.as_bytes()).unwrap();
            assert!(snap.timestamp.is_none(), "{raw}");
            assert_eq!(snap.max_c(), Some(52.0), "{raw}");
        }
    }

    #[test]
    fn roi_relative_position() {
        let roi = Roi::new(12, 2, 7, 20);
        assert_eq!(roi.relative(PixelPos::new(14, 9)), PixelPos::new(2, 7));
        assert!(Roi::new(3, 3, 0, 5).is_empty());
    }
}
