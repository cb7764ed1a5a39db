//! Environment readings from the cabinet sensor node.

use serde::{Deserialize, Serialize};

/// Wire shape published by the environment node: `{"t": 23.1, "h": 55.3}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentPayload {
    /// Temperature in degrees Celsius.
    #[serde(default)]
    pub t: Option<f64>,
    /// Relative humidity in percent.
    #[serde(default)]
    pub h: Option<f64>,
}

/// Canonical environment reading, named after the storage columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReading {
    /// Temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
}

impl From<EnvironmentPayload> for EnvironmentReading {
    fn from(payload: EnvironmentPayload) -> Self {
        Self {
            temperature: payload.t,
            humidity: payload.h,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn short_keys_map_to_columns() {
        let payload: EnvironmentPayload = serde_json::from_str(r#"{"t": 23.1, "h": 55.3}"#).unwrap();
        let reading = EnvironmentReading::from(payload);
        assert_eq!(reading.temperature, Some(23.1));
        assert_eq!(reading.humidity, Some(55.3));
    }

    #[test]
    fn missing_humidity_stays_null() {
        let payload: EnvironmentPayload = serde_json::from_str(r#"{"t": 19}"#).unwrap();
        let reading = EnvironmentReading::from(payload);
        assert_eq!(reading.temperature, Some(19.0));
        assert_eq!(reading.humidity, None);
    }
}
