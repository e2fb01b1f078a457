//! Telemetry message published once per report cycle.
//!
//! Wire format (field order is not significant):
//!
//! ```json
//! {
//!   "deviceId": "240ac41a2b3c",
//!   "sequence": 7,
//!   "payload": {
//!     "temperature": { "value": 21.5, "unit": "C" },
//!     "humidity": { "value": 47.2, "unit": "%" },
//!     "rssi": { "value": -63, "unit": "dBm" }
//!   }
//! }
//! ```

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use embassy_time::Instant;
use serde::{Deserialize, Serialize};

use crate::peripherals::Measurement;

/// A sample plus the link quality at the time it was taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature: f32,
    pub humidity: f32,
    pub rssi: Option<i8>,
    pub sampled_at: Instant,
}

impl Reading {
    pub fn new(measurement: Measurement, rssi: Option<i8>, sampled_at: Instant) -> Self {
        Self {
            temperature: measurement.temperature,
            humidity: measurement.humidity,
            rssi,
            sampled_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "dBm")]
    Dbm,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity<T> {
    pub value: T,
    pub unit: Unit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub temperature: Quantity<f32>,
    pub humidity: Quantity<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<Quantity<i8>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub device_id: String,
    pub sequence: u32,
    pub payload: Payload,
}

impl TelemetryMessage {
    pub fn new(device_id: &str, sequence: u32, reading: &Reading) -> Self {
        Self {
            device_id: device_id.to_string(),
            sequence,
            payload: Payload {
                temperature: Quantity {
                    value: reading.temperature,
                    unit: Unit::Celsius,
                },
                humidity: Quantity {
                    value: reading.humidity,
                    unit: Unit::Percent,
                },
                rssi: reading.rssi.map(|value| Quantity {
                    value,
                    unit: Unit::Dbm,
                }),
            },
        }
    }
}

#[derive(Debug)]
pub struct EncodeError(serde_json::Error);

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Telemetry encoding error: {}", self.0)
    }
}

impl From<serde_json::Error> for EncodeError {
    fn from(error: serde_json::Error) -> Self {
        Self(error)
    }
}

pub fn encode(message: &TelemetryMessage) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode(bytes: &[u8]) -> Result<TelemetryMessage, EncodeError> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn reading(temperature: f32, humidity: f32, rssi: Option<i8>) -> Reading {
        Reading {
            temperature,
            humidity,
            rssi,
            sampled_at: Instant::from_secs(1),
        }
    }

    fn assert_close(actual: &Value, expected: f64) {
        let actual = actual.as_f64().unwrap();
        assert!(
            (actual - expected).abs() < 1e-3,
            "{actual} is not within 1e-3 of {expected}"
        );
    }

    #[test]
    fn test_wire_layout() {
        let message = TelemetryMessage::new("device-1a2b3c", 7, &reading(21.5, 47.2, Some(-63)));
        let json: Value = serde_json::from_slice(&encode(&message).unwrap()).unwrap();

        assert_eq!(json["deviceId"], "device-1a2b3c");
        assert_eq!(json["sequence"], 7);
        assert_close(&json["payload"]["temperature"]["value"], 21.5);
        assert_eq!(json["payload"]["temperature"]["unit"], "C");
        assert_close(&json["payload"]["humidity"]["value"], 47.2);
        assert_eq!(json["payload"]["humidity"]["unit"], "%");
        assert_eq!(json["payload"]["rssi"]["value"], -63);
        assert_eq!(json["payload"]["rssi"]["unit"], "dBm");
    }

    #[test]
    fn test_rssi_omitted_when_unknown() {
        let message = TelemetryMessage::new("abc", 1, &reading(20.0, 50.0, None));
        let json: Value = serde_json::from_slice(&encode(&message).unwrap()).unwrap();

        assert!(json["payload"].get("rssi").is_none());
        assert_eq!(json["payload"]["temperature"]["unit"], "C");
    }

    #[test]
    fn test_decode_reproduces_fields() {
        let message = TelemetryMessage::new("240ac41a2b3c", 42, &reading(-4.3, 99.9, Some(-80)));
        let decoded = decode(&encode(&message).unwrap()).unwrap();

        assert_eq!(decoded.device_id, "240ac41a2b3c");
        assert_eq!(decoded.sequence, 42);
        assert!((decoded.payload.temperature.value - -4.3).abs() < 1e-3);
        assert!((decoded.payload.humidity.value - 99.9).abs() < 1e-3);
        assert_eq!(decoded.payload.rssi.map(|q| q.value), Some(-80));
    }

    #[test]
    fn test_decode_rejects_unknown_unit() {
        let bytes = br#"{"deviceId":"a","sequence":1,"payload":{"temperature":{"value":1.0,"unit":"F"},"humidity":{"value":2.0,"unit":"%"}}}"#;

        assert!(decode(bytes).is_err());
    }
}
