use crate::domain::result::{DomainError, DomainResult};
use crate::domain::sensor_reading::CreateSensorReadingRepoInput;
use serde_json::{Map, Value};
use tracing::warn;

/// Device id recorded when a payload carries none
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

/// A decoded telemetry message with its typed fields extracted.
///
/// Every field is optional on the wire; the full object is kept verbatim in
/// `raw_payload`.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryDocument {
    pub device_id: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub raw_payload: Value,
}

impl TelemetryDocument {
    /// Decode a broker payload. The payload must be UTF-8 JSON with an object at the top level.
    pub fn decode(payload: &[u8]) -> DomainResult<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| DomainError::DecodeError(format!("payload is not UTF-8: {}", e)))?;

        let value: Value = serde_json::from_str(text)
            .map_err(|e| DomainError::DecodeError(format!("payload is not JSON: {}", e)))?;

        match value {
            Value::Object(map) => Ok(Self::from_object(map)),
            other => Err(DomainError::DecodeError(format!(
                "payload must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn from_object(map: Map<String, Value>) -> Self {
        let device_id = extract_device_id(map.get("device_id"));
        let temperature = extract_measurement(&map, "temperature");
        let humidity = extract_measurement(&map, "humidity");

        Self {
            device_id,
            temperature,
            humidity,
            raw_payload: Value::Object(map),
        }
    }

    pub fn into_create_input(self) -> CreateSensorReadingRepoInput {
        CreateSensorReadingRepoInput {
            device_id: self.device_id,
            temperature: self.temperature,
            humidity: self.humidity,
            raw_payload: self.raw_payload,
        }
    }
}

fn extract_device_id(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => UNKNOWN_DEVICE_ID.to_string(),
    }
}

fn extract_measurement(map: &Map<String, Value>, field: &str) -> Option<f64> {
    match map.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_f64(),
        Some(other) => {
            warn!(
                field = field,
                kind = json_kind(other),
                "ignoring non-numeric measurement"
            );
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
