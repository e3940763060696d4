use common::domain::SensorReading;
use serde_json::{Value, json};

/// Canonical document uploaded to the object store for a reading
pub fn submission_document(reading: &SensorReading) -> Value {
    json!({
        "device_id": reading.device_id,
        "timestamp": reading.recorded_at.to_rfc3339(),
        "temperature": reading.temperature,
        "humidity": reading.humidity,
        "raw": reading.raw_payload,
    })
}

/// Message anchored on the ledger, referencing the uploaded document
pub fn anchor_message(content_address: &str) -> String {
    format!("IPFS_CID:{}", content_address)
}
