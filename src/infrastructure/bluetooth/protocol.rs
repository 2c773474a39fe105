//! Wearable telemetry protocol
//!
//! Endpoint identifiers and the decoder for notification frames sent by the
//! wearable.

use crate::domain::models::TelemetryRecord;
use crate::error::DecodeError;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::trace;

/// Default telemetry service UUID (Nordic UART Service)
pub const SERVICE_UUID: &str = "6e400001-b5a3-f393-e0a9-e50e24dcca9e";

/// Default telemetry characteristic UUID (Nordic UART TX, notify)
pub const TELEMETRY_CHAR_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// Wire shape of one telemetry frame
///
/// ```text
/// {"Time":"08:00","HeartRate":72,"Steps":100,"Status":"ok"}
/// ```
///
/// Keys are case-sensitive. Missing keys take defaults, unknown keys are
/// ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TelemetryPayload {
    #[serde(rename = "Time")]
    time: Option<String>,
    #[serde(rename = "HeartRate")]
    heart_rate: i32,
    #[serde(rename = "Steps")]
    steps: i32,
    #[serde(rename = "Status")]
    status: Option<String>,
}

impl From<TelemetryPayload> for TelemetryRecord {
    fn from(payload: TelemetryPayload) -> Self {
        Self {
            time: payload.time,
            heart_rate: payload.heart_rate,
            steps: payload.steps,
            status: payload.status,
        }
    }
}

/// Decode a single notification frame into a telemetry record.
///
/// Each frame is a complete message; nothing is buffered across calls.
pub fn decode(bytes: &[u8]) -> Result<TelemetryRecord, DecodeError> {
    let text = std::str::from_utf8(bytes)?;
    trace!("Telemetry frame: {}", text);

    // Keyed objects only. A positional array must not fill the fields.
    let fields: Map<String, Value> = serde_json::from_str(text)?;
    let payload: TelemetryPayload = serde_json::from_value(Value::Object(fields))?;
    Ok(payload.into())
}
