use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recognition::Detection;

/// Wake word detection published on `wake/detected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeMessage {
    pub name: Option<String>,
    pub probability: Option<f64>,
    pub timestamp: Option<i64>,
}

impl From<&Detection> for WakeMessage {
    fn from(detection: &Detection) -> Self {
        Self {
            name: detection.name.clone(),
            probability: detection.probability,
            timestamp: detection.timestamp,
        }
    }
}

/// Transcript published on `stt/text`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub text: String,
    /// Capture length that produced this transcript
    pub secs: u32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed capture request: {0:?}")]
pub struct MalformedPayload(pub String);

/// Parse a `stt/capture` payload into seconds.
///
/// Empty means `default_secs`. Decimal text is truncated. Values above
/// `max_secs` are clamped; zero, negative and non-numeric payloads are rejected.
pub fn parse_capture_secs(
    payload: &[u8],
    default_secs: u32,
    max_secs: u32,
) -> Result<u32, MalformedPayload> {
    let raw = String::from_utf8_lossy(payload);
    let raw = raw.trim();

    if raw.is_empty() {
        return Ok(default_secs);
    }

    let secs = raw
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(f64::trunc)
        .filter(|&v| v >= 1.0)
        .ok_or_else(|| MalformedPayload(raw.to_string()))?;

    Ok(secs.min(f64::from(max_secs)) as u32)
}

/// Plain-text `tts/say` payload
pub fn parse_say(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).trim().to_string()
}

/// Text from a `stt/text` payload: `{"text": ...}` JSON or plain text
pub fn transcript_text(payload: &[u8]) -> String {
    let raw = String::from_utf8_lossy(payload);
    let raw = raw.trim();

    if raw.starts_with('{') {
        return serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|v| v.get("text").and_then(|t| t.as_str()).map(str::to_string))
            .unwrap_or_default()
            .trim()
            .to_string();
    }

    raw.to_string()
}
