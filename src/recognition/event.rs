//! Typed recognition-protocol events
//!
//! Each tag carries only the fields the protocol guarantees for it. Optional
//! fields resolve to defaults at decode time so callers never inspect raw maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SessionError;
use crate::audio::AudioFormat;

/// Wake word detection reported by the recognizer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Start of an audio stream (either direction)
    AudioStart(AudioFormat),
    AudioChunk { format: AudioFormat, audio: Vec<u8> },
    AudioStop,
    /// `wake` or `detection`
    Detection(Detection),
    /// `transcript` or `text`
    Transcript(String),
    /// Request for speech synthesis
    Synthesize(String),
    /// Any tag this client does not act on
    Unknown(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FormatData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channels: Option<u16>,
}

impl FormatData {
    fn resolve(self) -> AudioFormat {
        let default = AudioFormat::default();
        AudioFormat::new(
            self.rate.unwrap_or(default.rate),
            self.width.unwrap_or(default.width),
            self.channels.unwrap_or(default.channels),
        )
    }
}

impl From<AudioFormat> for FormatData {
    fn from(format: AudioFormat) -> Self {
        Self {
            rate: Some(format.rate),
            width: Some(format.width),
            channels: Some(format.channels),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TextData {
    #[serde(default)]
    text: String,
}

impl Event {
    /// Wire tag
    pub fn kind(&self) -> &str {
        match self {
            Event::AudioStart(_) => "audio-start",
            Event::AudioChunk { .. } => "audio-chunk",
            Event::AudioStop => "audio-stop",
            Event::Detection(_) => "detection",
            Event::Transcript(_) => "transcript",
            Event::Synthesize(_) => "synthesize",
            Event::Unknown(kind) => kind,
        }
    }

    /// Any event carrying recognized text
    pub fn is_transcript(&self) -> bool {
        matches!(self, Event::Transcript(_))
    }

    /// Split into (tag, data, payload) for the wire
    pub fn to_parts(&self) -> Result<(String, Map<String, Value>, Option<&[u8]>), SessionError> {
        let (data, payload) = match self {
            Event::AudioStart(format) => (to_map(FormatData::from(*format))?, None),
            Event::AudioChunk { format, audio } => {
                (to_map(FormatData::from(*format))?, Some(audio.as_slice()))
            }
            Event::AudioStop | Event::Unknown(_) => (Map::new(), None),
            Event::Detection(detection) => (to_map(detection)?, None),
            Event::Transcript(text) | Event::Synthesize(text) => {
                (to_map(TextData { text: text.clone() })?, None)
            }
        };
        Ok((self.kind().to_string(), data, payload))
    }

    /// Build a typed event from its wire parts
    pub fn from_parts(
        kind: &str,
        data: Map<String, Value>,
        payload: Vec<u8>,
    ) -> Result<Self, SessionError> {
        let data = Value::Object(data);
        let event = match kind {
            "audio-start" => Event::AudioStart(from_value::<FormatData>(data)?.resolve()),
            "audio-chunk" => Event::AudioChunk {
                format: from_value::<FormatData>(data)?.resolve(),
                audio: payload,
            },
            "audio-stop" => Event::AudioStop,
            "wake" | "detection" => Event::Detection(from_value(data)?),
            "transcript" | "text" => Event::Transcript(from_value::<TextData>(data)?.text),
            "synthesize" => Event::Synthesize(from_value::<TextData>(data)?.text),
            other => Event::Unknown(other.to_string()),
        };
        Ok(event)
    }
}

fn to_map<T: Serialize>(value: T) -> Result<Map<String, Value>, SessionError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(SessionError::Protocol(format!(
            "event data must be an object, got {}",
            other
        ))),
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, SessionError> {
    Ok(serde_json::from_value(value)?)
}
