//! Line-framed event codec
//!
//! Every event is a JSON header line followed by optional data and payload
//! sections whose sizes the header announces:
//!
//! ```text
//! {"type":"audio-chunk","version":"1.5.2","data_length":42,"payload_length":3200}\n
//! <42 bytes of JSON data><3200 bytes of PCM>
//! ```
//!
//! Inline `data` in the header is accepted and merged under `data_length` bytes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::event::Event;
use super::SessionError;

pub const PROTOCOL_VERSION: &str = "1.5.2";

/// Upper bound for any single section, guards against corrupt headers
pub const MAX_SECTION_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

/// Encode an event into its wire bytes
pub fn encode_event(event: &Event) -> Result<Vec<u8>, SessionError> {
    let (kind, data, payload) = event.to_parts()?;

    let data_bytes = if data.is_empty() {
        Vec::new()
    } else {
        serde_json::to_vec(&data)?
    };

    let header = Header {
        kind,
        version: Some(PROTOCOL_VERSION.to_string()),
        data: None,
        data_length: (!data_bytes.is_empty()).then_some(data_bytes.len()),
        payload_length: payload.filter(|p| !p.is_empty()).map(<[u8]>::len),
    };

    let mut buf = serde_json::to_vec(&header)?;
    buf.push(b'\n');
    buf.extend_from_slice(&data_bytes);
    if let Some(payload) = payload {
        buf.extend_from_slice(payload);
    }

    Ok(buf)
}

/// Write one event and flush
pub async fn write_event<W>(writer: &mut W, event: &Event) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin + Send,
{
    let bytes = encode_event(event)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one event; `Ok(None)` on a clean end of stream
pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>, SessionError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        // Bounded while reading, so a peer that never sends a newline cannot grow the buffer
        let n = (&mut *reader)
            .take(MAX_SECTION_BYTES as u64 + 1)
            .read_until(b'\n', &mut line)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if line.len() > MAX_SECTION_BYTES {
            return Err(SessionError::Protocol("header line too long".to_string()));
        }
        if !line.trim_ascii().is_empty() {
            break;
        }
    }

    let header: Header = serde_json::from_slice(line.trim_ascii())?;

    let mut data = header.data.unwrap_or_default();
    if let Some(len) = header.data_length.filter(|&len| len > 0) {
        let bytes = read_section(reader, len, "data").await?;
        let extra: Map<String, Value> = serde_json::from_slice(&bytes)?;
        data.extend(extra);
    }

    let payload = match header.payload_length.filter(|&len| len > 0) {
        Some(len) => read_section(reader, len, "payload").await?,
        None => Vec::new(),
    };

    Event::from_parts(&header.kind, data, payload).map(Some)
}

async fn read_section<R>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>, SessionError>
where
    R: AsyncBufRead + Unpin + Send,
{
    if len > MAX_SECTION_BYTES {
        return Err(SessionError::Protocol(format!(
            "{} section of {} bytes exceeds limit",
            what, len
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SessionError::Protocol(format!("stream ended inside {} section", what))
        } else {
            SessionError::Io(e)
        }
    })?;
    Ok(buf)
}
