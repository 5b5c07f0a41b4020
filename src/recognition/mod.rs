//! Recognition sessions
//!
//! A bidirectional client of the streaming recognition protocol used by the
//! wake-word detector, speech-to-text and speech synthesis services:
//! - `event`: typed protocol events
//! - `codec`: line-framed wire encoding
//! - `session`: streaming and request/response session shapes
//! - `tcp`: TCP transport
//!
//! Sessions never retry. Callers own cleanup of the session and any capture
//! process feeding it.

pub mod codec;
pub mod event;
pub mod session;
pub mod tcp;

use thiserror::Error;

pub use event::{Detection, Event};
pub use session::{RecognitionSession, SessionReader, SessionWriter, SynthesizedAudio};
pub use tcp::TcpRecognizer;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("malformed event data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session closed")]
    Closed,
}

/// Sending half of a session transport
#[async_trait::async_trait]
pub trait EventWriter: Send {
    async fn write_event(&mut self, event: &Event) -> Result<(), SessionError>;

    /// Shut down the sending direction. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Receiving half of a session transport
#[async_trait::async_trait]
pub trait EventReader: Send {
    /// Next event, `Ok(None)` once the peer closed the stream
    async fn read_event(&mut self) -> Result<Option<Event>, SessionError>;
}

/// Opens sessions against one recognizer endpoint
#[async_trait::async_trait]
pub trait Recognizer: Send + Sync {
    async fn connect(&self) -> Result<RecognitionSession, SessionError>;

    /// Endpoint for logging
    fn endpoint(&self) -> &str;
}
