use tracing::debug;

use super::event::Event;
use super::{EventReader, EventWriter, SessionError};
use crate::audio::{AudioFormat, AudioFrame};

/// Raw audio returned by a synthesis request
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub format: AudioFormat,
    pub pcm: Vec<u8>,
}

/// One connection to a recognizer.
///
/// Supports the two shapes this system uses:
/// - streaming: `start_stream`, `send_frame`×N, `stop_stream`, then events
/// - request/response: `synthesize`
pub struct RecognitionSession {
    writer: SessionWriter,
    reader: SessionReader,
}

impl RecognitionSession {
    pub fn new(writer: Box<dyn EventWriter>, reader: Box<dyn EventReader>) -> Self {
        Self {
            writer: SessionWriter::new(writer),
            reader: SessionReader::new(reader),
        }
    }

    pub async fn start_stream(&mut self, format: AudioFormat) -> Result<(), SessionError> {
        self.writer.start(format).await
    }

    pub async fn send_frame(&mut self, frame: &AudioFrame) -> Result<(), SessionError> {
        self.writer.send_frame(frame).await
    }

    pub async fn stop_stream(&mut self) -> Result<(), SessionError> {
        self.writer.stop().await
    }

    pub async fn next_event(&mut self) -> Result<Option<Event>, SessionError> {
        self.reader.next_event().await
    }

    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.writer.close().await
    }

    pub fn writer(&mut self) -> &mut SessionWriter {
        &mut self.writer
    }

    /// Separate the halves so frames can be pumped while events are read
    pub fn split(self) -> (SessionWriter, SessionReader) {
        (self.writer, self.reader)
    }

    /// Request synthesis of `text` and collect the returned audio.
    ///
    /// Reads until `audio-stop` or end of stream. Returns `None` when the
    /// service sent no format or no audio.
    pub async fn synthesize(mut self, text: &str) -> Result<Option<SynthesizedAudio>, SessionError> {
        self.writer
            .inner
            .write_event(&Event::Synthesize(text.to_string()))
            .await?;

        let mut format = None;
        let mut pcm = Vec::new();

        while let Some(event) = self.reader.next_event().await? {
            match event {
                Event::AudioStart(f) => format = Some(f),
                Event::AudioChunk { format: f, audio } => {
                    format.get_or_insert(f);
                    pcm.extend_from_slice(&audio);
                }
                Event::AudioStop => break,
                other => debug!("Ignoring {} during synthesis", other.kind()),
            }
        }

        self.writer.close().await?;

        match format {
            Some(format) if !pcm.is_empty() => Ok(Some(SynthesizedAudio { format, pcm })),
            _ => Ok(None),
        }
    }
}

/// Sending half: frames go out in the order they are sent
pub struct SessionWriter {
    inner: Box<dyn EventWriter>,
    streaming: Option<AudioFormat>,
    frames_sent: u64,
    closed: bool,
}

impl SessionWriter {
    fn new(inner: Box<dyn EventWriter>) -> Self {
        Self {
            inner,
            streaming: None,
            frames_sent: 0,
            closed: false,
        }
    }

    /// Send the start-of-stream marker
    pub async fn start(&mut self, format: AudioFormat) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.inner.write_event(&Event::AudioStart(format)).await?;
        self.streaming = Some(format);
        Ok(())
    }

    pub async fn send_frame(&mut self, frame: &AudioFrame) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if self.streaming.is_none() {
            return Err(SessionError::Protocol("audio stream not started".to_string()));
        }

        let event = Event::AudioChunk {
            format: frame.format(),
            audio: frame.bytes().to_vec(),
        };
        self.inner.write_event(&event).await?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Send the end-of-stream marker. No-op if no stream is open.
    pub async fn stop(&mut self) -> Result<(), SessionError> {
        if self.closed || self.streaming.take().is_none() {
            return Ok(());
        }
        self.inner.write_event(&Event::AudioStop).await
    }

    /// Close the sending direction. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.streaming = None;
        self.inner.close().await
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

/// Receiving half
pub struct SessionReader {
    inner: Box<dyn EventReader>,
    ended: bool,
}

impl SessionReader {
    fn new(inner: Box<dyn EventReader>) -> Self {
        Self {
            inner,
            ended: false,
        }
    }

    /// Next event; stays `None` once the peer has closed the stream
    pub async fn next_event(&mut self) -> Result<Option<Event>, SessionError> {
        if self.ended {
            return Ok(None);
        }
        let event = self.inner.read_event().await?;
        if event.is_none() {
            self.ended = true;
        }
        Ok(event)
    }
}
