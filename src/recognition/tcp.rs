use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use super::codec;
use super::event::Event;
use super::session::RecognitionSession;
use super::{EventReader, EventWriter, Recognizer, SessionError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Recognizer reachable at `tcp://host:port` (or bare `host:port`)
pub struct TcpRecognizer {
    endpoint: String,
    address: String,
}

impl TcpRecognizer {
    pub fn new(endpoint: &str) -> Result<Self, SessionError> {
        let address = parse_endpoint(endpoint)?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            address,
        })
    }
}

/// Strip the scheme and validate `host:port`
pub fn parse_endpoint(endpoint: &str) -> Result<String, SessionError> {
    let address = match endpoint.split_once("://") {
        Some(("tcp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(SessionError::Connect(format!(
                "unsupported scheme '{}' in {}",
                scheme, endpoint
            )))
        }
        None => endpoint,
    };
    let address = address.trim_end_matches('/');

    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(address.to_string())
        }
        _ => Err(SessionError::Connect(format!(
            "expected host:port in endpoint {}",
            endpoint
        ))),
    }
}

#[async_trait::async_trait]
impl Recognizer for TcpRecognizer {
    async fn connect(&self) -> Result<RecognitionSession, SessionError> {
        debug!("Connecting to recognizer at {}", self.endpoint);

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| SessionError::Connect(format!("timed out connecting to {}", self.endpoint)))?
            .map_err(|e| SessionError::Connect(format!("{}: {}", self.endpoint, e)))?;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        Ok(RecognitionSession::new(
            Box::new(TcpEventWriter {
                inner: BufWriter::new(write),
                shut: false,
            }),
            Box::new(TcpEventReader {
                inner: BufReader::new(read),
            }),
        ))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct TcpEventWriter {
    inner: BufWriter<OwnedWriteHalf>,
    shut: bool,
}

#[async_trait::async_trait]
impl EventWriter for TcpEventWriter {
    async fn write_event(&mut self, event: &Event) -> Result<(), SessionError> {
        if self.shut {
            return Err(SessionError::Closed);
        }
        codec::write_event(&mut self.inner, event).await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.shut {
            return Ok(());
        }
        self.shut = true;
        self.inner.shutdown().await?;
        Ok(())
    }
}

struct TcpEventReader {
    inner: BufReader<OwnedReadHalf>,
}

#[async_trait::async_trait]
impl EventReader for TcpEventReader {
    async fn read_event(&mut self) -> Result<Option<Event>, SessionError> {
        codec::read_event(&mut self.inner).await
    }
}
