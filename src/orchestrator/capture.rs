use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pump::{forward_frames, PumpEnd};
use super::reaper::release_after_exit;
use crate::arbiter::{Holder, LeaseToken, MicArbiter};
use crate::audio::{AudioFormat, CaptureBackend, FrameSource};
use crate::config::{Config, SttConfig};
use crate::nats::{Publisher, Topic, TranscriptMessage};
use crate::recognition::{Event, RecognitionSession, Recognizer};

/// A request to record `secs` seconds and transcribe them
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub secs: u32,
    pub arrived_at: DateTime<Utc>,
}

impl CaptureRequest {
    pub fn new(secs: u32) -> Self {
        Self {
            secs,
            arrived_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptResult {
    pub text: String,
    pub secs: u32,
}

impl From<&TranscriptResult> for TranscriptMessage {
    fn from(result: &TranscriptResult) -> Self {
        Self {
            text: result.text.clone(),
            secs: result.secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    /// A non-empty transcript, published to `stt/text`
    Transcript(TranscriptResult),
    /// Finished without a transcript (handoff timeout, deadline, empty text)
    NoResult,
    /// Another capture was already running
    Dropped,
    Failed(String),
}

pub enum Submission {
    Accepted(JoinHandle<CaptureOutcome>),
    Dropped,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub format: AudioFormat,
    /// Added to the capture length to bound each frame read
    pub read_grace: Duration,
    pub handoff_timeout: Duration,
    pub stt: SttConfig,
}

impl CaptureSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            format: config.audio.format(),
            read_grace: config.capture.read_grace(),
            handoff_timeout: config.capture.handoff_timeout(),
            stt: config.stt.clone(),
        }
    }
}

/// Resources a capture cycle may be holding, released in one place
#[derive(Default)]
struct Held {
    lease: Option<LeaseToken>,
    source: Option<Box<dyn FrameSource>>,
    session: Option<RecognitionSession>,
}

/// Runs bounded speech captures, one at a time
pub struct CaptureOrchestrator {
    settings: CaptureSettings,
    arbiter: MicArbiter,
    backend: Arc<dyn CaptureBackend>,
    recognizer: Arc<dyn Recognizer>,
    publisher: Arc<dyn Publisher>,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CaptureOrchestrator {
    pub fn new(
        settings: CaptureSettings,
        arbiter: MicArbiter,
        backend: Arc<dyn CaptureBackend>,
        recognizer: Arc<dyn Recognizer>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            settings,
            arbiter,
            backend,
            recognizer,
            publisher,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start a capture unless one is already running.
    ///
    /// The busy flag is claimed here, before any await, so a second request
    /// submitted right behind this one is dropped. It is cleared only after
    /// the spawned cycle has finished its cleanup.
    pub fn submit(self: &Arc<Self>, request: CaptureRequest) -> Submission {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("STT: busy; ignoring request for {}s", request.secs);
            return Submission::Dropped;
        }

        let this = Arc::clone(self);
        Submission::Accepted(tokio::spawn(async move {
            let _busy = BusyGuard(&this.busy);
            this.run(request).await
        }))
    }

    /// One full capture cycle
    async fn run(&self, request: CaptureRequest) -> CaptureOutcome {
        let secs = request.secs;
        info!("STT: capture request for {}s", secs);

        let lease = match self
            .arbiter
            .acquire_timeout(Holder::Capture, self.settings.handoff_timeout)
            .await
        {
            Ok(lease) => lease,
            Err(busy) => {
                warn!(
                    "STT: mic not handed over within {:?} ({}); no capture",
                    self.settings.handoff_timeout, busy
                );
                return CaptureOutcome::NoResult;
            }
        };

        let mut held = Held {
            lease: Some(lease),
            ..Held::default()
        };
        let result = self.capture_and_transcribe(secs, &mut held).await;
        self.cleanup(&mut held).await;

        match result {
            Ok(Some(text)) => {
                let result = TranscriptResult { text, secs };
                self.publish(&result).await;
                CaptureOutcome::Transcript(result)
            }
            Ok(None) => CaptureOutcome::NoResult,
            Err(e) => {
                warn!("STT: capture failed: {:#}", e);
                CaptureOutcome::Failed(format!("{:#}", e))
            }
        }
    }

    async fn capture_and_transcribe(&self, secs: u32, held: &mut Held) -> Result<Option<String>> {
        let length = Duration::from_secs(u64::from(secs));

        let source = self
            .backend
            .spawn(Some(length))
            .await
            .context("Failed to start capture process")?;
        let source = held.source.insert(source);

        let session = self.recognizer.connect().await.with_context(|| {
            format!("Failed to connect to STT at {}", self.recognizer.endpoint())
        })?;
        let session = held.session.insert(session);
        session.start_stream(self.settings.format).await?;

        let read_timeout = length + self.settings.read_grace;
        let (frames, end) = forward_frames(
            source.as_mut(),
            session.writer(),
            Some(read_timeout),
            &CancellationToken::new(),
        )
        .await;

        match end {
            PumpEnd::ReadTimeout => warn!("STT: read timeout from capture; stopping early"),
            PumpEnd::Failed(e) => warn!("STT: capture stream failed: {:#}", e),
            PumpEnd::SourceFinished | PumpEnd::Cancelled => {}
        }
        debug!("STT: sent {} frames", frames);

        session.stop_stream().await?;

        // The device is not needed while the recognizer works
        release_mic(&mut held.source, &mut held.lease).await;

        let wait = self.settings.stt.transcript_wait(secs);
        let deadline = Instant::now() + wait;

        loop {
            match tokio::time::timeout_at(deadline, session.next_event()).await {
                Err(_) => {
                    info!("STT: no transcript within {:?}", wait);
                    return Ok(None);
                }
                Ok(Ok(None)) => {
                    info!("STT: recognizer closed without a transcript");
                    return Ok(None);
                }
                Ok(Ok(Some(Event::Transcript(text)))) => {
                    let text = text.trim().to_string();
                    info!("STT: got transcript -> {:?}", text);
                    return Ok(if text.is_empty() { None } else { Some(text) });
                }
                Ok(Ok(Some(other))) => debug!("STT: ignoring {} event", other.kind()),
                Ok(Err(e)) => return Err(e).context("Failed to read STT events"),
            }
        }
    }

    /// Terminate the process, then release the lease, then close the session.
    /// Every step is a no-op if already done.
    async fn cleanup(&self, held: &mut Held) {
        release_mic(&mut held.source, &mut held.lease).await;

        if let Some(mut session) = held.session.take() {
            if let Err(e) = session.close().await {
                debug!("STT: closing session failed: {}", e);
            }
        }
    }

    async fn publish(&self, result: &TranscriptResult) {
        let payload = match serde_json::to_vec(&TranscriptMessage::from(result)) {
            Ok(payload) => payload,
            Err(e) => {
                error!("STT: could not encode transcript: {}", e);
                return;
            }
        };

        match self.publisher.publish(Topic::SttText, payload).await {
            Ok(()) => info!("STT: published transcript ({}s)", result.secs),
            Err(e) => warn!("STT: failed to publish transcript: {:#}", e),
        }
    }
}

/// Stop the capture process and hand the mic back once it has exited.
///
/// A process that survives termination keeps the lease; a reaper releases
/// it when the exit is finally observed.
async fn release_mic(source: &mut Option<Box<dyn FrameSource>>, lease: &mut Option<LeaseToken>) {
    if let Some(mut process) = source.take() {
        if let Err(e) = process.terminate().await {
            error!("STT: capture process {} did not exit: {:#}", process.name(), e);
            if let Some(lease) = lease.take() {
                release_after_exit(process, lease);
            }
            return;
        }
    }

    if let Some(lease) = lease.take() {
        lease.release();
    }
}
