//! Continuous wake-word listening
//!
//! The orchestrator owns the microphone while it listens. On an accepted
//! detection it tears its own stream down, hands the microphone to the
//! capture side through the bus, and comes back on a fresh process once the
//! capture is over:
//!
//! ```text
//! Resuming ──▶ Streaming ──wake──▶ Suspending ──▶ Suspended ──▶ Resuming
//!    ▲             │
//!    └──failure────┘  (after the restart delay)
//! ```

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::pump::{FramePump, PumpExit};
use super::reaper::release_after_exit;
use crate::arbiter::{Holder, LeaseToken, MicArbiter};
use crate::audio::{AudioFormat, CaptureBackend, WakeCue};
use crate::config::Config;
use crate::nats::{Publisher, Topic, WakeMessage};
use crate::recognition::{Detection, Event, Recognizer, SessionError, SessionReader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WakeState {
    Streaming,
    Suspending,
    Suspended,
    /// Waiting for the microphone and opening a fresh stream
    Resuming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WakeStatus {
    pub state: WakeState,
    /// Number of wake capture processes spawned so far
    pub generation: u64,
}

/// Drops detections that follow an accepted one too closely
#[derive(Debug, Clone)]
pub struct Cooldown {
    window: Duration,
    last: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Accept a detection at `now` unless it falls inside the window
    pub fn accept(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.window {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

#[derive(Debug, Clone)]
pub struct WakeSettings {
    pub format: AudioFormat,
    pub cooldown: Duration,
    pub capture_secs: u32,
    pub resume_margin: Duration,
    pub restart_delay: Duration,
}

impl WakeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            format: config.audio.format(),
            cooldown: config.wake.cooldown(),
            capture_secs: config.wake.capture_secs,
            resume_margin: config.wake.resume_margin(),
            restart_delay: config.wake.restart_delay(),
        }
    }
}

/// How one listening round ended
enum Round {
    /// Wake handled and capture window over; listen again right away
    Resume,
    Shutdown,
}

/// Why the streaming phase stopped
enum StreamEnd {
    Wake(Detection),
    Shutdown,
    PumpEnded(Result<PumpExit>),
    Disconnected,
    Failed(SessionError),
}

pub struct WakeOrchestrator {
    settings: WakeSettings,
    arbiter: MicArbiter,
    backend: Arc<dyn CaptureBackend>,
    recognizer: Arc<dyn Recognizer>,
    publisher: Arc<dyn Publisher>,
    cue: Option<WakeCue>,
    cooldown: Cooldown,
    status: watch::Sender<WakeStatus>,
}

impl WakeOrchestrator {
    pub fn new(
        settings: WakeSettings,
        arbiter: MicArbiter,
        backend: Arc<dyn CaptureBackend>,
        recognizer: Arc<dyn Recognizer>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let (status, _) = watch::channel(WakeStatus {
            state: WakeState::Resuming,
            generation: 0,
        });

        Self {
            cooldown: Cooldown::new(settings.cooldown),
            settings,
            arbiter,
            backend,
            recognizer,
            publisher,
            cue: None,
            status,
        }
    }

    pub fn with_cue(mut self, cue: WakeCue) -> Self {
        self.cue = Some(cue);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<WakeStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> WakeStatus {
        *self.status.borrow()
    }

    fn set_state(&self, state: WakeState) {
        self.status.send_modify(|s| s.state = state);
        debug!("[wake] state -> {:?}", state);
    }

    /// Supervised listening loop. Never fails; returns on shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("[wake] listening via {}", self.recognizer.endpoint());

        loop {
            match self.round(&shutdown).await {
                Ok(Round::Shutdown) => break,
                Ok(Round::Resume) => continue,
                Err(e) => warn!("[wake] stream failed: {:#}", e),
            }

            self.set_state(WakeState::Resuming);
            info!("[wake] restarting in {:?}", self.settings.restart_delay);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.restart_delay) => {}
            }
        }

        info!("[wake] stopped");
    }

    /// Resuming → Streaming → (Suspending → Suspended) once
    async fn round(&mut self, shutdown: &CancellationToken) -> Result<Round> {
        self.set_state(WakeState::Resuming);

        let lease = tokio::select! {
            _ = shutdown.cancelled() => return Ok(Round::Shutdown),
            lease = self.arbiter.acquire_wait(Holder::Wake) => lease,
        };

        let (mut pump, mut reader) = match self.open().await {
            Ok(stream) => stream,
            Err(e) => {
                lease.release();
                return Err(e);
            }
        };

        self.set_state(WakeState::Streaming);
        let end = self.listen(&mut pump, &mut reader, shutdown).await;

        match end {
            StreamEnd::Wake(detection) => {
                self.on_wake(&detection).await;

                self.set_state(WakeState::Suspending);
                let exit = pump.stop().await;
                self.teardown(exit, lease).await?;

                self.set_state(WakeState::Suspended);
                self.request_capture().await;

                let resume_after = Duration::from_secs(u64::from(self.settings.capture_secs))
                    + self.settings.resume_margin;
                tokio::select! {
                    _ = shutdown.cancelled() => Ok(Round::Shutdown),
                    _ = tokio::time::sleep(resume_after) => Ok(Round::Resume),
                }
            }
            StreamEnd::Shutdown => {
                let exit = pump.stop().await;
                self.teardown(exit, lease).await?;
                Ok(Round::Shutdown)
            }
            StreamEnd::PumpEnded(exit) => {
                let reason = match &exit {
                    Ok(exit) => format!("capture stream ended ({:?})", exit.end),
                    Err(e) => format!("{:#}", e),
                };
                self.teardown(exit, lease).await?;
                Err(anyhow!(reason))
            }
            StreamEnd::Disconnected => {
                let exit = pump.stop().await;
                self.teardown(exit, lease).await?;
                Err(anyhow!("wake recognizer closed the stream"))
            }
            StreamEnd::Failed(e) => {
                let exit = pump.stop().await;
                self.teardown(exit, lease).await?;
                Err(e).context("Wake session failed")
            }
        }
    }

    /// Connect, start the stream, and spawn a fresh capture process
    async fn open(&mut self) -> Result<(FramePump, SessionReader)> {
        let mut session = self.recognizer.connect().await.with_context(|| {
            format!("Failed to connect to wake recognizer at {}", self.recognizer.endpoint())
        })?;
        session.start_stream(self.settings.format).await?;

        let source = match self.backend.spawn(None).await {
            Ok(source) => source,
            Err(e) => {
                if let Err(close) = session.close().await {
                    debug!("[wake] closing session failed: {}", close);
                }
                return Err(e.context("Failed to start wake capture process"));
            }
        };

        self.status.send_modify(|s| s.generation += 1);
        info!(
            "[wake] streaming from {} (generation {})",
            source.name(),
            self.status().generation
        );

        let (writer, reader) = session.split();
        Ok((FramePump::start(source, writer, None), reader))
    }

    async fn listen(
        &mut self,
        pump: &mut FramePump,
        reader: &mut SessionReader,
        shutdown: &CancellationToken,
    ) -> StreamEnd {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return StreamEnd::Shutdown,
                exit = pump.finished() => return StreamEnd::PumpEnded(exit),
                event = reader.next_event() => match event {
                    Ok(Some(Event::Detection(detection))) => {
                        if self.cooldown.accept(Instant::now()) {
                            info!("[wake] detected {:?}", detection.name);
                            return StreamEnd::Wake(detection);
                        }
                        debug!("[wake] detection within cooldown; ignored");
                    }
                    Ok(Some(other)) => debug!("[wake] ignoring {} event", other.kind()),
                    Ok(None) => return StreamEnd::Disconnected,
                    Err(e) => return StreamEnd::Failed(e),
                },
            }
        }
    }

    /// Terminate the process and close the stream, then give up the mic.
    ///
    /// The lease is only released once the process has exited. A process that
    /// survives termination keeps it until a reaper sees the exit.
    async fn teardown(&self, exit: Result<PumpExit>, lease: LeaseToken) -> Result<()> {
        let PumpExit {
            mut source,
            mut writer,
            frames,
            ..
        } = match exit {
            Ok(exit) => exit,
            Err(e) => {
                // The process went down with the task; its exit is unobservable
                lease.forfeit();
                return Err(e);
            }
        };

        debug!("[wake] pump forwarded {} frames", frames);
        let terminated = source.terminate().await;

        if let Err(e) = writer.close().await {
            debug!("[wake] closing session failed: {}", e);
        }

        match terminated {
            Ok(()) => {
                lease.release();
                Ok(())
            }
            Err(e) => {
                error!("[wake] capture process {} did not exit: {:#}", source.name(), e);
                let name = source.name().to_string();
                release_after_exit(source, lease);
                Err(e.context(format!("Capture process {} still running", name)))
            }
        }
    }

    async fn on_wake(&self, detection: &Detection) {
        match serde_json::to_vec(&WakeMessage::from(detection)) {
            Ok(payload) => {
                if let Err(e) = self.publisher.publish(Topic::WakeDetected, payload).await {
                    warn!("[wake] failed to publish detection: {:#}", e);
                }
            }
            Err(e) => error!("[wake] could not encode detection: {}", e),
        }

        if let Some(cue) = &self.cue {
            cue.play_detached();
        }
    }

    async fn request_capture(&self) {
        let secs = self.settings.capture_secs;
        match self
            .publisher
            .publish(Topic::SttCapture, secs.to_string().into_bytes())
            .await
        {
            Ok(()) => info!("[wake] requested {}s capture", secs),
            Err(e) => warn!("[wake] failed to request capture: {:#}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_window() {
        let mut cooldown = Cooldown::new(Duration::from_secs(1));
        let start = Instant::now();

        assert!(cooldown.accept(start));
        assert!(!cooldown.accept(start + Duration::from_millis(500)));
        assert!(!cooldown.accept(start + Duration::from_millis(999)));
        assert!(cooldown.accept(start + Duration::from_secs(1)));
        // Rejected detections do not extend the window
        assert!(!cooldown.accept(start + Duration::from_millis(1500)));
        assert!(cooldown.accept(start + Duration::from_millis(2000)));
    }

    #[test]
    fn test_settings_from_config() {
        let settings = WakeSettings::from_config(&Config::default());
        assert_eq!(settings.capture_secs, 3);
        assert_eq!(settings.resume_margin, Duration::from_millis(200));
        assert_eq!(settings.restart_delay, Duration::from_millis(500));
    }
}
