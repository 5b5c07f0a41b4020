//! The voice gateway: wake, capture and playback wired to the bus
//!
//! Bus messages arrive on the main runtime. Capture requests cross into the
//! audio worker through the bridge; `tts/say` runs right here because it
//! never touches the microphone.

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::arbiter::MicArbiter;
use crate::audio::{AplayOutput, ArecordBackend, AudioOutput, WakeCue};
use crate::bridge::{BusBridge, Command, Completion, Pending};
use crate::config::{CaptureConfig, Config};
use crate::nats::messages::{parse_capture_secs, parse_say};
use crate::nats::{NatsClient, Publisher, Topic};
use crate::orchestrator::{
    CaptureOrchestrator, CaptureRequest, CaptureSettings, PlaybackOrchestrator, WakeOrchestrator,
    WakeSettings,
};
use crate::recognition::TcpRecognizer;
use crate::shutdown::ctrl_c;
use crate::worker::Worker;

/// Run until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    let nats = NatsClient::connect(&config.bus).await?;
    let publisher: Arc<dyn Publisher> = Arc::new(nats.clone());
    let output: Arc<dyn AudioOutput> = Arc::new(AplayOutput::new(&config.playback));

    // Wake and capture share one microphone
    let arbiter = MicArbiter::new();

    let mut wake = WakeOrchestrator::new(
        WakeSettings::from_config(&config),
        arbiter.clone(),
        Arc::new(ArecordBackend::new("wake", &config.capture, &config.audio)),
        Arc::new(TcpRecognizer::new(&config.wake.endpoint)?),
        Arc::clone(&publisher),
    );
    if config.cue.enabled {
        wake = wake.with_cue(WakeCue::new(&config.cue, Arc::clone(&output))?);
    }

    let capture = CaptureOrchestrator::new(
        CaptureSettings::from_config(&config),
        arbiter,
        Arc::new(ArecordBackend::new("stt", &config.capture, &config.audio)),
        Arc::new(TcpRecognizer::new(&config.stt.endpoint)?),
        Arc::clone(&publisher),
    );

    let playback = PlaybackOrchestrator::new(
        Arc::new(TcpRecognizer::new(&config.tts.endpoint)?),
        output,
        config.tts.output_rate,
    )
    .with_synth_timeout(config.playback.timeout());
    let playback = Arc::new(playback);

    let (worker, bridge) = Worker::spawn(Some(wake), capture)?;

    let capture_requests = nats
        .subscribe(Topic::SttCapture)
        .await?
        .map(|message| message.payload.to_vec());
    let say_requests = nats
        .subscribe(Topic::TtsSay)
        .await?
        .map(|message| message.payload.to_vec());

    info!("Voice gateway running");
    serve(
        capture_requests,
        say_requests,
        &bridge,
        &config.capture,
        &playback,
        ctrl_c(),
    )
    .await;

    tokio::task::spawn_blocking(move || worker.shutdown())
        .await
        .context("Failed to join audio worker")?;
    nats.close().await
}

/// Serve `stt/capture` and `tts/say` until `shutdown` resolves or a
/// subscription closes
pub async fn serve<C, S, F>(
    mut capture_requests: C,
    mut say_requests: S,
    bridge: &BusBridge,
    config: &CaptureConfig,
    playback: &Arc<PlaybackOrchestrator>,
    shutdown: F,
) where
    C: Stream<Item = Vec<u8>> + Unpin,
    S: Stream<Item = Vec<u8>> + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            payload = capture_requests.next() => {
                let Some(payload) = payload else {
                    warn!("Capture subscription closed");
                    break;
                };
                handle_capture(bridge, config, &payload);
            }
            payload = say_requests.next() => {
                let Some(payload) = payload else {
                    warn!("Say subscription closed");
                    break;
                };
                let text = parse_say(&payload);
                info!("Bus: tts/say {:?}", text);
                playback.spawn_say(text);
            }
        }
    }
}

/// Validate a `stt/capture` payload and hand it to the worker.
///
/// Returns `None` when the payload was malformed or the worker is gone.
pub fn submit_capture(bridge: &BusBridge, config: &CaptureConfig, payload: &[u8]) -> Option<Pending> {
    let secs = match parse_capture_secs(payload, config.default_secs, config.max_secs) {
        Ok(secs) => secs,
        Err(e) => {
            warn!("Bus: {}; ignoring", e);
            return None;
        }
    };

    match bridge.submit(Command::Capture(CaptureRequest::new(secs))) {
        Ok(pending) => Some(pending),
        Err(e) => {
            warn!("Bus: dropping {}s capture request: {}", secs, e);
            None
        }
    }
}

fn handle_capture(bridge: &BusBridge, config: &CaptureConfig, payload: &[u8]) {
    if let Some(pending) = submit_capture(bridge, config, payload) {
        tokio::spawn(async move {
            match pending.wait().await {
                Ok(Completion::Capture(outcome)) => info!("Bus: capture finished: {:?}", outcome),
                Err(e) => warn!("Bus: capture request lost: {}", e),
            }
        });
    }
}
