//! The audio worker: a dedicated OS thread with its own single-threaded
//! runtime. It owns all microphone and recognizer I/O for the wake and
//! capture pipeline; the bus side reaches it only through `BusBridge`.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::thread;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bridge::{BridgeReceiver, BusBridge, Command, Completion};
use crate::orchestrator::{CaptureOrchestrator, CaptureOutcome, Submission, WakeOrchestrator};

pub struct Worker {
    thread: Option<thread::JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Start the worker thread. The returned bridge is the only way in.
    pub fn spawn(
        wake: Option<WakeOrchestrator>,
        capture: CaptureOrchestrator,
    ) -> Result<(Worker, BusBridge)> {
        let (bridge, receiver) = BusBridge::channel();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let thread = thread::Builder::new()
            .name("audio-worker".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build audio worker runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(run(wake, Arc::new(capture), receiver, token));
            })
            .context("Failed to spawn audio worker thread")?;

        Ok((
            Worker {
                thread: Some(thread),
                shutdown,
            },
            bridge,
        ))
    }

    /// Stop the orchestrators and join the thread. Blocks.
    pub fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Worker body: the wake loop plus command dispatch, until shutdown
pub async fn run(
    wake: Option<WakeOrchestrator>,
    capture: Arc<CaptureOrchestrator>,
    receiver: BridgeReceiver,
    shutdown: CancellationToken,
) {
    info!("Audio worker started");

    let wake = wake.map(|wake| tokio::spawn(wake.run(shutdown.clone())));

    dispatch(receiver, capture, &shutdown).await;
    shutdown.cancel();

    if let Some(wake) = wake {
        if let Err(e) = wake.await {
            error!("Wake orchestrator task failed: {}", e);
        }
    }

    info!("Audio worker stopped");
}

/// Apply bridge commands in submission order
pub async fn dispatch(
    mut receiver: BridgeReceiver,
    capture: Arc<CaptureOrchestrator>,
    shutdown: &CancellationToken,
) {
    loop {
        let (command, responder) = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = receiver.recv() => match next {
                Some(next) => next,
                None => {
                    warn!("Bus bridge closed; audio worker exiting");
                    break;
                }
            },
        };

        match command {
            Command::Capture(request) => match capture.submit(request) {
                Submission::Accepted(task) => {
                    tokio::spawn(async move {
                        let outcome = task.await.unwrap_or_else(|e| {
                            CaptureOutcome::Failed(format!("capture task failed: {}", e))
                        });
                        responder.respond(Completion::Capture(outcome));
                    });
                }
                Submission::Dropped => responder.respond(Completion::Capture(CaptureOutcome::Dropped)),
            },
        }
    }
}
