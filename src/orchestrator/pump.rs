//! Frame pump: forwards captured frames into a recognition session
//!
//! Stopping is two-phase. `stop` signals the cancellation token and then
//! joins the task, so once it returns no read or write is in flight and the
//! frame source is back in the caller's hands for teardown. That holds even
//! when the source panics mid-read.

use anyhow::{anyhow, bail, Context, Result};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::audio::{AudioFrame, FrameSource};
use crate::recognition::SessionWriter;

#[derive(Debug)]
pub enum PumpEnd {
    /// Stopped through the cancellation token
    Cancelled,
    /// The source reached end of stream
    SourceFinished,
    /// No frame arrived within the read timeout
    ReadTimeout,
    /// Reading the source or writing the session failed
    Failed(anyhow::Error),
}

/// What a finished pump hands back for teardown
pub struct PumpExit {
    pub source: Box<dyn FrameSource>,
    pub writer: SessionWriter,
    pub frames: u64,
    pub end: PumpEnd,
}

/// Forward frames in capture order until cancelled, finished, or failed
pub async fn forward_frames(
    source: &mut dyn FrameSource,
    writer: &mut SessionWriter,
    read_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> (u64, PumpEnd) {
    let mut frames = 0;

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break PumpEnd::Cancelled,
            next = read_next(source, read_timeout) => next,
        };

        let frame = match next {
            None => break PumpEnd::ReadTimeout,
            Some(Err(e)) => break PumpEnd::Failed(e),
            Some(Ok(None)) => break PumpEnd::SourceFinished,
            Some(Ok(Some(frame))) => frame,
        };

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break PumpEnd::Cancelled,
            sent = writer.send_frame(&frame) => sent,
        };

        if let Err(e) = sent {
            break PumpEnd::Failed(anyhow!(e).context("Failed to forward frame"));
        }
        frames += 1;
    };

    debug!("Pump from {} ended after {} frames: {:?}", source.name(), frames, end);
    (frames, end)
}

async fn read_next(
    source: &mut dyn FrameSource,
    read_timeout: Option<Duration>,
) -> Option<Result<Option<AudioFrame>>> {
    match read_timeout {
        Some(limit) => tokio::time::timeout(limit, source.read_frame()).await.ok(),
        None => Some(source.read_frame().await),
    }
}

/// A frame pump running as its own task
pub struct FramePump {
    cancel: CancellationToken,
    handle: Option<JoinHandle<PumpExit>>,
}

impl FramePump {
    pub fn start(
        mut source: Box<dyn FrameSource>,
        mut writer: SessionWriter,
        read_timeout: Option<Duration>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let pumping = forward_frames(source.as_mut(), &mut writer, read_timeout, &token);
            let (frames, end) = match AssertUnwindSafe(pumping).catch_unwind().await {
                Ok(done) => done,
                Err(_) => (0, PumpEnd::Failed(anyhow!("frame pump panicked"))),
            };
            PumpExit {
                source,
                writer,
                frames,
                end,
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Resolves when the pump ends without being stopped.
    ///
    /// Cancel safe. After it resolves the pump is spent and `stop` fails.
    pub async fn finished(&mut self) -> Result<PumpExit> {
        let Some(handle) = self.handle.as_mut() else {
            bail!("frame pump already finished");
        };
        let exit = handle.await.context("Frame pump task failed");
        self.handle = None;
        exit
    }

    /// Signal cancellation, then wait for the task to acknowledge it
    pub async fn stop(mut self) -> Result<PumpExit> {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            bail!("frame pump already finished");
        };
        handle.await.context("Frame pump task failed")
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        // An unjoined pump must not keep feeding a session nobody reads
        self.cancel.cancel();
    }
}
