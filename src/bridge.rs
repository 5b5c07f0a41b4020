//! Handoff of bus commands into the audio worker context
//!
//! The bus client delivers messages on its own runtime. Commands are sent as
//! values over an ordered channel; each submission gets a oneshot completion
//! that resolves once the worker has finished with it.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::orchestrator::{CaptureOutcome, CaptureRequest};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Capture(CaptureRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Capture(CaptureOutcome),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("audio worker is not running")]
pub struct WorkerGone;

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Completion>,
}

/// Submitting side. Cheap to clone, usable from any thread or runtime.
#[derive(Clone)]
pub struct BusBridge {
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Worker side, drained in submission order
pub struct BridgeReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl BusBridge {
    pub fn channel() -> (BusBridge, BridgeReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BusBridge { tx }, BridgeReceiver { rx })
    }

    /// Submit and continue; the result arrives through the returned `Pending`
    pub fn submit(&self, command: Command) -> Result<Pending, WorkerGone> {
        let (reply, rx) = oneshot::channel();
        debug!("Submitting {:?} to worker", command);
        self.tx
            .send(Envelope { command, reply })
            .map_err(|_| WorkerGone)?;
        Ok(Pending { rx })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl BridgeReceiver {
    /// Next command, `None` once every `BusBridge` is gone
    pub async fn recv(&mut self) -> Option<(Command, Responder)> {
        self.rx
            .recv()
            .await
            .map(|envelope| (envelope.command, Responder(envelope.reply)))
    }
}

/// Completes one submission
pub struct Responder(oneshot::Sender<Completion>);

impl Responder {
    /// Deliver the completion; a submitter that stopped waiting is ignored
    pub fn respond(self, completion: Completion) {
        if self.0.send(completion).is_err() {
            debug!("Submitter dropped before completion");
        }
    }
}

/// Completion of one submitted command
pub struct Pending {
    rx: oneshot::Receiver<Completion>,
}

impl Pending {
    /// Wait for the worker; `Err` if the worker dropped the command
    pub async fn wait(self) -> Result<Completion, WorkerGone> {
        self.rx.await.map_err(|_| WorkerGone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::CaptureRequest;

    fn capture(secs: u32) -> Command {
        Command::Capture(CaptureRequest::new(secs))
    }

    #[tokio::test]
    async fn test_commands_from_foreign_thread_arrive_in_order() {
        let (bridge, mut receiver) = BusBridge::channel();

        let submitter = std::thread::spawn(move || {
            (1..=5)
                .map(|secs| bridge.submit(capture(secs)).unwrap())
                .collect::<Vec<_>>()
        });
        let pending = tokio::task::spawn_blocking(move || submitter.join().unwrap())
            .await
            .unwrap();

        for expected in 1..=5 {
            let (command, responder) = receiver.recv().await.unwrap();
            let Command::Capture(request) = command;
            assert_eq!(request.secs, expected);
            responder.respond(Completion::Capture(CaptureOutcome::Dropped));
        }

        for p in pending {
            assert_eq!(
                p.wait().await.unwrap(),
                Completion::Capture(CaptureOutcome::Dropped)
            );
        }
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_submit_after_worker_gone() {
        let (bridge, receiver) = BusBridge::channel();
        drop(receiver);
        assert!(bridge.is_closed());
        assert_eq!(bridge.submit(capture(3)).err(), Some(WorkerGone));
    }

    #[tokio::test]
    async fn test_dropped_responder_reports_worker_gone() {
        let (bridge, mut receiver) = BusBridge::channel();
        let pending = bridge.submit(capture(3)).unwrap();
        let (_, responder) = receiver.recv().await.unwrap();
        drop(responder);
        assert_eq!(pending.wait().await.err(), Some(WorkerGone));
    }
}
