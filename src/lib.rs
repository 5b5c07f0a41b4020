pub mod arbiter;
pub mod audio;
pub mod bridge;
pub mod config;
pub mod gateway;
pub mod nats;
pub mod orchestrator;
pub mod recognition;
pub mod router;
pub mod shutdown;
pub mod worker;

pub use arbiter::{Holder, LeaseToken, MicArbiter, MicLease};
pub use audio::{AudioFormat, AudioFrame, CaptureBackend, FrameSource};
pub use bridge::{BusBridge, Command, Completion};
pub use config::Config;
pub use nats::{NatsClient, Publisher, Topic, TranscriptMessage, WakeMessage};
pub use orchestrator::{
    CaptureOrchestrator, CaptureOutcome, CaptureRequest, PlaybackOrchestrator, WakeOrchestrator,
    WakeState, WakeStatus,
};
pub use recognition::{Event, RecognitionSession, Recognizer, SessionError};
pub use worker::Worker;
