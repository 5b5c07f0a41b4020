//! Orchestrators driving the microphone and speaker
//!
//! `WakeOrchestrator` and `CaptureOrchestrator` share the microphone through
//! a `MicArbiter` and run on the audio worker. `PlaybackOrchestrator` only
//! uses the speaker and runs wherever it is called.

pub mod capture;
pub mod playback;
pub mod pump;
pub mod reaper;
pub mod wake;

pub use capture::{
    CaptureOrchestrator, CaptureOutcome, CaptureRequest, CaptureSettings, Submission,
    TranscriptResult,
};
pub use playback::{PlaybackJob, PlaybackOrchestrator, PlaybackStage};
pub use pump::{FramePump, PumpEnd, PumpExit};
pub use reaper::release_after_exit;
pub use wake::{Cooldown, WakeOrchestrator, WakeSettings, WakeState, WakeStatus};
