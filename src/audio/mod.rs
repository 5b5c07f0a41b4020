pub mod backend;
pub mod capture;
pub mod convert;
pub mod cue;
pub mod playback;

pub use backend::{AudioFormat, AudioFrame, CaptureBackend, FrameSource};
pub use capture::{ArecordBackend, AudioCaptureProcess};
pub use cue::WakeCue;
pub use playback::{AplayOutput, AudioOutput, AudioPlaybackProcess};
