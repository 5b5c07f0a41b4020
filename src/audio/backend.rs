use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Raw PCM layout shared by capture, recognizers and synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub rate: u32,
    /// Bytes per sample
    pub width: u16,
    /// Number of interleaved channels
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(rate: u32, width: u16, channels: u16) -> Self {
        Self {
            rate,
            width,
            channels,
        }
    }

    /// Bytes in one multi-channel sample frame
    pub fn frame_bytes(&self) -> usize {
        usize::from(self.width) * usize::from(self.channels)
    }

    pub fn bytes_per_second(&self) -> usize {
        self.frame_bytes() * self.rate as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(16000, 2, 1)
    }
}

/// A chunk of captured audio. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    bytes: Arc<[u8]>,
    format: AudioFormat,
}

impl AudioFrame {
    pub fn new(bytes: impl Into<Arc<[u8]>>, format: AudioFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Playback length of this frame
    pub fn duration(&self) -> Duration {
        let bps = self.format.bytes_per_second();
        if bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.bytes.len() as f64 / bps as f64)
    }
}

/// A running producer of audio frames that owns the OS audio device
///
/// Implementations:
/// - `AudioCaptureProcess`: an external recording command (arecord)
/// - test fakes driven by the tokio clock
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// Read the next frame; `None` once the producer has finished
    async fn read_frame(&mut self) -> Result<Option<AudioFrame>>;

    /// Stop the producer and wait until the device is released.
    ///
    /// Calling this on an already stopped source is a no-op.
    async fn terminate(&mut self) -> Result<()>;

    /// Wait, without a deadline, until the producer has exited on its own
    async fn wait_exit(&mut self) -> Result<()>;

    /// Whether the producer may still hold the device
    fn is_running(&self) -> bool;

    /// Name for logging
    fn name(&self) -> &str;
}

/// Spawns frame sources on demand
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Start capturing. `duration` bounds the capture; `None` streams until terminated.
    async fn spawn(&self, duration: Option<Duration>) -> Result<Box<dyn FrameSource>>;
}
