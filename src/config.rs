use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;

use crate::audio::AudioFormat;

/// Environment variables override file values, e.g. `ROBOT_WAKE__COOLDOWN_MS=1500`
pub const ENV_PREFIX: &str = "ROBOT";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub audio: AudioConfig,
    pub capture: CaptureConfig,
    pub wake: WakeConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub playback: PlaybackConfig,
    pub cue: CueConfig,
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    /// Subject prefix shared by every service on the robot
    pub base: String,
    pub client_name: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            base: "robot".to_string(),
            client_name: "robot-voice".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Bytes per sample (2 = S16_LE)
    pub width: u16,
    pub channels: u16,
    /// Bytes per frame read from the capture process (~100ms at 16kHz mono)
    pub chunk_bytes: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            width: 2,
            channels: 1,
            chunk_bytes: 3200,
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.width, self.channels)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub command: String,
    /// ALSA device, e.g. "plughw:0,0" (empty = default device)
    pub device: String,
    /// Extra flags inserted after the command, split on whitespace
    pub extra_args: String,
    pub default_secs: u32,
    pub max_secs: u32,
    /// Added to the capture length to bound each frame read
    pub read_grace_ms: u64,
    /// How long a capture request waits for the wake stream to let go of the mic
    pub handoff_timeout_ms: u64,
    pub kill_grace_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: "arecord".to_string(),
            device: String::new(),
            extra_args: String::new(),
            default_secs: 3,
            max_secs: 30,
            read_grace_ms: 2000,
            handoff_timeout_ms: 2000,
            kill_grace_ms: 1000,
        }
    }
}

impl CaptureConfig {
    pub fn read_grace(&self) -> Duration {
        Duration::from_millis(self.read_grace_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WakeConfig {
    pub endpoint: String,
    pub cooldown_ms: u64,
    /// Seconds requested from the capture service after each wake
    pub capture_secs: u32,
    pub resume_margin_ms: u64,
    pub restart_delay_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:10400".to_string(),
            cooldown_ms: 1000,
            capture_secs: 3,
            resume_margin_ms: 200,
            restart_delay_ms: 500,
        }
    }
}

impl WakeConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn resume_margin(&self) -> Duration {
        Duration::from_millis(self.resume_margin_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub endpoint: String,
    /// Lower bound on the transcript wait
    pub min_wait_secs: u64,
    /// Added to the capture length to form the transcript wait
    pub wait_grace_secs: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:10300".to_string(),
            min_wait_secs: 6,
            wait_grace_secs: 3,
        }
    }
}

impl SttConfig {
    /// `max(min_wait, secs + grace)`
    pub fn transcript_wait(&self, secs: u32) -> Duration {
        let wait = self.min_wait_secs.max(u64::from(secs) + self.wait_grace_secs);
        Duration::from_secs(wait)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub endpoint: String,
    pub output_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:10200".to_string(),
            output_rate: 48000, // speaker path expects 48kHz
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub command: String,
    pub device: String,
    pub timeout_secs: u64,
}

impl PlaybackConfig {
    /// Bound on synthesis and on each player run
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            command: "aplay".to_string(),
            device: "plughw:0,0".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    pub enabled: bool,
    pub frequency_hz: f32,
    pub duration_ms: u32,
    pub amplitude: f32,
    pub rate: u32,
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency_hz: 880.0,
            duration_ms: 150,
            amplitude: 0.3,
            rate: 48000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub assistant_name: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            assistant_name: "Oscar's voice assistant".to_string(),
        }
    }
}

impl Config {
    /// Load config from an optional file (any format the `config` crate knows)
    /// layered under `ROBOT_*` environment variables.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
