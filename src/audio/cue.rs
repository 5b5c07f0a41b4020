// Short "listening" beep played when a wake word is accepted

use anyhow::Result;
use std::f32::consts::PI;
use std::sync::Arc;
use tracing::{debug, warn};

use super::convert::encode_wav;
use super::playback::AudioOutput;
use crate::config::CueConfig;

/// Generate a sine tone as mono 16-bit samples
pub fn tone(rate: u32, frequency_hz: f32, duration_ms: u32, amplitude: f32) -> Vec<i16> {
    let n = (u64::from(rate) * u64::from(duration_ms) / 1000) as usize;
    let amplitude = amplitude.clamp(0.0, 1.0) * f32::from(i16::MAX);

    (0..n)
        .map(|i| {
            let t = i as f32 / rate as f32;
            (amplitude * (2.0 * PI * frequency_hz * t).sin()) as i16
        })
        .collect()
}

/// Pre-rendered cue clip and the output it plays on
pub struct WakeCue {
    wav: Vec<u8>,
    output: Arc<dyn AudioOutput>,
}

impl WakeCue {
    pub fn new(config: &CueConfig, output: Arc<dyn AudioOutput>) -> Result<Self> {
        let samples = tone(
            config.rate,
            config.frequency_hz,
            config.duration_ms,
            config.amplitude,
        );
        let wav = encode_wav(&samples, config.rate)?;
        debug!("Wake cue rendered ({} samples)", samples.len());
        Ok(Self { wav, output })
    }

    /// Play without waiting; failures are only logged
    pub fn play_detached(&self) {
        let wav = self.wav.clone();
        let output = Arc::clone(&self.output);
        tokio::spawn(async move {
            if let Err(e) = output.play(wav).await {
                warn!("Wake cue failed: {:#}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_length_and_peak() {
        let samples = tone(48000, 880.0, 150, 0.3);
        assert_eq!(samples.len(), 7200);

        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        let expected = (0.3 * f32::from(i16::MAX)) as u16;
        assert!(peak <= expected && peak > expected - 200);
    }

    #[test]
    fn test_tone_starts_at_zero() {
        assert_eq!(tone(48000, 880.0, 10, 0.3)[0], 0);
    }
}
