use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::convert::to_playback_wav;
use crate::audio::AudioOutput;
use crate::config::PlaybackConfig;
use crate::recognition::Recognizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStage {
    Synthesizing,
    Converting,
    Playing,
    Done,
    Failed,
}

/// One `say` request as it moves through the stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackJob {
    pub text: String,
    pub stage: PlaybackStage,
    /// Size of the WAV handed to the output
    pub wav_bytes: usize,
}

impl PlaybackJob {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            stage: PlaybackStage::Synthesizing,
            wav_bytes: 0,
        }
    }

    fn advance(&mut self, stage: PlaybackStage) {
        debug!("TTS: {:?} -> {:?}", self.stage, stage);
        self.stage = stage;
    }
}

/// Speaks text: synthesize, convert, play. Never touches the microphone.
pub struct PlaybackOrchestrator {
    synthesizer: Arc<dyn Recognizer>,
    output: Arc<dyn AudioOutput>,
    output_rate: u32,
    /// How long a synthesizer may take to return the whole utterance
    synth_timeout: Duration,
}

impl PlaybackOrchestrator {
    pub fn new(synthesizer: Arc<dyn Recognizer>, output: Arc<dyn AudioOutput>, output_rate: u32) -> Self {
        Self {
            synthesizer,
            output,
            output_rate,
            synth_timeout: PlaybackConfig::default().timeout(),
        }
    }

    pub fn with_synth_timeout(mut self, timeout: Duration) -> Self {
        self.synth_timeout = timeout;
        self
    }

    /// Speak `text`. Blank text is a no-op and yields `None`.
    pub async fn say(&self, text: &str) -> Option<PlaybackJob> {
        let text = text.trim();
        if text.is_empty() {
            debug!("TTS: nothing to say");
            return None;
        }

        info!("TTS: saying {:?}", text);
        let mut job = PlaybackJob::new(text);

        match self.perform(&mut job).await {
            Ok(()) => {
                job.advance(PlaybackStage::Done);
                info!("TTS: done ({} bytes played)", job.wav_bytes);
            }
            Err(e) => {
                warn!("TTS: failed at {:?}: {:#}", job.stage, e);
                job.advance(PlaybackStage::Failed);
            }
        }

        Some(job)
    }

    /// Run `say` as its own task; concurrent calls are independent
    pub fn spawn_say(self: &Arc<Self>, text: String) -> JoinHandle<Option<PlaybackJob>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.say(&text).await })
    }

    async fn perform(&self, job: &mut PlaybackJob) -> Result<()> {
        let session = self.synthesizer.connect().await.with_context(|| {
            format!("Failed to connect to TTS at {}", self.synthesizer.endpoint())
        })?;

        let synthesized = tokio::time::timeout(self.synth_timeout, session.synthesize(&job.text))
            .await
            .with_context(|| format!("No synthesized audio within {:?}", self.synth_timeout))??;
        let Some(audio) = synthesized else {
            bail!("no audio returned from synthesizer");
        };

        job.advance(PlaybackStage::Converting);
        let wav = to_playback_wav(&audio.pcm, audio.format, self.output_rate)?;
        job.wav_bytes = wav.len();

        job.advance(PlaybackStage::Playing);
        self.output.play(wav).await
    }
}
