// Speaker output through an external playback command (aplay)

use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::PlaybackConfig;

/// Plays complete, self-describing audio clips (WAV)
#[async_trait::async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play the clip and return once playback has finished
    async fn play(&self, wav: Vec<u8>) -> Result<()>;
}

/// One-shot playback command fed through stdin
pub struct AudioPlaybackProcess {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl AudioPlaybackProcess {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Spawn the command, write the whole buffer, close stdin and wait for exit.
    ///
    /// A non-zero exit status or exceeding the timeout is an error.
    pub async fn run(&self, buffer: &[u8]) -> Result<()> {
        debug!(
            "Playing with: {} {} ({} bytes)",
            self.program,
            self.args.join(" "),
            buffer.len()
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn playback command: {}", self.program))?;

        let playback = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(buffer)
                    .await
                    .context("Failed to write audio to playback process")?;
                stdin.shutdown().await.ok();
            }
            child.wait().await.context("Failed to wait for playback process")
        };

        let status = match tokio::time::timeout(self.timeout, playback).await {
            Ok(status) => status?,
            Err(_) => bail!("playback timed out after {:?}", self.timeout),
        };

        if !status.success() {
            bail!("{} exited with {}", self.program, status);
        }

        Ok(())
    }
}

/// `aplay` on the configured device
pub struct AplayOutput {
    process: AudioPlaybackProcess,
}

impl AplayOutput {
    pub fn new(config: &PlaybackConfig) -> Self {
        let mut args = vec!["-q".to_string()];
        if !config.device.is_empty() {
            args.push("-D".to_string());
            args.push(config.device.clone());
        }
        args.extend(["-t".to_string(), "wav".to_string(), "-".to_string()]);

        info!("Audio output: {} {}", config.command, args.join(" "));

        Self {
            process: AudioPlaybackProcess::new(
                config.command.clone(),
                args,
                config.timeout(),
            ),
        }
    }
}

#[async_trait::async_trait]
impl AudioOutput for AplayOutput {
    async fn play(&self, wav: Vec<u8>) -> Result<()> {
        self.process.run(&wav).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command() {
        let process = AudioPlaybackProcess::new("cat", vec![], Duration::from_secs(5));
        process.run(b"RIFF....").await.unwrap();
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error() {
        let process = AudioPlaybackProcess::new("false", vec![], Duration::from_secs(5));
        assert!(process.run(b"").await.is_err());
    }

    #[tokio::test]
    async fn test_missing_command_is_error() {
        let process =
            AudioPlaybackProcess::new("definitely-not-a-player", vec![], Duration::from_secs(5));
        assert!(process.run(b"").await.is_err());
    }

    #[tokio::test]
    async fn test_hung_player_times_out() {
        let process = AudioPlaybackProcess::new(
            "sleep",
            vec!["5".to_string()],
            Duration::from_millis(100),
        );
        let err = process.run(b"").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
