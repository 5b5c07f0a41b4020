// Microphone capture through an external recording command (arecord)

use anyhow::{bail, Context, Result};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, warn};

use super::backend::{AudioFormat, AudioFrame, CaptureBackend, FrameSource};
use crate::config::{AudioConfig, CaptureConfig};

/// How long teardown waits for stderr diagnostics
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Spawns `arecord` processes with the configured device and format
pub struct ArecordBackend {
    label: String,
    config: CaptureConfig,
    format: AudioFormat,
    chunk_bytes: usize,
}

impl ArecordBackend {
    pub fn new(label: impl Into<String>, config: &CaptureConfig, audio: &AudioConfig) -> Self {
        Self {
            label: label.into(),
            config: config.clone(),
            format: audio.format(),
            chunk_bytes: audio.chunk_bytes.max(1),
        }
    }

    /// Arguments for one capture, raw little-endian PCM on stdout
    pub fn command_args(&self, duration: Option<Duration>) -> Vec<String> {
        let mut args = vec!["-q".to_string()];

        if !self.config.device.is_empty() {
            args.push("-D".to_string());
            args.push(self.config.device.clone());
        }

        args.extend(self.config.extra_args.split_whitespace().map(str::to_string));

        args.extend([
            "-f".to_string(),
            sample_format(self.format.width).to_string(),
            "-r".to_string(),
            self.format.rate.to_string(),
            "-c".to_string(),
            self.format.channels.to_string(),
        ]);

        if let Some(duration) = duration {
            // arecord treats -d 0 as unbounded
            let secs = duration.as_secs_f64().ceil().max(1.0) as u64;
            args.push("-d".to_string());
            args.push(secs.to_string());
        }

        args.extend(["-t".to_string(), "raw".to_string(), "-".to_string()]);
        args
    }
}

#[async_trait::async_trait]
impl CaptureBackend for ArecordBackend {
    async fn spawn(&self, duration: Option<Duration>) -> Result<Box<dyn FrameSource>> {
        let args = self.command_args(duration);
        let process = AudioCaptureProcess::spawn(
            &self.label,
            &self.config.command,
            &args,
            self.format,
            self.chunk_bytes,
            self.config.kill_grace(),
        )?;
        debug!("[{}] capture pid {:?}", self.label, process.id());
        Ok(Box::new(process))
    }
}

fn sample_format(width: u16) -> &'static str {
    match width {
        1 => "S8",
        3 => "S24_3LE",
        4 => "S32_LE",
        _ => "S16_LE",
    }
}

/// A running recording command. Holds the audio device until it has exited.
pub struct AudioCaptureProcess {
    name: String,
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    format: AudioFormat,
    chunk_bytes: usize,
    kill_grace: Duration,
    exit: Option<ExitStatus>,
}

impl AudioCaptureProcess {
    pub fn spawn(
        name: &str,
        program: &str,
        args: &[String],
        format: AudioFormat,
        chunk_bytes: usize,
        kill_grace: Duration,
    ) -> Result<Self> {
        info!("[{}] starting capture: {} {}", name, program, args.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn capture command: {}", program))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(Self {
            name: name.to_string(),
            child,
            stdout,
            stderr,
            format,
            chunk_bytes,
            kill_grace,
            exit: None,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    async fn wait_with_grace(&mut self) -> Result<ExitStatus> {
        if let Ok(status) = tokio::time::timeout(self.kill_grace, self.child.wait()).await {
            return Ok(status?);
        }

        warn!("[{}] capture did not exit after SIGTERM; killing", self.name);
        if let Err(e) = self.child.start_kill() {
            debug!("[{}] kill failed: {}", self.name, e);
        }

        match tokio::time::timeout(self.kill_grace, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => bail!("capture process {} did not exit after SIGKILL", self.name),
        }
    }

    async fn record_exit(&mut self, status: ExitStatus) {
        self.exit = Some(status);
        self.drain_stderr().await;
        info!("[{}] capture process exited ({})", self.name, status);
    }

    async fn drain_stderr(&mut self) {
        let Some(mut stderr) = self.stderr.take() else {
            return;
        };

        let mut err = String::new();
        match tokio::time::timeout(STDERR_DRAIN_TIMEOUT, stderr.read_to_string(&mut err)).await {
            Ok(Ok(_)) => {
                let err = err.trim();
                if !err.is_empty() {
                    warn!("[{}] arecord stderr: {}", self.name, err);
                }
            }
            Ok(Err(e)) => debug!("[{}] could not read stderr: {}", self.name, e),
            Err(_) => debug!("[{}] stderr drain timed out", self.name),
        }
    }
}

#[async_trait::async_trait]
impl FrameSource for AudioCaptureProcess {
    async fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut buf = vec![0u8; self.chunk_bytes];
        let n = stdout
            .read(&mut buf)
            .await
            .context("Failed to read from capture process")?;

        if n == 0 {
            debug!("[{}] capture stream reached EOF", self.name);
            self.stdout = None;
            return Ok(None);
        }

        buf.truncate(n);
        Ok(Some(AudioFrame::new(buf, self.format)))
    }

    async fn terminate(&mut self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }

        // Closing our end first keeps a blocked writer from holding the process up
        self.stdout = None;

        let status = match self.child.try_wait()? {
            Some(status) => status,
            None => {
                if let Err(e) = signal_terminate(&mut self.child) {
                    debug!("[{}] SIGTERM failed: {}", self.name, e);
                }
                self.wait_with_grace().await?
            }
        };

        self.record_exit(status).await;
        Ok(())
    }

    async fn wait_exit(&mut self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }

        self.stdout = None;
        let status = self
            .child
            .wait()
            .await
            .context("Failed to wait for capture process")?;
        self.record_exit(status).await;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.exit.is_none()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(unix)]
fn signal_terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(std::io::Error::from),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn signal_terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
