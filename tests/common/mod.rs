// In-memory stand-ins for the microphone, recognizers, bus and speaker
#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use robot_voice::audio::{AudioFormat, AudioFrame, AudioOutput, CaptureBackend, FrameSource};
use robot_voice::nats::{Publisher, Topic};
use robot_voice::recognition::{
    Event, EventReader, EventWriter, RecognitionSession, Recognizer, SessionError,
};

/// One fake frame every 100ms, like arecord with 3200-byte chunks
pub const FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// The physical microphone: counts processes that have it open
#[derive(Default)]
pub struct Device {
    open: AtomicUsize,
    max_open: AtomicUsize,
    spawned: AtomicUsize,
}

impl Device {
    fn open(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
        self.spawned.fetch_add(1, Ordering::SeqCst);
    }

    fn close(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

pub struct FakeSource {
    name: String,
    format: AudioFormat,
    device: Arc<Device>,
    interval: Duration,
    remaining: Option<u64>,
    stall: bool,
    running: bool,
    terminations: Arc<AtomicUsize>,
    /// Ignores termination and only exits once notified
    stubborn: Option<Arc<Notify>>,
}

impl FakeSource {
    fn exit(&mut self) {
        if self.running {
            self.running = false;
            self.device.close();
        }
    }
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn read_frame(&mut self) -> Result<Option<AudioFrame>> {
        if !self.running {
            return Ok(None);
        }
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.remaining == Some(0) {
            // A stubborn process closes stdout but keeps the device open
            if self.stubborn.is_none() {
                self.exit();
            }
            return Ok(None);
        }

        tokio::time::sleep(self.interval).await;
        if let Some(n) = self.remaining.as_mut() {
            *n -= 1;
        }
        Ok(Some(AudioFrame::new(vec![0u8; 320], self.format)))
    }

    async fn terminate(&mut self) -> Result<()> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if self.running && self.stubborn.is_some() {
            bail!("capture process {} did not exit after SIGKILL", self.name);
        }
        self.exit();
        Ok(())
    }

    async fn wait_exit(&mut self) -> Result<()> {
        if let Some(release) = self.stubborn.clone() {
            if self.running {
                release.notified().await;
            }
        }
        self.exit();
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FakeSource {
    fn drop(&mut self) {
        self.exit();
    }
}

/// Spawns `FakeSource`s on a shared `Device`
pub struct FakeBackend {
    label: String,
    device: Arc<Device>,
    pub interval: Duration,
    /// Frame limit for the next spawned source (simulates the process dying)
    pub next_limit: Mutex<Option<u64>>,
    pub stall: AtomicBool,
    pub fail_spawns: AtomicUsize,
    pub spawns: Mutex<Vec<Option<Duration>>>,
    pub terminations: Arc<AtomicUsize>,
    /// Spawned sources survive termination until `let_exit`
    pub stubborn: AtomicBool,
    exit_signal: Arc<Notify>,
}

impl FakeBackend {
    pub fn new(label: &str, device: Arc<Device>) -> Self {
        Self {
            label: label.to_string(),
            device,
            interval: FRAME_INTERVAL,
            next_limit: Mutex::new(None),
            stall: AtomicBool::new(false),
            fail_spawns: AtomicUsize::new(0),
            spawns: Mutex::new(Vec::new()),
            terminations: Arc::new(AtomicUsize::new(0)),
            stubborn: AtomicBool::new(false),
            exit_signal: Arc::new(Notify::new()),
        }
    }

    /// Let a stubborn source finally exit
    pub fn let_exit(&self) {
        self.exit_signal.notify_one();
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.lock().unwrap().len()
    }

    pub fn termination_count(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureBackend for FakeBackend {
    async fn spawn(&self, duration: Option<Duration>) -> Result<Box<dyn FrameSource>> {
        if take_one(&self.fail_spawns) {
            bail!("{}: no such device", self.label);
        }

        let count = {
            let mut spawns = self.spawns.lock().unwrap();
            spawns.push(duration);
            spawns.len()
        };

        // Bounded captures end on their own, like `arecord -d`
        let bounded = duration.map(|d| (d.as_millis() / self.interval.as_millis().max(1)) as u64);
        let remaining = self.next_limit.lock().unwrap().take().or(bounded);

        self.device.open();
        Ok(Box::new(FakeSource {
            name: format!("{}-{}", self.label, count),
            format: AudioFormat::default(),
            device: Arc::clone(&self.device),
            interval: self.interval,
            remaining,
            stall: self.stall.load(Ordering::SeqCst),
            running: true,
            terminations: Arc::clone(&self.terminations),
            stubborn: self
                .stubborn
                .load(Ordering::SeqCst)
                .then(|| Arc::clone(&self.exit_signal)),
        }))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Test-side handle on one recognizer connection
#[derive(Clone)]
pub struct SessionHandle {
    pub sent: Arc<Mutex<Vec<Event>>>,
    pub closed: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<Option<Event>>,
}

impl SessionHandle {
    pub fn push(&self, event: Event) {
        let _ = self.events.send(Some(event));
    }

    /// End the event stream as if the server hung up
    pub fn disconnect(&self) {
        let _ = self.events.send(None);
    }

    pub fn sent(&self) -> Vec<Event> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn chunks(&self) -> usize {
        self.sent()
            .iter()
            .filter(|e| matches!(e, Event::AudioChunk { .. }))
            .count()
    }
}

struct FakeWriter {
    handle: SessionHandle,
    reply: Vec<Event>,
    reply_delay: Duration,
}

#[async_trait]
impl EventWriter for FakeWriter {
    async fn write_event(&mut self, event: &Event) -> Result<(), SessionError> {
        if self.handle.is_closed() {
            return Err(SessionError::Closed);
        }
        self.handle.sent.lock().unwrap().push(event.clone());

        if matches!(event, Event::AudioStop | Event::Synthesize(_)) && !self.reply.is_empty() {
            let reply = self.reply.clone();
            let delay = self.reply_delay;
            let handle = self.handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for event in reply {
                    handle.push(event);
                }
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.handle.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeReader(mpsc::UnboundedReceiver<Option<Event>>);

#[async_trait]
impl EventReader for FakeReader {
    async fn read_event(&mut self) -> Result<Option<Event>, SessionError> {
        Ok(self.0.recv().await.flatten())
    }
}

/// Recognizer whose sessions are driven by the test
#[derive(Default)]
pub struct FakeRecognizer {
    sessions: Mutex<Vec<SessionHandle>>,
    pub fail_connects: AtomicUsize,
    /// Sent back after `audio-stop` or `synthesize`
    pub reply: Mutex<Vec<Event>>,
    pub reply_delay: Mutex<Duration>,
}

impl FakeRecognizer {
    pub fn replying(events: Vec<Event>, delay: Duration) -> Self {
        Self {
            reply: Mutex::new(events),
            reply_delay: Mutex::new(delay),
            ..Self::default()
        }
    }

    pub fn connections(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// The `index`th session, waiting for it to be opened
    pub async fn session(&self, index: usize) -> SessionHandle {
        loop {
            if let Some(handle) = self.sessions.lock().unwrap().get(index).cloned() {
                return handle;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn connect(&self) -> Result<RecognitionSession, SessionError> {
        if take_one(&self.fail_connects) {
            return Err(SessionError::Connect("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            events: tx,
        };
        self.sessions.lock().unwrap().push(handle.clone());

        let writer = FakeWriter {
            handle,
            reply: self.reply.lock().unwrap().clone(),
            reply_delay: *self.reply_delay.lock().unwrap(),
        };
        Ok(RecognitionSession::new(Box::new(writer), Box::new(FakeReader(rx))))
    }

    fn endpoint(&self) -> &str {
        "fake://recognizer"
    }
}

#[derive(Debug, Clone)]
pub struct Published {
    pub topic: Topic,
    pub payload: Vec<u8>,
    pub at: Instant,
}

impl Published {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).to_string()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

/// Records publishes; `tap` mirrors them to a channel
#[derive(Default)]
pub struct FakePublisher {
    published: Mutex<Vec<Published>>,
    tap: Mutex<Option<mpsc::UnboundedSender<Published>>>,
}

impl FakePublisher {
    pub fn tap(&self) -> mpsc::UnboundedReceiver<Published> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tap.lock().unwrap() = Some(tx);
        rx
    }

    pub fn on(&self, topic: Topic) -> Vec<Published> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<()> {
        let message = Published {
            topic,
            payload,
            at: Instant::now(),
        };
        if let Some(tap) = self.tap.lock().unwrap().as_ref() {
            let _ = tap.send(message.clone());
        }
        self.published.lock().unwrap().push(message);
        Ok(())
    }
}

/// Speaker that keeps what it was asked to play
#[derive(Default)]
pub struct FakeOutput {
    pub played: Mutex<Vec<Vec<u8>>>,
    pub fail: AtomicBool,
}

impl FakeOutput {
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn play(&self, wav: Vec<u8>) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("aplay exited with status 1");
        }
        self.played.lock().unwrap().push(wav);
        Ok(())
    }
}

/// Poll `cond` until it holds or `limit` passes
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
