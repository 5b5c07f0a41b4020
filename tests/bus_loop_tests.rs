// Bus-facing service loops: request routing and shutdown

mod common;

use common::{FakeOutput, FakePublisher, FakeRecognizer};
use futures::stream::{self, StreamExt};
use robot_voice::audio::AudioFormat;
use robot_voice::bridge::{BusBridge, Command};
use robot_voice::config::{CaptureConfig, RouterConfig};
use robot_voice::nats::Topic;
use robot_voice::orchestrator::PlaybackOrchestrator;
use robot_voice::recognition::Event;
use robot_voice::{gateway, router};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

fn payloads(items: &[&str]) -> impl futures::Stream<Item = Vec<u8>> + Unpin {
    stream::iter(items.iter().map(|s| s.as_bytes().to_vec()).collect::<Vec<_>>())
        .chain(stream::pending())
}

fn speaker() -> (Arc<PlaybackOrchestrator>, Arc<FakeOutput>) {
    let voice = AudioFormat::new(16000, 2, 1);
    let synth = Arc::new(FakeRecognizer::replying(
        vec![
            Event::AudioStart(voice),
            Event::AudioChunk {
                format: voice,
                audio: vec![0u8; 3200],
            },
            Event::AudioStop,
        ],
        Duration::ZERO,
    ));
    let output = Arc::new(FakeOutput::default());
    let playback = PlaybackOrchestrator::new(synth, output.clone(), 48000);
    (Arc::new(playback), output)
}

#[tokio::test(start_paused = true)]
async fn test_router_answers_until_shutdown() {
    let publisher = FakePublisher::default();
    let transcripts = payloads(&[r#"{"text": "what is your name", "secs": 3}"#, "say hello"]);

    router::serve(
        transcripts,
        &publisher,
        &RouterConfig::default(),
        tokio::time::sleep(Duration::from_secs(1)),
    )
    .await;

    let replies: Vec<_> = publisher.on(Topic::TtsSay).iter().map(|p| p.text()).collect();
    assert_eq!(replies, vec!["I am Oscar's voice assistant.", "hello"]);
}

#[tokio::test]
async fn test_router_stops_while_transcripts_keep_coming() {
    let publisher = FakePublisher::default();
    let (stop, stopped) = oneshot::channel::<()>();
    stop.send(()).unwrap();

    let served = tokio::time::timeout(
        Duration::from_secs(5),
        router::serve(
            stream::repeat(b"hello".to_vec()),
            &publisher,
            &RouterConfig::default(),
            async {
                let _ = stopped.await;
            },
        ),
    )
    .await;
    assert!(served.is_ok(), "shutdown was never observed");
}

#[tokio::test]
async fn test_router_stops_when_subscription_closes() {
    let publisher = FakePublisher::default();
    router::serve(
        stream::iter(vec![b"".to_vec()]),
        &publisher,
        &RouterConfig::default(),
        std::future::pending(),
    )
    .await;

    assert_eq!(publisher.on(Topic::TtsSay)[0].text(), "I didn't catch that.");
}

#[tokio::test(start_paused = true)]
async fn test_gateway_routes_capture_and_say() {
    let (bridge, mut receiver) = BusBridge::channel();
    let (playback, output) = speaker();

    gateway::serve(
        payloads(&["4", "soon"]),
        payloads(&["Hello there."]),
        &bridge,
        &CaptureConfig::default(),
        &playback,
        tokio::time::sleep(Duration::from_secs(1)),
    )
    .await;

    // The malformed request never reaches the worker
    let (Command::Capture(request), _) = receiver.recv().await.unwrap();
    assert_eq!(request.secs, 4);
    drop(bridge);
    assert!(receiver.recv().await.is_none());

    assert!(common::wait_until(|| output.played().len() == 1, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_gateway_stops_on_shutdown_under_load() {
    let (bridge, _receiver) = BusBridge::channel();
    let (playback, _) = speaker();
    let (stop, stopped) = oneshot::channel::<()>();
    stop.send(()).unwrap();

    let served = tokio::time::timeout(
        Duration::from_secs(5),
        gateway::serve(
            stream::repeat(b"3".to_vec()),
            stream::pending(),
            &bridge,
            &CaptureConfig::default(),
            &playback,
            async {
                let _ = stopped.await;
            },
        ),
    )
    .await;
    assert!(served.is_ok(), "shutdown was never observed");
}
