//! Dialogue router: turns transcripts into spoken replies
//!
//! Listens on `stt/text` and answers on `tts/say` with a handful of fixed
//! intents. Anything unrecognised is echoed back.

use anyhow::Result;
use chrono::{Local, NaiveTime};
use futures::{Stream, StreamExt};
use std::future::Future;
use tracing::{info, warn};

use crate::config::{Config, RouterConfig};
use crate::nats::messages::transcript_text;
use crate::nats::{NatsClient, Publisher, Topic};
use crate::shutdown::ctrl_c;

/// Reply for one transcript, given the local time of day
pub fn intent_reply(text: &str, now: NaiveTime, config: &RouterConfig) -> String {
    let text = text.trim();
    if text.is_empty() {
        return "I didn't catch that.".to_string();
    }

    let lower = text.to_lowercase();

    if lower.starts_with("say ") {
        let rest = text.get(4..).unwrap_or_default().trim();
        return if rest.is_empty() { "Okay.".to_string() } else { rest.to_string() };
    }

    if lower.contains("what time") || lower.contains("time is it") {
        return format!("It is {}.", now.format("%-I:%M %p"));
    }

    if lower.contains("your name") || lower.contains("who are you") {
        return format!("I am {}.", config.assistant_name);
    }

    format!("You said: {}", text)
}

/// Run until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    let nats = NatsClient::connect(&config.bus).await?;
    let transcripts = nats
        .subscribe(Topic::SttText)
        .await?
        .map(|message| message.payload.to_vec());

    info!("Dialogue router running");
    serve(transcripts, &nats, &config.router, ctrl_c()).await;

    nats.close().await
}

/// Answer transcripts until `shutdown` resolves or the subscription closes
pub async fn serve<S, F>(mut transcripts: S, publisher: &dyn Publisher, config: &RouterConfig, shutdown: F)
where
    S: Stream<Item = Vec<u8>> + Unpin,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            payload = transcripts.next() => {
                let Some(payload) = payload else {
                    warn!("Transcript subscription closed");
                    break;
                };

                let heard = transcript_text(&payload);
                let reply = intent_reply(&heard, Local::now().time(), config);
                info!("Router: heard {:?} -> reply {:?}", heard, reply);

                if let Err(e) = publisher.publish(Topic::TtsSay, reply.into_bytes()).await {
                    warn!("Router: failed to publish reply: {:#}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> String {
        let now = NaiveTime::from_hms_opt(9, 5, 0).unwrap();
        intent_reply(text, now, &RouterConfig::default())
    }

    #[test]
    fn test_empty_transcript() {
        assert_eq!(reply(""), "I didn't catch that.");
        assert_eq!(reply("   "), "I didn't catch that.");
    }

    #[test]
    fn test_say_intent() {
        assert_eq!(reply("say hello there"), "hello there");
        assert_eq!(reply("Say  Good night "), "Good night");
        // Trimmed to a bare "say", which is not the intent
        assert_eq!(reply("say "), "You said: say");
    }

    #[test]
    fn test_time_intent() {
        assert_eq!(reply("what time is it"), "It is 9:05 AM.");
        let evening = NaiveTime::from_hms_opt(21, 30, 0).unwrap();
        assert_eq!(
            intent_reply("Do you know what time it is?", evening, &RouterConfig::default()),
            "It is 9:30 PM."
        );
    }

    #[test]
    fn test_name_intent() {
        assert_eq!(reply("who are you"), "I am Oscar's voice assistant.");
        assert_eq!(reply("What's your name?"), "I am Oscar's voice assistant.");
    }

    #[test]
    fn test_echo_fallback() {
        assert_eq!(reply("turn left"), "You said: turn left");
    }
}
