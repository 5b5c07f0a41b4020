use anyhow::{Context, Result};
use async_nats::Client;
use tracing::{debug, info};

use super::topics::Topic;
use crate::config::BusConfig;

/// Outbound side of the bus, as seen by the orchestrators
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Fire-and-forget publish (at-most-once)
    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<()>;
}

#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    base: String,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(config: &BusConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let name = format!("{}-{}", config.client_name, uuid::Uuid::new_v4());
        let client = async_nats::ConnectOptions::new()
            .name(name)
            .connect(config.url.as_str())
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully (subjects under '{}')", config.base);

        Ok(Self {
            client,
            base: config.base.clone(),
        })
    }

    pub fn subject(&self, topic: Topic) -> String {
        topic.subject(&self.base)
    }

    pub async fn subscribe(&self, topic: Topic) -> Result<async_nats::Subscriber> {
        let subject = self.subject(topic);

        info!("Subscribing to {}", subject);

        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to {}", subject))?;

        Ok(subscriber)
    }

    /// Flush pending publishes before shutdown
    pub async fn close(self) -> Result<()> {
        info!("Closing NATS connection");
        self.client.flush().await.context("Failed to flush NATS")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Publisher for NatsClient {
    async fn publish(&self, topic: Topic, payload: Vec<u8>) -> Result<()> {
        let subject = self.subject(topic);
        let len = payload.len();

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish to {}", subject))?;

        debug!("Published {} bytes to {}", len, subject);
        Ok(())
    }
}
