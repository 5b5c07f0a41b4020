pub mod client;
pub mod messages;
pub mod topics;

pub use client::{NatsClient, Publisher};
pub use messages::{MalformedPayload, TranscriptMessage, WakeMessage};
pub use topics::Topic;
