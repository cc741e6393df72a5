//! Hand-off of session messages to the downstream queue.
//!
//! Messages are keyed by their session so that all messages of a session land in the same
//! partition and keep their order.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reel_ids::SessionId;
use reel_kafka::KafkaTopic;
use reel_statsd::metric;

#[cfg(feature = "processing")]
use {reel_config::Config, reel_kafka::KafkaClient, std::borrow::Cow};

use crate::statsd::ReelCounters;

/// The kind of a [`QueueMessage`], sent as message header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageKind {
    /// A serialized [`SessionStartEvent`](crate::events::SessionStartEvent).
    SessionStart,
    /// A serialized [`SessionEndEvent`](crate::events::SessionEndEvent).
    SessionEnd,
    /// A batch of recorded events, forwarded as received.
    Batch,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message handed to the queue.
#[derive(Clone, Debug)]
pub struct QueueMessage {
    pub session_id: SessionId,
    pub kind: MessageKind,
    pub payload: Bytes,
}

impl QueueMessage {
    pub fn new(session_id: SessionId, kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self {
            session_id,
            kind,
            payload: payload.into(),
        }
    }
}

#[cfg(feature = "processing")]
impl reel_kafka::Message for QueueMessage {
    fn key(&self) -> [u8; 8] {
        self.session_id.to_be_bytes()
    }

    fn variant(&self) -> &'static str {
        self.kind.as_str()
    }

    fn payload(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.payload)
    }
}

/// Errors returned by [`Enqueue::enqueue`].
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    /// The message could not be produced to Kafka.
    #[cfg(feature = "processing")]
    #[error("failed to produce message")]
    Kafka(#[from] reel_kafka::ProducerError),
    /// The transport does not accept messages.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Hands messages to the durable queue.
///
/// `enqueue` returns once the transport accepted the message and may block under backpressure.
/// Delivery reports arrive asynchronously and are handled by the transport.
pub trait Enqueue: Send + Sync + fmt::Debug {
    fn enqueue(&self, topic: KafkaTopic, message: QueueMessage) -> Result<(), EnqueueError>;

    /// Waits up to `timeout` for in-flight messages on shutdown.
    fn flush(&self, _timeout: Duration) {}
}

/// Counts and drops every message. Installed when processing is disabled.
#[derive(Debug, Default)]
pub struct DiscardQueue;

impl Enqueue for DiscardQueue {
    fn enqueue(&self, topic: KafkaTopic, message: QueueMessage) -> Result<(), EnqueueError> {
        reel_log::trace!(
            topic = topic.as_str(),
            kind = message.kind.as_str(),
            session_id = %message.session_id,
            "discarding message"
        );
        metric!(
            counter(ReelCounters::EnqueueDiscarded) += 1,
            topic = topic.as_str(),
            kind = message.kind.as_str(),
        );
        Ok(())
    }
}

/// Produces messages to Kafka.
#[cfg(feature = "processing")]
#[derive(Debug)]
pub struct KafkaQueue {
    client: KafkaClient,
}

#[cfg(feature = "processing")]
impl KafkaQueue {
    /// Creates a producer for every topic from the `processing` config section.
    pub fn create(config: &Config) -> Result<Self, crate::service::ServiceError> {
        let mut builder = KafkaClient::builder();
        for topic in KafkaTopic::iter() {
            let params = config.kafka_config(*topic)?;
            builder = builder.add_kafka_topic_config(*topic, &params)?;
        }

        Ok(Self {
            client: builder.build(),
        })
    }
}

#[cfg(feature = "processing")]
impl Enqueue for KafkaQueue {
    fn enqueue(&self, topic: KafkaTopic, message: QueueMessage) -> Result<(), EnqueueError> {
        self.client.send_message(topic, &message)?;
        Ok(())
    }

    fn flush(&self, timeout: Duration) {
        self.client.flush(timeout);
    }
}
