//! This module contains the kafka producer related code.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use rdkafka::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{BaseRecord, Producer as _};
use reel_statsd::metric;
use thiserror::Error;

use crate::config::{KafkaParams, KafkaTopic};
use crate::statsd::{KafkaCounters, KafkaDistributions};

mod utils;
use utils::{CaptureErrorContext, ThreadedProducer};

/// Kafka producer errors.
#[derive(Error, Debug)]
pub enum ProducerError {
    /// Failed to send a kafka message.
    #[error("failed to send kafka message")]
    SendFailed(#[source] rdkafka::error::KafkaError),

    /// Failed to create a kafka producer because of the invalid configuration.
    #[error("failed to create kafka producer: invalid kafka config")]
    InvalidConfig(#[source] rdkafka::error::KafkaError),

    /// No producer was configured for the topic.
    #[error("no kafka producer configured for topic {}", .0.as_str())]
    InvalidTopicName(KafkaTopic),
}

/// Describes the type which can be sent using kafka producer provided by this crate.
pub trait Message {
    /// Returns the partitioning key for this kafka message.
    ///
    /// All messages with the same key end up in the same partition and keep their order.
    fn key(&self) -> [u8; 8];

    /// Returns the type of the message.
    fn variant(&self) -> &'static str;

    /// Returns the binary payload of the message.
    fn payload(&self) -> Cow<'_, [u8]>;
}

/// Single kafka producer config with assigned topic.
struct Producer {
    /// Kafka topic name.
    topic_name: String,
    /// Real kafka producer.
    producer: Arc<ThreadedProducer>,
}

impl Producer {
    fn new(topic_name: String, producer: Arc<ThreadedProducer>) -> Self {
        Self {
            topic_name,
            producer,
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("topic_name", &self.topic_name)
            .field("producer", &"<ThreadedProducer>")
            .finish()
    }
}

/// Keeps all the configured kafka producers and responsible for the routing of the messages.
#[derive(Debug)]
pub struct KafkaClient {
    producers: HashMap<KafkaTopic, Producer>,
}

impl KafkaClient {
    /// Returns the [`KafkaClientBuilder`]
    pub fn builder() -> KafkaClientBuilder {
        KafkaClientBuilder::default()
    }

    /// Sends message to the provided kafka topic.
    ///
    /// Returns the name of the kafka topic to which the message was produced.
    pub fn send_message(
        &self,
        topic: KafkaTopic,
        message: &impl Message,
    ) -> Result<&str, ProducerError> {
        self.send(topic, &message.key(), message.variant(), &message.payload())
    }

    /// Sends the payload to the correct producer for the current topic.
    ///
    /// The variant is attached as `kind` header, so consumers can tell messages apart without
    /// inspecting the payload.
    pub fn send(
        &self,
        topic: KafkaTopic,
        key: &[u8],
        variant: &str,
        payload: &[u8],
    ) -> Result<&str, ProducerError> {
        let producer = self.producers.get(&topic).ok_or_else(|| {
            reel_log::error!(
                "attempted to send message to {} using an unconfigured kafka producer",
                topic.as_str()
            );
            ProducerError::InvalidTopicName(topic)
        })?;

        metric!(
            distribution(KafkaDistributions::KafkaMessageSize) = payload.len() as u64,
            topic = topic.as_str(),
            variant = variant
        );

        let headers = OwnedHeaders::new().insert(Header {
            key: "kind",
            value: Some(variant),
        });

        let record = BaseRecord::to(&producer.topic_name)
            .key(key)
            .payload(payload)
            .headers(headers);

        producer
            .producer
            .send(record)
            .map_err(|(kafka_error, _message)| {
                reel_log::error!(
                    variant,
                    "error sending kafka message: {}",
                    reel_log::LogError(&kafka_error)
                );
                metric!(
                    counter(KafkaCounters::ProducerEnqueueError) += 1,
                    topic = topic.as_str(),
                    variant = variant
                );
                ProducerError::SendFailed(kafka_error)
            })?;

        Ok(producer.topic_name.as_str())
    }

    /// Waits until all in-flight messages were delivered or the timeout elapsed.
    pub fn flush(&self, timeout: Duration) {
        for (topic, producer) in &self.producers {
            if let Err(error) = producer.producer.flush(timeout) {
                reel_log::error!(
                    topic = topic.as_str(),
                    "failed to flush kafka producer: {}",
                    reel_log::LogError(&error)
                );
            }
        }
    }
}

/// Helper structure responsible for building the actual [`KafkaClient`].
#[derive(Default)]
pub struct KafkaClientBuilder {
    reused_producers: BTreeMap<Option<String>, Arc<ThreadedProducer>>,
    producers: HashMap<KafkaTopic, Producer>,
}

impl KafkaClientBuilder {
    /// Creates an empty KafkaClientBuilder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds topic configuration to the current [`KafkaClientBuilder`], which in return assigns
    /// dedicates producer to the topic which will be used to send the messages.
    ///
    /// Producers for the same config name are shared between topics.
    ///
    /// # Errors
    /// Returns [`ProducerError::InvalidConfig`] error if the provided configuration is wrong and
    /// the producer could not be created.
    pub fn add_kafka_topic_config(
        mut self,
        topic: KafkaTopic,
        params: &KafkaParams<'_>,
    ) -> Result<Self, ProducerError> {
        let KafkaParams {
            topic_name,
            config_name,
            params,
        } = params;

        let config_name = config_name.map(str::to_owned);
        if let Some(producer) = self.reused_producers.get(&config_name) {
            let producer = Producer::new((*topic_name).to_owned(), Arc::clone(producer));
            self.producers.insert(topic, producer);
            return Ok(self);
        }

        let mut client_config = ClientConfig::new();
        for config_p in *params {
            client_config.set(config_p.name.as_str(), config_p.value.as_str());
        }

        let producer = Arc::new(
            client_config
                .create_with_context(CaptureErrorContext)
                .map_err(ProducerError::InvalidConfig)?,
        );

        self.reused_producers
            .insert(config_name, Arc::clone(&producer));
        self.producers
            .insert(topic, Producer::new((*topic_name).to_owned(), producer));

        Ok(self)
    }

    /// Consumes self and returns the built [`KafkaClient`].
    pub fn build(self) -> KafkaClient {
        KafkaClient {
            producers: self.producers,
        }
    }
}

impl fmt::Debug for KafkaClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaClientBuilder")
            .field("reused_producers", &"<CachedProducers>")
            .field("producers", &self.producers)
            .finish()
    }
}
