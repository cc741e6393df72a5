//! Kafka-related functionality.
//!
//! By default, this library only provides the topic configuration used by `reel-config`. With the
//! `producer` feature enabled, the [`KafkaClient`] is provided and can be used to send messages to
//! the Kafka broker.
//!
//! # Usage
//!
//! ```compile_fail
//! use reel_kafka::{KafkaClient, KafkaTopic};
//!
//! // Add one producer config per topic.
//! let client = KafkaClient::builder()
//!     .add_kafka_topic_config(KafkaTopic::RawWeb, &raw_web_params)?
//!     .build();
//!
//! // Send the message, keyed by the session.
//! client.send_message(KafkaTopic::RawWeb, &message)?;
//! ```
//!
//! Sending to a [`KafkaTopic`] without a configured producer returns an error.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod config;
#[cfg(feature = "producer")]
mod producer;
#[cfg(feature = "producer")]
mod statsd;

pub use config::*;
#[cfg(feature = "producer")]
pub use producer::*;
