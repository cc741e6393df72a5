//! Configuration primitives to configure the kafka producer and properly set up the connection.
//!
//! The configuration can be either;
//! - [`TopicAssignment::Primary`] - the main and default kafka configuration,
//! - [`TopicAssignment::Secondary`] - used to configure any additional kafka topic,

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kafka configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The user referenced a kafka config name that does not exist.
    #[error("unknown kafka config name")]
    UnknownKafkaConfigName,
}

/// Define the topics over which Reel hands off session data.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum KafkaTopic {
    /// Session starts and event batches recorded by browsers.
    RawWeb,
    /// Session starts and event batches recorded by mobile clients.
    RawMobile,
}

impl KafkaTopic {
    /// Returns iterator over the variants of [`KafkaTopic`].
    /// It will have to be adjusted if the new variants are added.
    pub fn iter() -> std::slice::Iter<'static, Self> {
        static TOPICS: [KafkaTopic; 2] = [KafkaTopic::RawWeb, KafkaTopic::RawMobile];
        TOPICS.iter()
    }

    /// Returns the name of the topic for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RawWeb => "raw_web",
            Self::RawMobile => "raw_mobile",
        }
    }
}

macro_rules! define_topic_assignments {
    ($($field_name:ident : ($kafka_topic:path, $default_topic:literal, $doc:literal)),* $(,)?) => {
        /// Configuration for topics.
        #[derive(Serialize, Deserialize, Debug)]
        #[serde(default)]
        pub struct TopicAssignments {
            $(
                #[doc = $doc]
                pub $field_name: TopicAssignment,
            )*

            /// Additional topic assignments configured but currently unused by this instance.
            #[serde(flatten)]
            pub unused: BTreeMap<String, TopicAssignment>,
        }

        impl TopicAssignments {
            /// Get a topic assignment by [`KafkaTopic`] value
            #[must_use]
            pub fn get(&self, kafka_topic: KafkaTopic) -> &TopicAssignment {
                match kafka_topic {
                    $(
                        $kafka_topic => &self.$field_name,
                    )*
                }
            }
        }

        impl Default for TopicAssignments {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_topic.to_owned().into(),
                    )*
                    unused: BTreeMap::new(),
                }
            }
        }
    };
}

// WARNING: When adding a topic here, make sure that the kafka topic exists or can be auto-created.
define_topic_assignments! {
    raw_web: (KafkaTopic::RawWeb, "raw", "Topic for web session data."),
    raw_mobile: (KafkaTopic::RawMobile, "raw-ios", "Topic for mobile session data."),
}

/// Configuration for a "logical" topic/datasink that Reel should forward data into.
///
/// Can be either a string containing the kafka topic name to produce into (using the default
/// `kafka_config`), or an object containing keys `name` and `config` for using a custom kafka
/// cluster from `secondary_kafka_configs`.
#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
pub enum TopicAssignment {
    /// String containing the kafka topic name. In this case the default kafka cluster configured
    /// in `kafka_config` will be used.
    Primary(String),
    /// Object containing topic name and string identifier of one of the clusters configured in
    /// `secondary_kafka_configs`.
    Secondary(KafkaTopicConfig),
}

/// Configuration for topic
#[derive(Serialize, Deserialize, Debug)]
pub struct KafkaTopicConfig {
    /// The topic name to use.
    #[serde(rename = "name")]
    topic_name: String,
    /// The Kafka config name will be used to produce data to the given topic.
    #[serde(rename = "config")]
    kafka_config_name: String,
}

/// Config for creating a Kafka producer.
#[derive(Debug)]
pub struct KafkaParams<'a> {
    /// The topic name to use.
    pub topic_name: &'a str,
    /// The Kafka config name will be used to produce data.
    pub config_name: Option<&'a str>,
    /// Parameters for the Kafka producer configuration.
    pub params: &'a [KafkaConfigParam],
}

impl From<String> for TopicAssignment {
    fn from(topic_name: String) -> Self {
        Self::Primary(topic_name)
    }
}

impl TopicAssignment {
    /// Get the kafka config for the current topic assignment.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the secondary config referenced by the assignment is missing.
    pub fn kafka_config<'a>(
        &'a self,
        default_config: &'a [KafkaConfigParam],
        secondary_configs: &'a BTreeMap<String, Vec<KafkaConfigParam>>,
    ) -> Result<KafkaParams<'a>, ConfigError> {
        let kafka_config = match self {
            Self::Primary(topic_name) => KafkaParams {
                topic_name,
                config_name: None,
                params: default_config,
            },
            Self::Secondary(KafkaTopicConfig {
                topic_name,
                kafka_config_name,
            }) => KafkaParams {
                topic_name,
                config_name: Some(kafka_config_name),
                params: secondary_configs
                    .get(kafka_config_name)
                    .ok_or(ConfigError::UnknownKafkaConfigName)?,
            },
        };

        Ok(kafka_config)
    }
}

/// A name value pair of Kafka config parameter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct KafkaConfigParam {
    /// Name of the Kafka config parameter.
    pub name: String,
    /// Value of the Kafka config parameter.
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(name: &str, value: &str) -> KafkaConfigParam {
        KafkaConfigParam {
            name: name.to_owned(),
            value: value.to_owned(),
        }
    }

    #[test]
    fn test_default_topics() {
        let topics = TopicAssignments::default();

        assert!(matches!(topics.get(KafkaTopic::RawWeb), TopicAssignment::Primary(name) if name == "raw"));
        assert!(
            matches!(topics.get(KafkaTopic::RawMobile), TopicAssignment::Primary(name) if name == "raw-ios")
        );
    }

    #[test]
    fn test_kafka_config() {
        let yaml = r#"
raw_web: "raw-web-replays"
raw_mobile:
    name: "raw-mobile-replays"
    config: "mobile"
legacy: "unused-topic"
"#;

        let def_config = vec![param("bootstrap.servers", "primary:9092")];
        let mut second_config = BTreeMap::new();
        second_config.insert(
            "mobile".to_owned(),
            vec![param("bootstrap.servers", "mobile:9092")],
        );

        let topics: TopicAssignments = serde_yaml::from_str(yaml).unwrap();
        assert!(topics.unused.contains_key("legacy"));

        let web = topics
            .get(KafkaTopic::RawWeb)
            .kafka_config(&def_config, &second_config)
            .unwrap();
        assert_eq!(web.topic_name, "raw-web-replays");
        assert_eq!(web.config_name, None);
        assert_eq!(web.params, def_config.as_slice());

        let mobile = topics
            .get(KafkaTopic::RawMobile)
            .kafka_config(&def_config, &second_config)
            .unwrap();
        assert_eq!(mobile.topic_name, "raw-mobile-replays");
        assert_eq!(mobile.config_name, Some("mobile"));
        assert_eq!(mobile.params[0].value, "mobile:9092");
    }

    #[test]
    fn test_unknown_secondary_config() {
        let yaml = r#"
raw_web:
    name: "raw"
    config: "missing"
"#;

        let topics: TopicAssignments = serde_yaml::from_str(yaml).unwrap();
        let secondary_configs = BTreeMap::new();
        let result = topics
            .get(KafkaTopic::RawWeb)
            .kafka_config(&[], &secondary_configs);

        assert!(matches!(result, Err(ConfigError::UnknownKafkaConfigName)));
    }
}
