use std::collections::BTreeMap;
use std::env;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use reel_kafka::{
    ConfigError as KafkaConfigError, KafkaConfigParam, KafkaParams, KafkaTopic, TopicAssignments,
};
use reel_log::{Level, LogConfig, SentryConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::byte_size::ByteSize;
use crate::projects::{FeatureFlagConfig, ProjectConfig};

/// Defines the source of a config error
#[derive(Debug, Default)]
enum ConfigErrorSource {
    /// An error occurring independently.
    #[default]
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

impl fmt::Display for ConfigErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErrorSource::None => Ok(()),
            ConfigErrorSource::File(file_name) => {
                write!(f, " (file {})", file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, " (field {name})"),
        }
    }
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            cause: None,
        }
    }

    #[inline]
    fn wrap<E>(cause: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            cause: Some(Box::new(cause)),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field<E>(cause: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(cause, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, p: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(p.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.source)
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to save a file.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Parsing JSON failed.
    #[error("could not parse json config file")]
    BadJson,
    /// Invalid config value
    #[error("invalid config value")]
    InvalidValue,
    /// The user attempted to run Reel with processing enabled, but uses a binary that was
    /// compiled without the processing feature.
    #[error("was not compiled with processing, cannot enable processing")]
    ProcessingNotAvailable,
    /// No secret to sign session tokens was configured.
    #[error("missing auth.token_secret, generate one with `reel token generate-secret`")]
    MissingTokenSecret,
}

enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yml",
            ConfigFormat::Json => "json",
        }
    }
}

trait ConfigObject: DeserializeOwned + Serialize {
    /// The format in which to serialize this configuration.
    fn format() -> ConfigFormat;

    /// The basename of the config file.
    fn name() -> &'static str;

    /// The full filename of the config file, including the file extension.
    fn path(base: &Path) -> PathBuf {
        base.join(format!("{}.{}", Self::name(), Self::format().extension()))
    }

    /// Loads the config file from a file within the given directory location.
    fn load(base: &Path) -> Result<Self, ConfigError> {
        let path = Self::path(base);

        let f = fs::File::open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(&path))?;

        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(&path)),
            ConfigFormat::Json => serde_json::from_reader(io::BufReader::new(f))
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadJson).file(&path)),
        }
    }

    /// Writes the configuration object to the given writer.
    fn write<W: Write>(&self, writer: &mut W) -> Result<(), ConfigError> {
        match Self::format() {
            ConfigFormat::Yaml => serde_yaml::to_writer(writer, self)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile)),
            ConfigFormat::Json => serde_json::to_writer_pretty(writer, self)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile)),
        }
    }

    /// Writes the configuration to a file within the given directory location.
    fn save(&self, base: &Path) -> Result<(), ConfigError> {
        let path = Self::path(base);
        let mut options = fs::OpenOptions::new();
        options.write(true).truncate(true).create(true);

        // Remove all non-user permissions for the newly created file, it holds the token secret.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut f = options
            .open(&path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile).file(&path))?;

        self.write(&mut f).map_err(|e| e.file(&path))?;
        f.write_all(b"\n").ok();

        Ok(())
    }
}

/// Structure used to hold information about configuration overrides via
/// CLI parameters or environment variables
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host Reel should bind to (network interface).
    pub host: Option<String>,
    /// The port to bind for the HTTP server.
    pub port: Option<String>,
    /// The shard encoded into minted session ids.
    pub shard_id: Option<String>,
    /// The secret used to sign session tokens.
    pub token_secret: Option<String>,
    /// "true" if processing is enabled "false" otherwise
    pub processing: Option<String>,
    /// the kafka bootstrap.servers configuration string
    pub kafka_url: Option<String>,
    /// The log level.
    pub log_level: Option<String>,
}

/// Network and runtime settings of the gateway.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Reel {
    /// The host to which Reel should bind.
    pub host: IpAddr,
    /// The port to which Reel should bind.
    pub port: u16,
    /// Shard encoded into every minted session id.
    ///
    /// Instances running side by side must use distinct shards.
    pub shard_id: u8,
    /// Maximum time in seconds to process a single request.
    pub request_timeout: u64,
    /// Maximum time in seconds to wait for in-flight requests on shutdown.
    pub shutdown_timeout: u64,
}

impl Default for Reel {
    fn default() -> Self {
        Reel {
            host: default_host(),
            port: 9000,
            shard_id: 0,
            request_timeout: 30,
            shutdown_timeout: 10,
        }
    }
}

/// Controls various limits
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Limits {
    /// The maximum payload size for JSON control messages.
    pub max_json_size: ByteSize,
    /// The batch size negotiated with projects that do not configure their own.
    pub max_beacon_size: ByteSize,
    /// The maximum size of a single image upload request.
    pub max_file_size: ByteSize,
    /// Inflated bodies may be at most this many times larger than the body ceiling.
    pub max_decompressed_factor: u64,
    /// Clients compress batches larger than this threshold.
    pub compression_threshold: ByteSize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_json_size: ByteSize::kibibytes(10),
            max_beacon_size: ByteSize::megabytes(1),
            max_file_size: ByteSize::megabytes(10),
            max_decompressed_factor: 10,
            compression_threshold: ByteSize::bytes(20_000),
        }
    }
}

/// Secrets for session tokens.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct Auth {
    /// The secret that signs new session tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_secret: Option<String>,
    /// Retired secrets that are still accepted when parsing tokens.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub previous_token_secrets: Vec<String>,
}

/// What a start request does when it presents an expired token.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContinuityPolicy {
    /// Start an unrelated session.
    #[default]
    Mint,
    /// Start a new session that records the expired one as its predecessor.
    Link,
}

/// Continuity policies per platform.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct Continuity {
    /// Policy for browser sessions.
    pub web: ContinuityPolicy,
    /// Policy for mobile sessions.
    pub mobile: ContinuityPolicy,
}

/// Bounds of the beacon negotiation table.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Negotiation {
    /// Maximum number of sessions with negotiated settings.
    pub capacity: usize,
    /// Interval in seconds at which expired entries are removed.
    pub purge_interval: u64,
}

impl Default for Negotiation {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            purge_interval: 60,
        }
    }
}

/// Location of the MaxMind database.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct GeoIp {
    /// Path to a `GeoIP2-City` or `GeoLite2-City` database.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Location of uploaded images.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct Storage {
    /// Directory receiving uploaded files. Uploads are discarded if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Control the metrics.
#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
pub struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`.
    pub statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    ///
    /// Defaults to `"reel"`.
    pub prefix: String,
    /// Default tags to apply to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// Emitted metrics will be buffered to optimize performance.
    ///
    /// Defaults to `true`.
    pub buffering: bool,
    /// Global sample rate for all emitted metrics between `0.0` and `1.0`.
    ///
    /// Defaults to `1.0` (100%).
    pub sample_rate: f64,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: None,
            prefix: "reel".to_owned(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
            buffering: true,
            sample_rate: 1.0,
        }
    }
}

/// Controls the hand-off of session data to Kafka.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct Processing {
    /// True if the Kafka hand-off should be enabled.
    pub enabled: bool,
    /// Kafka producer configurations.
    pub kafka_config: Vec<KafkaConfigParam>,
    /// Additional kafka producer configurations.
    ///
    /// Topics in `topics` may refer to these by name to produce into another cluster.
    pub secondary_kafka_configs: BTreeMap<String, Vec<KafkaConfigParam>>,
    /// Kafka topic names.
    pub topics: TopicAssignments,
}

/// The complete set of values in `config.yml`.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct ConfigValues {
    /// Network and runtime settings.
    pub reel: Reel,
    /// Body ceilings and negotiation defaults.
    pub limits: Limits,
    /// Token secrets.
    pub auth: Auth,
    /// Handling of expired tokens on start requests.
    pub continuity: Continuity,
    /// Bounds of the negotiation table.
    pub negotiation: Negotiation,
    /// The static project directory.
    pub projects: Vec<ProjectConfig>,
    /// Static feature flag definitions.
    pub feature_flags: Vec<FeatureFlagConfig>,
    /// Geo IP resolution.
    pub geoip: GeoIp,
    /// Storage for uploaded images.
    pub storage: Storage,
    /// StatsD metrics.
    pub metrics: Metrics,
    /// Log output.
    pub logging: LogConfig,
    /// Error reporting to Sentry.
    pub sentry: SentryConfig,
    /// The Kafka hand-off.
    pub processing: Processing,
}

impl ConfigObject for ConfigValues {
    fn format() -> ConfigFormat {
        ConfigFormat::Yaml
    }

    fn name() -> &'static str {
        "config"
    }
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup").is_ok_and(|s| s.contains("/docker"))
}

/// Default value for the "host" configuration.
fn default_host() -> IpAddr {
    if is_docker() {
        // Docker images rely on this service being reachable from the outside.
        IpAddr::from([0, 0, 0, 0])
    } else {
        IpAddr::from([127, 0, 0, 1])
    }
}

/// Config struct.
#[derive(Debug, Default)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        let config = Config {
            values: ConfigValues::load(&path)?,
            path: path.clone(),
        };

        if cfg!(not(feature = "processing")) && config.processing_enabled() {
            return Err(ConfigError::new(ConfigErrorKind::ProcessingNotAvailable).file(&path));
        }

        Ok(config)
    }

    /// Creates a config from a JSON value.
    ///
    /// This is mostly useful for tests.
    pub fn from_json_value(value: serde_json::Value) -> Result<Config, ConfigError> {
        Ok(Config {
            values: serde_json::from_value(value)
                .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::BadJson))?,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters)
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let reel = &mut self.values.reel;

        if let Some(host) = overrides.host {
            reel.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            reel.port = port
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(shard_id) = overrides.shard_id {
            reel.shard_id = shard_id
                .as_str()
                .parse()
                .map_err(|err| ConfigError::for_field(err, "shard_id"))?;
        }

        if let Some(token_secret) = overrides.token_secret {
            self.values.auth.token_secret = Some(token_secret);
        }

        if let Some(log_level) = overrides.log_level {
            self.values.logging.level = log_level
                .parse::<Level>()
                .map_err(|_| ConfigError::new(ConfigErrorKind::InvalidValue).field("log_level"))?;
        }

        let processing = &mut self.values.processing;
        if let Some(enabled) = overrides.processing {
            match enabled.to_lowercase().as_str() {
                "true" | "1" => processing.enabled = true,
                "false" | "0" | "" => processing.enabled = false,
                _ => {
                    return Err(ConfigError::new(ConfigErrorKind::InvalidValue).field("processing"));
                }
            }
        }

        if let Some(kafka_url) = overrides.kafka_url {
            let existing = processing
                .kafka_config
                .iter_mut()
                .find(|e| e.name == "bootstrap.servers");

            if let Some(config_param) = existing {
                config_param.value = kafka_url;
            } else {
                processing.kafka_config.push(KafkaConfigParam {
                    name: "bootstrap.servers".to_owned(),
                    value: kafka_url,
                })
            }
        }

        Ok(self)
    }

    /// Checks if the config is ready to serve requests.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.values.auth.token_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Ok(()),
            _ => Err(ConfigError::new(ConfigErrorKind::MissingTokenSecret)),
        }
    }

    /// Checks if the config is already initialized.
    pub fn config_exists<P: AsRef<Path>>(path: P) -> bool {
        fs::metadata(ConfigValues::path(path.as_ref())).is_ok()
    }

    /// Returns the filename of the config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the config into the given config folder.
    pub fn save_in_folder<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if fs::metadata(path).is_err() {
            fs::create_dir_all(path)
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path))?;
        }
        self.values.save(path)
    }

    /// Dumps out a YAML string of the values.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(&self.values)
            .map_err(|err| ConfigError::wrap(err, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Gives mutable access to the values, used to build configs in code.
    pub fn values_mut(&mut self) -> &mut ConfigValues {
        &mut self.values
    }

    /// Returns the socket address to which Reel should bind.
    pub fn listen_addr(&self) -> SocketAddr {
        (self.values.reel.host, self.values.reel.port).into()
    }

    /// Returns the shard encoded into minted session ids.
    pub fn shard_id(&self) -> u8 {
        self.values.reel.shard_id
    }

    /// Returns the deadline for processing a single request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.values.reel.request_timeout)
    }

    /// Returns the period for which in-flight requests are drained on shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.reel.shutdown_timeout)
    }

    /// Returns the log level.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns logging configuration.
    pub fn sentry(&self) -> &SentryConfig {
        &self.values.sentry
    }

    /// Returns the socket addresses for statsd.
    ///
    /// If stats is disabled an empty vector is returned.
    pub fn statsd_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        if let Some(ref addr) = self.values.metrics.statsd {
            let addrs = addr
                .as_str()
                .to_socket_addrs()
                .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::InvalidValue).file(&self.path))?
                .collect();
            Ok(addrs)
        } else {
            Ok(vec![])
        }
    }

    /// Return the prefix for statsd metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for statsd metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the name of the hostname tag that should be attached to each outgoing metric.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns true if metrics buffering is enabled, false otherwise.
    pub fn metrics_buffering(&self) -> bool {
        self.values.metrics.buffering
    }

    /// Returns the global sample rate for all metrics.
    pub fn metrics_sample_rate(&self) -> f64 {
        self.values.metrics.sample_rate
    }

    /// Returns the secret that signs new tokens, if configured.
    pub fn token_secret(&self) -> Option<&str> {
        self.values.auth.token_secret.as_deref()
    }

    /// Returns retired secrets that are still accepted.
    pub fn previous_token_secrets(&self) -> &[String] {
        &self.values.auth.previous_token_secrets
    }

    /// Returns the policies for start requests with expired tokens.
    pub fn continuity(&self) -> &Continuity {
        &self.values.continuity
    }

    /// Returns the maximum size of JSON control messages in bytes.
    pub fn max_json_size(&self) -> usize {
        self.values.limits.max_json_size.as_bytes() as usize
    }

    /// Returns the beacon size negotiated with projects without their own limit.
    pub fn max_beacon_size(&self) -> usize {
        self.values.limits.max_beacon_size.as_bytes() as usize
    }

    /// Returns the maximum size of an image upload request in bytes.
    pub fn max_file_size(&self) -> usize {
        self.values.limits.max_file_size.as_bytes() as usize
    }

    /// Returns how much larger than its ceiling an inflated body may be.
    pub fn max_decompressed_factor(&self) -> usize {
        self.values.limits.max_decompressed_factor.max(1) as usize
    }

    /// Returns the size above which clients compress batches.
    pub fn compression_threshold(&self) -> usize {
        self.values.limits.compression_threshold.as_bytes() as usize
    }

    /// Returns the capacity of the negotiation table.
    pub fn negotiation_capacity(&self) -> usize {
        self.values.negotiation.capacity
    }

    /// Returns the interval at which expired negotiation entries are purged.
    pub fn negotiation_purge_interval(&self) -> Duration {
        Duration::from_secs(self.values.negotiation.purge_interval.max(1))
    }

    /// Returns the static project directory.
    pub fn projects(&self) -> &[ProjectConfig] {
        &self.values.projects
    }

    /// Returns the static feature flag definitions.
    pub fn feature_flags(&self) -> &[FeatureFlagConfig] {
        &self.values.feature_flags
    }

    /// Returns the path to the MaxMind database.
    pub fn geoip_path(&self) -> Option<&Path> {
        self.values.geoip.path.as_deref()
    }

    /// Returns the directory that receives uploaded images.
    pub fn storage_path(&self) -> Option<&Path> {
        self.values.storage.path.as_deref()
    }

    /// True if the Kafka hand-off is enabled.
    pub fn processing_enabled(&self) -> bool {
        self.values.processing.enabled
    }

    /// Returns the kafka parameters of the given topic.
    pub fn kafka_config(&self, topic: KafkaTopic) -> Result<KafkaParams<'_>, KafkaConfigError> {
        let processing = &self.values.processing;
        processing.topics.get(topic).kafka_config(
            &processing.kafka_config,
            &processing.secondary_kafka_configs,
        )
    }
}
