use std::sync::Arc;
use std::time::Duration;

use reel_auth::TokenCodec;
use reel_config::{Config, ConfigError};
use reel_ids::IdGenerator;
use reel_sampling::{Admission, RandomAdmission};

use crate::services::clients::{ClientResolver, UserAgentResolver};
use crate::services::flags::{FlagEvaluator, StaticFlags};
use crate::services::geo::{GeoResolver, MaxMindGeoResolver, UnknownGeo};
use crate::services::negotiation::{NegotiatedSettings, NegotiationStore};
use crate::services::projects::{ProjectDirectory, StaticProjects};
use crate::services::queue::{DiscardQueue, Enqueue};
use crate::services::sessions::{DiscardSessionStore, SessionStore};
use crate::services::storage::{DiscardStorage, FsStorage, ObjectStorage};

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The configuration is incomplete.
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    /// The GeoIP database could not be opened.
    #[error("could not load the geoip database")]
    GeoIp(#[from] maxminddb::MaxMindDbError),

    /// Initializing the Kafka producer failed.
    #[cfg(feature = "processing")]
    #[error("could not initialize kafka producer")]
    Kafka(#[from] reel_kafka::ProducerError),

    /// The Kafka topics are misconfigured.
    #[cfg(feature = "processing")]
    #[error("invalid kafka topic configuration")]
    KafkaConfig(#[from] reel_kafka::ConfigError),
}

/// The external collaborators of the endpoints.
#[derive(Clone, Debug)]
pub struct Registry {
    pub projects: Arc<dyn ProjectDirectory>,
    pub clients: Arc<dyn ClientResolver>,
    pub geo: Arc<dyn GeoResolver>,
    pub sessions: Arc<dyn SessionStore>,
    pub flags: Arc<dyn FlagEvaluator>,
    pub storage: Arc<dyn ObjectStorage>,
    pub queue: Arc<dyn Enqueue>,
    pub admission: Arc<dyn Admission>,
}

impl Registry {
    /// Creates the collaborators described by the configuration.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let geo: Arc<dyn GeoResolver> = match config.geoip_path() {
            Some(path) => {
                reel_log::info!("loading geoip database from {}", path.display());
                Arc::new(MaxMindGeoResolver::open(path)?)
            }
            None => Arc::new(UnknownGeo),
        };

        let storage: Arc<dyn ObjectStorage> = match config.storage_path() {
            Some(path) => Arc::new(FsStorage::new(path)),
            None => Arc::new(DiscardStorage),
        };

        Ok(Self {
            projects: Arc::new(StaticProjects::from_config(config)),
            clients: Arc::new(UserAgentResolver),
            geo,
            sessions: Arc::new(DiscardSessionStore),
            flags: Arc::new(StaticFlags::from_config(config)),
            storage,
            queue: create_queue(config)?,
            admission: Arc::new(RandomAdmission),
        })
    }
}

#[cfg(feature = "processing")]
fn create_queue(config: &Config) -> Result<Arc<dyn Enqueue>, ServiceError> {
    if config.processing_enabled() {
        reel_log::info!("producing sessions to kafka");
        return Ok(Arc::new(crate::services::queue::KafkaQueue::create(config)?));
    }

    Ok(Arc::new(DiscardQueue))
}

#[cfg(not(feature = "processing"))]
fn create_queue(_config: &Config) -> Result<Arc<dyn Enqueue>, ServiceError> {
    Ok(Arc::new(DiscardQueue))
}

#[derive(Debug)]
struct StateInner {
    config: Arc<Config>,
    ids: IdGenerator,
    codec: TokenCodec,
    negotiation: Arc<NegotiationStore>,
    registry: Registry,
}

/// Server state shared by all endpoints.
#[derive(Clone, Debug)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Creates the state from the configuration and starts background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: Arc<Config>) -> Result<Self, ServiceError> {
        let registry = Registry::from_config(&config)?;
        let state = Self::new(config, registry)?;

        let interval = state.config().negotiation_purge_interval();
        tokio::spawn(state.inner.negotiation.clone().purge_periodically(interval));

        Ok(state)
    }

    /// Creates the state with the given collaborators.
    pub fn new(config: Arc<Config>, registry: Registry) -> Result<Self, ServiceError> {
        config.validate()?;

        // `validate` guarantees a non-empty secret.
        let secret = config.token_secret().unwrap_or_default();
        let previous_secrets = config
            .previous_token_secrets()
            .iter()
            .map(|secret| secret.as_bytes().to_vec())
            .collect();
        let codec = TokenCodec::new(secret.as_bytes(), previous_secrets);

        let defaults = NegotiatedSettings {
            beacon_size_limit: config.max_beacon_size(),
            compression_threshold: config.compression_threshold(),
        };
        let negotiation = Arc::new(NegotiationStore::new(
            defaults,
            config.negotiation_capacity(),
        ));

        Ok(Self {
            inner: Arc::new(StateInner {
                ids: IdGenerator::new(config.shard_id()),
                codec,
                negotiation,
                registry,
                config,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.inner.ids
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.inner.codec
    }

    pub fn negotiation(&self) -> &NegotiationStore {
        &self.inner.negotiation
    }

    pub fn projects(&self) -> &dyn ProjectDirectory {
        self.inner.registry.projects.as_ref()
    }

    pub fn clients(&self) -> &dyn ClientResolver {
        self.inner.registry.clients.as_ref()
    }

    pub fn geo(&self) -> &dyn GeoResolver {
        self.inner.registry.geo.as_ref()
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.inner.registry.sessions.as_ref()
    }

    pub fn flags(&self) -> &dyn FlagEvaluator {
        self.inner.registry.flags.as_ref()
    }

    pub fn storage(&self) -> &dyn ObjectStorage {
        self.inner.registry.storage.as_ref()
    }

    pub fn queue(&self) -> &dyn Enqueue {
        self.inner.registry.queue.as_ref()
    }

    pub fn admission(&self) -> &dyn Admission {
        self.inner.registry.admission.as_ref()
    }

    /// Flushes the queue, waiting up to `timeout`.
    pub fn shutdown(&self, timeout: Duration) {
        self.queue().flush(timeout);
    }
}
