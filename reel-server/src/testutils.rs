use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use bytes::Bytes;
use parking_lot::Mutex;
use reel_config::Config;
use reel_kafka::KafkaTopic;
use reel_sampling::{Admission, SampleRate};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::events::{SessionStartEvent, UnstartedSession};
use crate::service::{Registry, ServiceState};
use crate::services::clients::UserAgentResolver;
use crate::services::flags::StaticFlags;
use crate::services::geo::UnknownGeo;
use crate::services::projects::StaticProjects;
use crate::services::queue::{EnqueueError, Enqueue, MessageKind, QueueMessage};
use crate::services::server::{App, make_app};
use crate::services::sessions::{SessionStore, SessionStoreError};
use crate::services::storage::{ObjectStorage, StorageError};

pub const CHROME_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

pub const IOS_UA: &str = "ReelDemo/1 CFNetwork/1494.0.7 Darwin/23.4.0";

/// Key of a project that samples every session.
pub const SAMPLED_KEY: &str = "sampled";
/// Key of a project that samples no session.
pub const REJECTED_KEY: &str = "rejected";
/// Key of an inactive project.
pub const INACTIVE_KEY: &str = "inactive";

/// A configuration with three projects and a token secret.
pub fn test_config() -> Config {
    Config::from_json_value(json!({
        "auth": {
            "token_secret": "test-secret",
        },
        "projects": [
            {
                "project_id": 1,
                "project_key": SAMPLED_KEY,
                "sample_rate": 100,
                "beacon_size_limit": 4096,
            },
            {
                "project_id": 2,
                "project_key": REJECTED_KEY,
                "sample_rate": 0,
            },
            {
                "project_id": 3,
                "project_key": INACTIVE_KEY,
                "sample_rate": 100,
                "active": false,
            },
        ],
        "feature_flags": [
            {
                "project_id": 1,
                "key": "everyone",
                "rollout_percentage": 100,
                "payload": "{\"color\":\"red\"}",
            },
            {
                "project_id": 1,
                "key": "nobody",
                "rollout_percentage": 0,
            },
        ],
    }))
    .unwrap()
}

/// Records every message instead of sending it.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    messages: Mutex<Vec<(KafkaTopic, QueueMessage)>>,
    failing: bool,
}

impl MemoryQueue {
    /// A queue that rejects every message.
    pub fn failing() -> Self {
        Self {
            messages: Mutex::default(),
            failing: true,
        }
    }

    pub fn messages(&self) -> Vec<(KafkaTopic, QueueMessage)> {
        self.messages.lock().clone()
    }

    pub fn kinds(&self) -> Vec<MessageKind> {
        self.messages.lock().iter().map(|(_, m)| m.kind).collect()
    }
}

impl Enqueue for MemoryQueue {
    fn enqueue(&self, topic: KafkaTopic, message: QueueMessage) -> Result<(), EnqueueError> {
        if self.failing {
            return Err(EnqueueError::Unavailable("queue is down".to_owned()));
        }

        self.messages.lock().push((topic, message));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    pub started: Mutex<Vec<SessionStartEvent>>,
    pub unstarted: Mutex<Vec<UnstartedSession>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn add(&self, event: &SessionStartEvent) -> Result<(), SessionStoreError> {
        self.started.lock().push(event.clone());
        Ok(())
    }

    async fn add_unstarted(&self, session: &UnstartedSession) -> Result<(), SessionStoreError> {
        self.unstarted.lock().push(session.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    pub objects: Mutex<BTreeMap<String, Bytes>>,
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        key: &str,
        _content_type: Option<&str>,
        data: Bytes,
    ) -> Result<(), StorageError> {
        if key.contains("..") {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }

        self.objects.lock().insert(key.to_owned(), data);
        Ok(())
    }
}

/// Admits by rate like the production gate, counting every decision.
#[derive(Debug, Default)]
pub struct CountingAdmission {
    calls: AtomicUsize,
}

impl CountingAdmission {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Admission for CountingAdmission {
    fn admit(&self, rate: SampleRate) -> bool {
        self.calls.fetch_add(1, Ordering::Relaxed);
        rate.percent() >= 100
    }
}

/// The full application backed by in-memory collaborators.
#[derive(Debug)]
pub struct TestServer {
    pub state: ServiceState,
    pub queue: Arc<MemoryQueue>,
    pub sessions: Arc<MemorySessionStore>,
    pub storage: Arc<MemoryStorage>,
    pub admission: Arc<CountingAdmission>,
    app: App,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_queue(MemoryQueue::default())
    }

    pub fn with_queue(queue: MemoryQueue) -> Self {
        Self::with_config(test_config(), queue)
    }

    pub fn with_config(config: Config, queue: MemoryQueue) -> Self {
        let queue = Arc::new(queue);
        let sessions = Arc::new(MemorySessionStore::default());
        let storage = Arc::new(MemoryStorage::default());
        let admission = Arc::new(CountingAdmission::default());

        let registry = Registry {
            projects: Arc::new(StaticProjects::from_config(&config)),
            clients: Arc::new(UserAgentResolver),
            geo: Arc::new(UnknownGeo),
            sessions: sessions.clone(),
            flags: Arc::new(StaticFlags::from_config(&config)),
            storage: storage.clone(),
            queue: queue.clone(),
            admission: admission.clone(),
        };

        let state = ServiceState::new(Arc::new(config), registry).unwrap();
        let app = make_app(state.clone());

        Self {
            state,
            queue,
            sessions,
            storage,
            admission,
            app,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Sends a JSON body with the given user agent.
    pub async fn post_json(&self, uri: &str, user_agent: &str, body: Value) -> Response {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, user_agent)
            .body(Body::from(body.to_string()))
            .unwrap();

        self.send(request).await
    }

    /// Sends a raw batch authorized by `token`.
    pub async fn push(&self, uri: &str, token: &str, body: impl Into<Body>) -> Response {
        let request = Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(body.into())
            .unwrap();

        self.send(request).await
    }
}

/// Reads a JSON response body.
pub async fn json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
