use chrono::Utc;
use reel_auth::{SessionToken, TokenError};
use reel_config::ContinuityPolicy;
use reel_ids::SessionId;
use reel_kafka::KafkaTopic;
use reel_log::LogError;
use reel_statsd::metric;
use serde::Serialize;
use uuid::Uuid;

use crate::events::{SessionEndEvent, SessionStartEvent};
use crate::ingest::{Failure, Ingest, IngestError, Stage};
use crate::service::ServiceState;
use crate::services::clients::ClientFacts;
use crate::services::geo::GeoFacts;
use crate::services::negotiation::NegotiatedSettings;
use crate::services::projects::{ProjectError, ProjectProfile};
use crate::services::queue::{MessageKind, QueueMessage};
use crate::statsd::ReelCounters;

/// How a start request relates to earlier sessions of the client.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Continuity {
    /// The client presented a valid token and keeps its session.
    Continue(SessionToken),
    /// A new session is minted.
    Fresh {
        /// A running session the client asked to reset.
        ended: Option<SessionId>,
        /// An expired session the new one is linked to.
        previous: Option<SessionId>,
    },
}

impl Continuity {
    /// Decides continuity from the token of a start request.
    ///
    /// Corrupt and missing tokens are not an error here: they simply start a fresh session.
    pub fn resolve(
        parsed: Result<SessionToken, TokenError>,
        reset: bool,
        policy: ContinuityPolicy,
    ) -> Self {
        match parsed {
            Ok(token) if !reset => Self::Continue(token),
            Ok(token) => Self::Fresh {
                ended: Some(token.id()),
                previous: None,
            },
            Err(TokenError::Expired(token)) if policy == ContinuityPolicy::Link => Self::Fresh {
                ended: None,
                previous: Some(token.id()),
            },
            Err(_) => Self::Fresh {
                ended: None,
                previous: None,
            },
        }
    }
}

/// Response of both start endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub token: String,
    #[serde(rename = "userUUID")]
    pub user_uuid: String,
    #[serde(rename = "sessionID")]
    pub session_id: String,
    #[serde(rename = "projectID")]
    pub project_id: String,
    pub beacon_size_limit: usize,
    pub compression_threshold: usize,
    pub start_timestamp: i64,
    pub delay: i64,
    #[serde(rename = "userOS", skip_serializing_if = "Option::is_none")]
    pub user_os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_browser: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_city: Option<String>,
}

impl StartResponse {
    pub fn new(
        state: &ServiceState,
        token: &SessionToken,
        project: &ProjectProfile,
        user_uuid: String,
        settings: NegotiatedSettings,
    ) -> Self {
        Self {
            token: state.codec().compose(token),
            user_uuid,
            session_id: token.id().to_string(),
            project_id: project.project_id.to_string(),
            beacon_size_limit: settings.beacon_size_limit,
            compression_threshold: settings.compression_threshold,
            start_timestamp: token.id().timestamp(),
            delay: token.delay(),
            user_os: None,
            user_device: None,
            user_browser: None,
            user_country: None,
            user_state: None,
            user_city: None,
        }
    }

    /// Reports the resolved client and location back to the client.
    pub fn with_facts(mut self, client: &ClientFacts, geo: &GeoFacts) -> Self {
        self.user_os = Some(client.os.clone());
        self.user_device = Some(client.device.clone());
        self.user_browser = Some(client.browser.clone());
        self.user_country = Some(geo.country.clone());
        self.user_state = Some(geo.state.clone());
        self.user_city = Some(geo.city.clone());
        self
    }
}

/// Echoes a valid client UUID or generates a new one.
pub fn user_uuid(raw: Option<&str>) -> String {
    raw.and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .unwrap_or_else(Uuid::new_v4)
        .to_string()
}

/// Returns the project key of a parsed start request.
pub fn require_project_key<'a>(
    ingest: &Ingest,
    project_key: Option<&'a str>,
) -> Result<&'a str, IngestError> {
    project_key
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ingest.fail(Failure::MissingProjectKey))
}

/// Looks up the project of a start request.
pub async fn resolve_project(
    state: &ServiceState,
    ingest: &Ingest,
    project_key: &str,
) -> Result<ProjectProfile, IngestError> {
    match state.projects().get_project_by_key(project_key).await {
        Ok(project) if project.active => Ok(project),
        Ok(_) | Err(ProjectError::NotFound) => Err(ingest.fail(Failure::UnknownProject)),
        Err(error) => Err(ingest.fail(Failure::internal(error))),
    }
}

/// Applies sampling and mints the identity of a new session.
pub fn admit_and_mint(
    state: &ServiceState,
    ingest: &Ingest,
    project: &ProjectProfile,
    platform: &'static str,
) -> Result<SessionId, IngestError> {
    if !state.admission().admit(project.sample_rate) {
        metric!(
            counter(ReelCounters::SessionNotSampled) += 1,
            platform = platform
        );
        return Err(ingest.fail(Failure::NotSampled));
    }

    state
        .ids()
        .mint()
        .map_err(|error| ingest.fail(Failure::internal(error)))
}

/// Records the negotiated settings of a new session.
pub fn negotiate(
    state: &ServiceState,
    project: &ProjectProfile,
    token: &SessionToken,
) -> NegotiatedSettings {
    let settings = NegotiatedSettings {
        beacon_size_limit: project.beacon_size_limit,
        compression_threshold: state.config().compression_threshold(),
    };

    state
        .negotiation()
        .set(token.id(), settings, token.expires_at());
    settings
}

/// Builds the token of a session minted now.
///
/// The delay is the skew between the server and the client clock. Clients that do not report a
/// positive clock get no delay.
pub fn new_token(
    id: SessionId,
    project: &ProjectProfile,
    client_timestamp: Option<i64>,
) -> SessionToken {
    let start = id.timestamp();
    let expires_at = start.saturating_add_unsigned(project.max_session_duration);
    let delay = match client_timestamp {
        Some(client) if client > 0 => start.saturating_sub(client),
        _ => 0,
    };
    SessionToken::new(id, delay, expires_at)
}

/// Hands a message to the queue, logging and counting failures.
pub fn enqueue(state: &ServiceState, topic: KafkaTopic, message: QueueMessage) {
    let kind = message.kind;
    if let Err(error) = state.queue().enqueue(topic, message) {
        reel_log::error!(
            error = &error as &dyn std::error::Error,
            topic = topic.as_str(),
            kind = kind.as_str(),
            "failed to enqueue message"
        );
        metric!(
            counter(ReelCounters::EnqueueError) += 1,
            topic = topic.as_str(),
            kind = kind.as_str(),
        );
    }
}

/// Persists and announces a newly minted session.
///
/// If the client reset a running session, its end is announced first.
pub async fn publish_start(
    state: &ServiceState,
    ingest: &mut Ingest,
    topic: KafkaTopic,
    event: &SessionStartEvent,
    ended: Option<SessionId>,
) -> Result<(), IngestError> {
    ingest.enter(Stage::Executing);

    if let Some(ended) = ended {
        let end = SessionEndEvent {
            session_id: ended,
            timestamp: Utc::now().timestamp_millis(),
        };
        let payload = serde_json::to_vec(&end).map_err(|e| ingest.fail(Failure::internal(e)))?;
        enqueue(
            state,
            topic,
            QueueMessage::new(ended, MessageKind::SessionEnd, payload),
        );
    }

    if let Err(error) = state.sessions().add(event).await {
        reel_log::error!(
            session_id = %event.session_id,
            "failed to store session: {}",
            LogError(&error)
        );
        metric!(counter(ReelCounters::SessionStoreError) += 1, kind = "started");
    }

    let payload = serde_json::to_vec(event).map_err(|e| ingest.fail(Failure::internal(e)))?;
    enqueue(
        state,
        topic,
        QueueMessage::new(event.session_id, MessageKind::SessionStart, payload),
    );

    metric!(
        counter(ReelCounters::SessionStarted) += 1,
        platform = event.platform
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_at: i64) -> SessionToken {
        SessionToken::new(SessionId::from_u64(7), 0, expires_at)
    }

    #[test]
    fn test_continuity_valid_token() {
        let continuity = Continuity::resolve(Ok(token(10)), false, ContinuityPolicy::Mint);
        assert_eq!(continuity, Continuity::Continue(token(10)));
    }

    #[test]
    fn test_continuity_reset() {
        let continuity = Continuity::resolve(Ok(token(10)), true, ContinuityPolicy::Link);
        assert_eq!(
            continuity,
            Continuity::Fresh {
                ended: Some(SessionId::from_u64(7)),
                previous: None
            }
        );
    }

    #[test]
    fn test_continuity_expired() {
        let expired = Err(TokenError::Expired(token(10)));
        assert_eq!(
            Continuity::resolve(expired, false, ContinuityPolicy::Mint),
            Continuity::Fresh {
                ended: None,
                previous: None
            }
        );
        assert_eq!(
            Continuity::resolve(expired, false, ContinuityPolicy::Link),
            Continuity::Fresh {
                ended: None,
                previous: Some(SessionId::from_u64(7))
            }
        );
    }

    #[test]
    fn test_continuity_corrupt() {
        let continuity =
            Continuity::resolve(Err(TokenError::Corrupt), false, ContinuityPolicy::Link);
        assert_eq!(
            continuity,
            Continuity::Fresh {
                ended: None,
                previous: None
            }
        );
    }

    #[test]
    fn test_user_uuid() {
        let valid = "8a6b1c2e-0e0b-4f0a-9d3a-1f1d3c0b9a11";
        assert_eq!(user_uuid(Some(valid)), valid);

        let generated = user_uuid(Some("not-a-uuid"));
        assert_ne!(generated, "not-a-uuid");
        assert_eq!(Uuid::parse_str(&generated).unwrap().get_version_num(), 4);
        assert_eq!(user_uuid(None).len(), 36);
    }

    #[test]
    fn test_new_token() {
        let project = ProjectProfile {
            project_id: 1,
            project_key: "key".to_owned(),
            sample_rate: reel_sampling::SampleRate::ALL,
            max_session_duration: 60_000,
            beacon_size_limit: 1000,
            active: true,
        };

        let id = reel_ids::IdGenerator::new(0).mint_at(1_700_000_000_000).unwrap();
        let token = new_token(id, &project, Some(1_699_999_999_000));

        assert_eq!(token.delay(), 1_000);
        assert_eq!(token.expires_at(), 1_700_000_060_000);

        assert_eq!(new_token(id, &project, None).delay(), 0);
        assert_eq!(new_token(id, &project, Some(0)).delay(), 0);
    }
}
