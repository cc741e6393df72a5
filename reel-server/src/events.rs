//! Records describing the lifecycle of a session.
//!
//! These are persisted by the [`SessionStore`](crate::services::sessions::SessionStore) and
//! serialized to JSON when handed to the queue.

use reel_ids::SessionId;
use serde::Serialize;

use crate::services::clients::ClientFacts;
use crate::services::geo::GeoFacts;

/// Emitted when a new session is minted.
#[derive(Clone, Debug, Serialize)]
pub struct SessionStartEvent {
    pub session_id: SessionId,
    pub project_id: u64,
    /// Either `web` or `mobile`.
    pub platform: &'static str,
    /// Start of the session in unix milliseconds.
    pub timestamp: i64,
    pub tracker_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev_id: Option<String>,
    pub user_uuid: String,
    pub user_agent: String,
    pub client: ClientFacts,
    pub geo: GeoFacts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_memory: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub js_heap_size_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The expired session this one continues, if the deployment links sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<SessionId>,
}

/// Emitted for the old session when a client explicitly resets its session.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct SessionEndEvent {
    pub session_id: SessionId,
    pub timestamp: i64,
}

/// A client that loaded the tracker but never started recording.
#[derive(Clone, Debug, Serialize)]
pub struct UnstartedSession {
    pub project_key: String,
    pub platform: &'static str,
    pub tracker_version: String,
    pub do_not_track: bool,
    pub user_agent: String,
    pub client: ClientFacts,
    pub geo: GeoFacts,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_start_event() {
        let event = SessionStartEvent {
            session_id: SessionId::from_u64(42),
            project_id: 7,
            platform: "web",
            timestamp: 1_700_000_000_000,
            tracker_version: "4.1.6".to_owned(),
            rev_id: None,
            user_uuid: "8a6b1c2e-0e0b-4f0a-9d3a-1f1d3c0b9a11".to_owned(),
            user_agent: String::new(),
            client: ClientFacts::default(),
            geo: GeoFacts::unknown(),
            device_memory: None,
            js_heap_size_limit: None,
            timezone: None,
            user_id: None,
            previous_session_id: None,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["session_id"], 42);
        assert_eq!(json["geo"]["country"], "UN");
        assert!(json.get("previous_session_id").is_none());
        assert!(json.get("rev_id").is_none());
    }
}
