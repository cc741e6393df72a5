//! Endpoints called by the browser tracker.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::Utc;
use reel_kafka::KafkaTopic;
use reel_log::LogError;
use reel_statsd::metric;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::constants::PLATFORM_WEB;
use crate::events::{SessionStartEvent, UnstartedSession};
use crate::extractors::RequestMeta;
use crate::ingest::{self, Continuity, Failure, Ingest, IngestError, Stage, StartResponse};
use crate::service::ServiceState;
use crate::services::flags::{FeatureFlagsRequest, FlagValue};
use crate::statsd::ReelCounters;

/// Trackers from this version on report a start time that is unreliable for ordering, so the
/// server's start time is recorded instead.
const SERVER_TIMESTAMP_SINCE: Version = Version::new(4, 1, 6);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    token: Option<String>,
    #[serde(rename = "userUUID")]
    user_uuid: Option<String>,
    #[serde(default)]
    tracker_version: String,
    #[serde(rename = "revID")]
    rev_id: Option<String>,
    timestamp: Option<i64>,
    project_key: Option<String>,
    #[serde(default)]
    reset: bool,
    device_memory: Option<u64>,
    js_heap_size_limit: Option<u64>,
    timezone: Option<String>,
    #[serde(rename = "userID")]
    user_id: Option<String>,
}

fn uses_server_timestamp(tracker_version: &str) -> bool {
    Version::parse(tracker_version.trim()).is_ok_and(|version| version >= SERVER_TIMESTAMP_SINCE)
}

async fn handle_start(
    state: &ServiceState,
    meta: &RequestMeta,
    ingest: &mut Ingest,
    request: Request,
) -> Result<StartResponse, IngestError> {
    let config = state.config();
    let (parts, body) = request.into_parts();
    let request: StartRequest = ingest
        .read_json(
            &parts.headers,
            body,
            config.max_json_size(),
            config.max_decompressed_factor(),
        )
        .await?;

    let project_key = ingest::require_project_key(ingest, request.project_key.as_deref())?;

    ingest.enter(Stage::ResolvingContinuity);
    let project = ingest::resolve_project(state, ingest, project_key).await?;
    let client = state
        .clients()
        .resolve(meta.user_agent())
        .ok_or_else(|| ingest.fail(Failure::UnrecognizedClient))?;
    let geo = state.geo().resolve(meta.client_ip());
    let user_uuid = ingest::user_uuid(request.user_uuid.as_deref());

    let parsed = state
        .codec()
        .parse(request.token.as_deref().unwrap_or_default());

    let (ended, previous) = match Continuity::resolve(parsed, request.reset, config.continuity().web)
    {
        Continuity::Continue(token) => {
            metric!(
                counter(ReelCounters::SessionContinued) += 1,
                platform = PLATFORM_WEB
            );
            let settings = state.negotiation().get(token.id());
            let response = StartResponse::new(state, &token, &project, user_uuid, settings);
            return Ok(response.with_facts(&client, &geo));
        }
        Continuity::Fresh { ended, previous } => (ended, previous),
    };

    let id = ingest::admit_and_mint(state, ingest, &project, PLATFORM_WEB)?;
    let token = ingest::new_token(id, &project, request.timestamp);

    let timestamp = match request.timestamp {
        Some(timestamp) if timestamp > 0 && !uses_server_timestamp(&request.tracker_version) => {
            timestamp
        }
        _ => id.timestamp(),
    };

    let event = SessionStartEvent {
        session_id: id,
        project_id: project.project_id,
        platform: PLATFORM_WEB,
        timestamp,
        tracker_version: request.tracker_version,
        rev_id: request.rev_id,
        user_uuid: user_uuid.clone(),
        user_agent: meta.user_agent().unwrap_or_default().to_owned(),
        client: client.clone(),
        geo: geo.clone(),
        device_memory: request.device_memory,
        js_heap_size_limit: request.js_heap_size_limit,
        timezone: request.timezone,
        user_id: request.user_id,
        previous_session_id: previous,
    };

    ingest::publish_start(state, ingest, KafkaTopic::RawWeb, &event, ended).await?;
    let settings = ingest::negotiate(state, &project, &token);

    let response = StartResponse::new(state, &token, &project, user_uuid, settings);
    Ok(response.with_facts(&client, &geo))
}

/// Starts or continues a browser session.
pub async fn start(
    State(state): State<ServiceState>,
    meta: RequestMeta,
    request: Request,
) -> Response {
    let mut ingest = Ingest::new("/v1/web/start", meta.start_time());
    let timeout = state.config().request_timeout();
    let outcome = ingest::deadline(timeout, handle_start(&state, &meta, &mut ingest, request)).await;
    let result = outcome.unwrap_or_else(|| Err(ingest.fail(Failure::Timeout)));
    ingest.respond(result.map(Json))
}

/// Accepts a batch of recorded events for a running session.
pub async fn push(
    State(state): State<ServiceState>,
    meta: RequestMeta,
    request: Request,
) -> Response {
    let mut ingest = Ingest::new("/v1/web/i", meta.start_time());
    let timeout = state.config().request_timeout();
    let work = ingest::push_batch(
        &state,
        &mut ingest,
        request,
        KafkaTopic::RawWeb,
        ingest::TokenPolicy::Strict,
    );
    let outcome = ingest::deadline(timeout, work).await;
    let result = outcome.unwrap_or_else(|| Err(ingest.fail(Failure::Timeout)));
    ingest.respond(result.map(|()| StatusCode::OK))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotStartedRequest {
    project_key: Option<String>,
    #[serde(default)]
    tracker_version: String,
    #[serde(default)]
    do_not_track: bool,
}

async fn handle_not_started(
    state: &ServiceState,
    meta: &RequestMeta,
    ingest: &mut Ingest,
    request: Request,
) -> Result<(), IngestError> {
    let config = state.config();
    let (parts, body) = request.into_parts();
    let request: NotStartedRequest = ingest
        .read_json(
            &parts.headers,
            body,
            config.max_json_size(),
            config.max_decompressed_factor(),
        )
        .await?;

    let project_key = ingest::require_project_key(ingest, request.project_key.as_deref())?;

    ingest.enter(Stage::Executing);
    let session = UnstartedSession {
        project_key: project_key.to_owned(),
        platform: PLATFORM_WEB,
        tracker_version: request.tracker_version,
        do_not_track: request.do_not_track,
        user_agent: meta.user_agent().unwrap_or_default().to_owned(),
        client: state.clients().resolve(meta.user_agent()).unwrap_or_default(),
        geo: state.geo().resolve(meta.client_ip()),
        timestamp: Utc::now().timestamp_millis(),
    };

    if let Err(error) = state.sessions().add_unstarted(&session).await {
        reel_log::error!("failed to store unstarted session: {}", LogError(&error));
        metric!(
            counter(ReelCounters::SessionStoreError) += 1,
            kind = "unstarted"
        );
    }

    Ok(())
}

/// Records a tracker that loaded but did not start recording.
pub async fn not_started(
    State(state): State<ServiceState>,
    meta: RequestMeta,
    request: Request,
) -> Response {
    let mut ingest = Ingest::new("/v1/web/not-started", meta.start_time());
    let timeout = state.config().request_timeout();
    let work = handle_not_started(&state, &meta, &mut ingest, request);
    let outcome = ingest::deadline(timeout, work).await;
    let result = outcome.unwrap_or_else(|| Err(ingest.fail(Failure::Timeout)));
    ingest.respond(result.map(|()| StatusCode::OK))
}

#[derive(Debug, Serialize)]
struct FeatureFlagsResponse {
    flags: Vec<FlagValue>,
}

async fn handle_feature_flags(
    state: &ServiceState,
    ingest: &mut Ingest,
    request: Request,
) -> Result<FeatureFlagsResponse, IngestError> {
    let config = state.config();
    let (parts, body) = request.into_parts();
    ingest::authorize(state, ingest, &parts, ingest::TokenPolicy::Strict)?;

    let request: FeatureFlagsRequest = ingest
        .read_json(
            &parts.headers,
            body,
            config.max_json_size(),
            config.max_decompressed_factor(),
        )
        .await?;

    ingest.enter(Stage::Executing);
    let flags = state
        .flags()
        .compute_flags_for_session(&request)
        .await
        .map_err(|error| ingest.fail(Failure::internal(error)))?;

    Ok(FeatureFlagsResponse { flags })
}

/// Computes the feature flags of a running session.
pub async fn feature_flags(
    State(state): State<ServiceState>,
    meta: RequestMeta,
    request: Request,
) -> Response {
    let mut ingest = Ingest::new("/v1/web/feature-flags", meta.start_time());
    let timeout = state.config().request_timeout();
    let work = handle_feature_flags(&state, &mut ingest, request);
    let outcome = ingest::deadline(timeout, work).await;
    let result = outcome.unwrap_or_else(|| Err(ingest.fail(Failure::Timeout)));
    ingest.respond(result.map(Json))
}
