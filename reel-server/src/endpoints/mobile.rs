//! Endpoints called by the mobile SDKs.

use axum::Json;
use axum::extract::{Request, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use multer::{Constraints, Multipart, SizeLimit};
use reel_kafka::KafkaTopic;
use reel_log::LogError;
use reel_statsd::metric;
use serde::Deserialize;

use crate::constants::PLATFORM_MOBILE;
use crate::events::SessionStartEvent;
use crate::extractors::RequestMeta;
use crate::ingest::{self, Continuity, Failure, Ingest, IngestError, Stage, StartResponse};
use crate::service::ServiceState;
use crate::services::clients::{self, ClientFacts};
use crate::statsd::ReelCounters;

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
    project_key: Option<String>,
    #[serde(default)]
    reset: bool,
    #[serde(rename = "userOSVersion", default)]
    user_os_version: String,
    #[serde(default)]
    user_device: String,
    timezone: Option<String>,
    #[serde(rename = "userID")]
    user_id: Option<String>,
}

/// Combines the user agent of the SDK with the device reported in the body.
fn device_facts(agent: ClientFacts, request: &StartRequest) -> ClientFacts {
    let device = request.user_device.trim();
    ClientFacts {
        os: "iOS".to_owned(),
        os_version: request.user_os_version.trim().to_owned(),
        device: clients::map_ios_device(device).to_owned(),
        device_type: clients::ios_device_type(device).to_owned(),
        ..agent
    }
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
    let user_uuid = ingest::user_uuid(request.user_uuid.as_deref());

    let parsed = state
        .codec()
        .parse(request.token.as_deref().unwrap_or_default());

    let (ended, previous) =
        match Continuity::resolve(parsed, request.reset, config.continuity().mobile) {
            Continuity::Continue(token) => {
                metric!(
                    counter(ReelCounters::SessionContinued) += 1,
                    platform = PLATFORM_MOBILE
                );
                let settings = state.negotiation().get(token.id());
                return Ok(StartResponse::new(
                    state, &token, &project, user_uuid, settings,
                ));
            }
            Continuity::Fresh { ended, previous } => (ended, previous),
        };

    let agent = state
        .clients()
        .resolve(meta.user_agent())
        .ok_or_else(|| ingest.fail(Failure::UnrecognizedClient))?;
    let client = device_facts(agent, &request);
    let geo = state.geo().resolve(meta.client_ip());

    let id = ingest::admit_and_mint(state, ingest, &project, PLATFORM_MOBILE)?;
    // Mobile sessions carry no clock delay.
    let token = ingest::new_token(id, &project, None);

    let event = SessionStartEvent {
        session_id: id,
        project_id: project.project_id,
        platform: PLATFORM_MOBILE,
        timestamp: id.timestamp(),
        tracker_version: request.tracker_version,
        rev_id: request.rev_id,
        user_uuid: user_uuid.clone(),
        user_agent: meta.user_agent().unwrap_or_default().to_owned(),
        client: client.clone(),
        geo: geo.clone(),
        device_memory: None,
        js_heap_size_limit: None,
        timezone: request.timezone,
        user_id: request.user_id,
        previous_session_id: previous,
    };

    ingest::publish_start(state, ingest, KafkaTopic::RawMobile, &event, ended).await?;
    let settings = ingest::negotiate(state, &project, &token);

    let response = StartResponse::new(state, &token, &project, user_uuid, settings);
    Ok(response.with_facts(&client, &geo))
}

/// Starts or continues a mobile session.
pub async fn start(
    State(state): State<ServiceState>,
    meta: RequestMeta,
    request: Request,
) -> Response {
    let mut ingest = Ingest::new("/v1/mobile/start", meta.start_time());
    let timeout = state.config().request_timeout();
    let outcome = ingest::deadline(timeout, handle_start(&state, &meta, &mut ingest, request)).await;
    let result = outcome.unwrap_or_else(|| Err(ingest.fail(Failure::Timeout)));
    ingest.respond(result.map(Json))
}

async fn push_with(
    state: ServiceState,
    meta: RequestMeta,
    request: Request,
    route: &'static str,
    policy: ingest::TokenPolicy,
) -> Response {
    let mut ingest = Ingest::new(route, meta.start_time());
    let timeout = state.config().request_timeout();
    let work = ingest::push_batch(&state, &mut ingest, request, KafkaTopic::RawMobile, policy);
    let outcome = ingest::deadline(timeout, work).await;
    let result = outcome.unwrap_or_else(|| Err(ingest.fail(Failure::Timeout)));
    ingest.respond(result.map(|()| StatusCode::OK))
}

/// Accepts a batch of recorded events for a running session.
pub async fn push(
    State(state): State<ServiceState>,
    meta: RequestMeta,
    request: Request,
) -> Response {
    push_with(
        state,
        meta,
        request,
        "/v1/mobile/i",
        ingest::TokenPolicy::Strict,
    )
    .await
}

/// Accepts events a device buffered while offline, even after its session expired.
pub async fn late_push(
    State(state): State<ServiceState>,
    meta: RequestMeta,
    request: Request,
) -> Response {
    push_with(
        state,
        meta,
        request,
        "/v1/mobile/late",
        ingest::TokenPolicy::AcceptExpired,
    )
    .await
}

/// A file part of an image upload.
#[derive(Debug)]
struct Upload {
    filename: String,
    content_type: Option<String>,
    data: Bytes,
}

fn multipart_error(ingest: &Ingest, error: multer::Error, limit: usize) -> IngestError {
    match error {
        multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. } => {
            ingest.fail(Failure::TooLarge(limit))
        }
        error => ingest.fail(Failure::malformed(error)),
    }
}

fn boundary(ingest: &Ingest, parts: &Parts) -> Result<String, IngestError> {
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    multer::parse_boundary(content_type)
        .map_err(|error| ingest.fail(Failure::UnsupportedMedia(Box::new(error))))
}

async fn handle_images(
    state: &ServiceState,
    ingest: &mut Ingest,
    request: Request,
) -> Result<(), IngestError> {
    let (parts, body) = request.into_parts();
    let token = ingest::authorize(state, ingest, &parts, ingest::TokenPolicy::Strict)?;

    ingest.enter(Stage::AwaitingBody);
    let boundary = boundary(ingest, &parts)?;
    let limit = state.config().max_file_size();
    let constraints =
        Constraints::new().size_limit(SizeLimit::new().whole_stream(limit as u64));
    let mut multipart = Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

    ingest.enter(Stage::Parsing);
    let mut project_key = None;
    let mut uploads = Vec::new();
    let mut body_size = 0;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| multipart_error(ingest, error, limit))?
    {
        let name = field.name().unwrap_or_default().to_owned();
        let filename = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(ToString::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|error| multipart_error(ingest, error, limit))?;
        body_size += data.len();

        match filename {
            Some(filename) => uploads.push(Upload {
                filename,
                content_type,
                data,
            }),
            None if name == "projectKey" => {
                let key = String::from_utf8_lossy(&data).trim().to_owned();
                project_key = Some(key).filter(|key| !key.is_empty());
            }
            None => reel_log::trace!(field = %name, "ignoring form field"),
        }
    }

    ingest.set_body_size(body_size);
    let project_key =
        project_key.ok_or_else(|| ingest.fail(Failure::MissingField("projectKey")))?;

    ingest.enter(Stage::Executing);
    for upload in uploads {
        let key = format!("{project_key}/{}/{}", token.id(), upload.filename);
        let result = state
            .storage()
            .upload(&key, upload.content_type.as_deref(), upload.data)
            .await;

        if let Err(error) = result {
            reel_log::warn!("failed to upload image {key}: {}", LogError(&error));
            metric!(counter(ReelCounters::ImageUploadError) += 1);
        }
    }

    Ok(())
}

/// Stores screenshots captured by the mobile SDK.
pub async fn images(
    State(state): State<ServiceState>,
    meta: RequestMeta,
    request: Request,
) -> Response {
    let mut ingest = Ingest::new("/v1/mobile/images", meta.start_time());
    let timeout = state.config().request_timeout();
    let work = handle_images(&state, &mut ingest, request);
    let outcome = ingest::deadline(timeout, work).await;
    let result = outcome.unwrap_or_else(|| Err(ingest.fail(Failure::Timeout)));
    ingest.respond(result.map(|()| StatusCode::OK))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use chrono::Utc;
    use reel_auth::SessionToken;
    use serde_json::{Value, json};

    use super::*;
    use crate::services::queue::MessageKind;
    use crate::testutils::{IOS_UA, SAMPLED_KEY, TestServer, json_body};

    const BOUNDARY: &str = "reel-test-boundary";

    fn start_body() -> Value {
        json!({
            "projectKey": SAMPLED_KEY,
            "trackerVersion": "1.2.0",
            "timestamp": Utc::now().timestamp_millis(),
            "userOSVersion": "17.4",
            "userDevice": "iPhone14,2",
        })
    }

    fn token(server: &TestServer, expires_at: i64) -> String {
        let id = server.state.ids().mint().unwrap();
        server
            .state
            .codec()
            .compose(&SessionToken::new(id, 0, expires_at))
    }

    fn form(project_key: Option<&str>, files: &[(&str, &str)]) -> String {
        let mut body = String::new();
        if let Some(project_key) = project_key {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"projectKey\"\r\n\r\n{project_key}\r\n"
            ));
        }
        for (filename, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: image/jpeg\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body
    }

    fn upload(token: &str, content_type: &str, body: String) -> axum::http::Request<Body> {
        axum::http::Request::post("/v1/mobile/images")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    fn multipart_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }

    #[test]
    fn test_device_facts() {
        let request: StartRequest = serde_json::from_value(serde_json::json!({
            "projectKey": "key",
            "userOSVersion": "17.4",
            "userDevice": "iPad14,1",
        }))
        .unwrap();

        let agent = ClientFacts {
            browser: "CFNetwork".to_owned(),
            ..Default::default()
        };

        let facts = device_facts(agent, &request);
        assert_eq!(facts.os, "iOS");
        assert_eq!(facts.os_version, "17.4");
        assert_eq!(facts.device, "iPad mini (6th generation)");
        assert_eq!(facts.device_type, "tablet");
        assert_eq!(facts.browser, "CFNetwork");
    }

    #[tokio::test]
    async fn test_start_mobile_session() {
        let server = TestServer::new();
        let response = server
            .post_json("/v1/mobile/start", IOS_UA, start_body())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["delay"], 0);
        assert_eq!(body["userOS"], "iOS");
        assert_eq!(body["userDevice"], "iPhone 13 Pro");
        assert_eq!(body["beaconSizeLimit"], 4096);

        let messages = server.queue.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, KafkaTopic::RawMobile);
        assert_eq!(messages[0].1.kind, MessageKind::SessionStart);

        let started = server.sessions.started.lock();
        assert_eq!(started[0].platform, "mobile");
        assert_eq!(started[0].client.device_type, "mobile");
        assert_eq!(started[0].client.os_version, "17.4");
    }

    #[tokio::test]
    async fn test_start_continues_without_user_agent() {
        let server = TestServer::new();
        let response = server
            .post_json("/v1/mobile/start", IOS_UA, start_body())
            .await;
        let first = json_body(response).await;

        let mut body = start_body();
        body["token"] = first["token"].clone();
        let response = server.post_json("/v1/mobile/start", "", body).await;
        assert_eq!(response.status(), StatusCode::OK);

        let second = json_body(response).await;
        assert_eq!(second["sessionID"], first["sessionID"]);
        assert_eq!(server.queue.kinds(), [MessageKind::SessionStart]);
    }

    #[tokio::test]
    async fn test_late_push_accepts_expired_token() {
        let server = TestServer::new();
        let expired = token(&server, Utc::now().timestamp_millis() - 10_000);

        let response = server.push("/v1/mobile/late", &expired, "[1]").await;
        assert_eq!(response.status(), StatusCode::OK);

        let messages = server.queue.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, KafkaTopic::RawMobile);
        assert_eq!(messages[0].1.kind, MessageKind::Batch);
        let parsed = server.state.codec().parse(&expired).unwrap_err();
        assert_eq!(
            Some(messages[0].1.session_id),
            parsed.expired_token().map(|token| token.id())
        );
    }

    #[tokio::test]
    async fn test_push_rejects_expired_token() {
        let server = TestServer::new();
        let expired = token(&server, Utc::now().timestamp_millis() - 10_000);

        let response = server.push("/v1/mobile/i", &expired, "[1]").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = server.push("/v1/mobile/late", "garbage", "[1]").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert!(server.queue.messages().is_empty());
    }

    #[tokio::test]
    async fn test_image_upload() {
        let server = TestServer::new();
        let valid = token(&server, Utc::now().timestamp_millis() + 60_000);
        let id = server.state.codec().parse(&valid).unwrap().id();

        let body = form(Some(SAMPLED_KEY), &[("1.jpeg", "first"), ("2.jpeg", "second")]);
        let response = server.send(upload(&valid, &multipart_type(), body)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let objects = server.storage.objects.lock();
        assert_eq!(objects.len(), 2);
        assert_eq!(&objects[&format!("{SAMPLED_KEY}/{id}/1.jpeg")][..], b"first");
        assert_eq!(&objects[&format!("{SAMPLED_KEY}/{id}/2.jpeg")][..], b"second");
    }

    #[tokio::test]
    async fn test_image_upload_failure_is_not_fatal() {
        let server = TestServer::new();
        let valid = token(&server, Utc::now().timestamp_millis() + 60_000);

        let body = form(Some(SAMPLED_KEY), &[("../escape.jpeg", "bad"), ("ok.jpeg", "good")]);
        let response = server.send(upload(&valid, &multipart_type(), body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(server.storage.objects.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_image_upload_rejections() {
        let server = TestServer::new();
        let valid = token(&server, Utc::now().timestamp_millis() + 60_000);

        let body = form(None, &[("1.jpeg", "first")]);
        let response = server.send(upload(&valid, &multipart_type(), body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["category"], "missing_field");

        let body = form(Some(SAMPLED_KEY), &[("1.jpeg", "first")]);
        let response = server.send(upload(&valid, "application/json", body)).await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let body = form(Some(SAMPLED_KEY), &[("1.jpeg", "first")]);
        let response = server.send(upload("garbage", &multipart_type(), body)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert!(server.storage.objects.lock().is_empty());
    }
}
