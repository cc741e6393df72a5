//! The ingestion state machine shared by all session endpoints.
//!
//! Every ingestion request walks through the same [`Stage`]s:
//!
//! ```text
//! AwaitingBody -> Decompressing -> Parsing -> ResolvingContinuity -> Executing -> Responding
//! ```
//!
//! Push endpoints resolve their token before the body is read, since the body ceiling depends on
//! the settings negotiated for the session. Any stage may fail with a [`Failure`], which maps to
//! exactly one response status. Every response, successful or not, carries the elapsed time and
//! the body size in the [`ELAPSED_HEADER`] and [`BODY_SIZE_HEADER`] headers.

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reel_auth::TokenError;
use reel_statsd::metric;
use serde::de::DeserializeOwned;

use crate::constants::{BODY_SIZE_HEADER, ELAPSED_HEADER};
use crate::extractors::StartTime;
use crate::statsd::ReelDistributions;
use crate::utils::{self, ApiErrorResponse, DecodeError, HttpEncoding};

mod push;
mod start;

pub use self::push::*;
pub use self::start::*;

/// The stage of an ingestion request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    AwaitingBody,
    Decompressing,
    Parsing,
    ResolvingContinuity,
    Executing,
    Responding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingBody => "awaiting_body",
            Self::Decompressing => "decompressing",
            Self::Parsing => "parsing",
            Self::ResolvingContinuity => "resolving_continuity",
            Self::Executing => "executing",
            Self::Responding => "responding",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an ingestion request failed.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error("request body is empty")]
    EmptyBody,
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("malformed request body")]
    Malformed(#[source] Box<dyn Error + Send + Sync>),
    #[error("missing project key")]
    MissingProjectKey,
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("project does not exist or is not active")]
    UnknownProject,
    #[error("client is not recognized")]
    UnrecognizedClient,
    #[error("session is not sampled")]
    NotSampled,
    #[error("invalid session token")]
    Unauthorized(#[source] TokenError),
    #[error("unsupported media type")]
    UnsupportedMedia(#[source] Box<dyn Error + Send + Sync>),
    #[error("request timed out")]
    Timeout,
    #[error("internal error")]
    Internal(#[source] Box<dyn Error + Send + Sync>),
}

impl Failure {
    /// The response status of this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EmptyBody => StatusCode::BAD_REQUEST,
            Self::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Malformed(_) => StatusCode::BAD_REQUEST,
            Self::MissingProjectKey => StatusCode::FORBIDDEN,
            Self::MissingField(_) => StatusCode::BAD_REQUEST,
            Self::UnknownProject => StatusCode::NOT_FOUND,
            Self::UnrecognizedClient => StatusCode::FORBIDDEN,
            Self::NotSampled => StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Timeout => StatusCode::REQUEST_TIMEOUT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable name of this failure for responses and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::EmptyBody => "empty_body",
            Self::TooLarge(_) => "too_large",
            Self::Malformed(_) => "malformed",
            Self::MissingProjectKey | Self::MissingField(_) => "missing_field",
            Self::UnknownProject => "unknown_project",
            Self::UnrecognizedClient => "unrecognized_client",
            Self::NotSampled => "not_sampled",
            Self::Unauthorized(_) => "unauthorized",
            Self::UnsupportedMedia(_) => "unsupported_media",
            Self::Timeout => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Wraps any error as [`Failure::Internal`].
    pub fn internal(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Internal(Box::new(error))
    }

    /// Wraps any error as [`Failure::Malformed`].
    pub fn malformed(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Malformed(Box::new(error))
    }
}

impl From<DecodeError> for Failure {
    fn from(error: DecodeError) -> Self {
        match error {
            DecodeError::Overflow(limit) => Self::TooLarge(limit),
            error => Self::malformed(error),
        }
    }
}

/// A [`Failure`] and the stage it occurred in.
#[derive(Debug)]
pub struct IngestError {
    stage: Stage,
    failure: Failure,
}

impl IngestError {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn failure(&self) -> &Failure {
        &self.failure
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (while {})", self.failure, self.stage)
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.failure)
    }
}

/// Response extension carrying the [`Failure::category`] of a failed request.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FailureCategory(pub &'static str);

/// Runs `work` with a deadline.
///
/// Returns `None` if the deadline passed. The caller then fails the request with
/// [`Failure::Timeout`] at the stage that was reached.
pub async fn deadline<T>(
    timeout: Duration,
    work: impl Future<Output = Result<T, IngestError>>,
) -> Option<Result<T, IngestError>> {
    tokio::time::timeout(timeout, work).await.ok()
}

/// Drives a single ingestion request.
#[derive(Debug)]
pub struct Ingest {
    route: &'static str,
    start_time: StartTime,
    stage: Stage,
    body_size: usize,
}

impl Ingest {
    pub fn new(route: &'static str, start_time: StartTime) -> Self {
        Self {
            route,
            start_time,
            stage: Stage::AwaitingBody,
            body_size: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Moves the request to the given stage.
    pub fn enter(&mut self, stage: Stage) {
        reel_log::trace!(route = self.route, stage = stage.as_str(), "ingest stage");
        self.stage = stage;
    }

    /// Fails the request at the current stage.
    pub fn fail(&self, failure: Failure) -> IngestError {
        IngestError {
            stage: self.stage,
            failure,
        }
    }

    /// Records the size of the request body reported in the response.
    pub fn set_body_size(&mut self, size: usize) {
        self.body_size = size;
    }

    /// Reads the complete body, failing with [`Failure::TooLarge`] beyond `ceiling` bytes.
    ///
    /// An empty body fails with [`Failure::EmptyBody`].
    pub async fn read_body(
        &mut self,
        headers: &HeaderMap,
        body: Body,
        ceiling: usize,
    ) -> Result<Bytes, IngestError> {
        self.enter(Stage::AwaitingBody);

        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());

        if declared.is_some_and(|length| length > ceiling) {
            return Err(self.fail(Failure::TooLarge(ceiling)));
        }

        let mut buffer = BytesMut::with_capacity(declared.unwrap_or(0));
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|error| self.fail(Failure::malformed(error)))?;
            if buffer.len() + chunk.len() > ceiling {
                return Err(self.fail(Failure::TooLarge(ceiling)));
            }
            buffer.extend_from_slice(&chunk);
        }

        self.body_size = buffer.len();
        if buffer.is_empty() {
            return Err(self.fail(Failure::EmptyBody));
        }

        Ok(buffer.freeze())
    }

    /// Inflates the body according to its `Content-Encoding`.
    ///
    /// The inflated body may be at most `ceiling * factor` bytes.
    pub fn decompress(
        &mut self,
        headers: &HeaderMap,
        body: Bytes,
        ceiling: usize,
        factor: usize,
    ) -> Result<Bytes, IngestError> {
        self.enter(Stage::Decompressing);

        let encoding = HttpEncoding::from_headers(headers)
            .map_err(|error| self.fail(Failure::malformed(error)))?;

        if encoding == HttpEncoding::Identity {
            return Ok(body);
        }

        let decoded = utils::decode(encoding, body, ceiling.saturating_mul(factor))
            .map_err(|error| self.fail(error.into()))?;

        self.body_size = decoded.len();
        Ok(decoded)
    }

    /// Reads, inflates and parses a JSON body.
    pub async fn read_json<T: DeserializeOwned>(
        &mut self,
        headers: &HeaderMap,
        body: Body,
        ceiling: usize,
        factor: usize,
    ) -> Result<T, IngestError> {
        let body = self.read_body(headers, body, ceiling).await?;
        let body = self.decompress(headers, body, ceiling, factor)?;

        self.enter(Stage::Parsing);
        serde_json::from_slice(&body).map_err(|error| self.fail(Failure::malformed(error)))
    }

    /// Builds the response of the request and attaches the timing headers.
    pub fn respond<R: IntoResponse>(mut self, result: Result<R, IngestError>) -> Response {
        self.enter(Stage::Responding);

        let mut response = match result {
            Ok(response) => response.into_response(),
            Err(error) => self.error_response(error),
        };

        metric!(
            distribution(ReelDistributions::RequestsBodySize) = self.body_size as u64,
            route = self.route,
        );

        let elapsed = self.start_time.into_inner().elapsed().as_millis();
        let headers = response.headers_mut();
        headers.insert(ELAPSED_HEADER, HeaderValue::from(elapsed as u64));
        headers.insert(BODY_SIZE_HEADER, HeaderValue::from(self.body_size));
        response
    }

    fn error_response(&self, error: IngestError) -> Response {
        let failure = &error.failure;
        if failure.status().is_server_error() {
            reel_log::error!(
                error = &error as &dyn Error,
                route = self.route,
                "failed to handle request"
            );
        } else {
            reel_log::debug!(
                error = &error as &dyn Error,
                route = self.route,
                "rejected request"
            );
        }

        let payload = ApiErrorResponse::from_error(failure).with_category(failure.category());
        let mut response = (failure.status(), payload).into_response();
        response
            .extensions_mut()
            .insert(FailureCategory(failure.category()));
        response
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn gzip(data: &[u8]) -> Bytes {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap().into()
    }

    fn ingest() -> Ingest {
        Ingest::new("/test", StartTime::now())
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(Failure::EmptyBody.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Failure::TooLarge(1).status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(Failure::MissingProjectKey.status(), StatusCode::FORBIDDEN);
        assert_eq!(Failure::UnknownProject.status(), StatusCode::NOT_FOUND);
        assert_eq!(Failure::NotSampled.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            Failure::Unauthorized(TokenError::Corrupt).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(Failure::Timeout.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_read_body_limit() {
        let mut ingest = ingest();
        let result = ingest
            .read_body(&HeaderMap::new(), Body::from("0123456789"), 4)
            .await;

        let error = result.unwrap_err();
        assert!(matches!(error.failure(), Failure::TooLarge(4)));
        assert_eq!(error.stage(), Stage::AwaitingBody);
    }

    #[tokio::test]
    async fn test_read_body_declared_length() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(1000u32));

        let mut ingest = ingest();
        let result = ingest.read_body(&headers, Body::from("{}"), 100).await;
        assert!(matches!(result.unwrap_err().failure(), Failure::TooLarge(100)));
    }

    #[tokio::test]
    async fn test_read_empty_body() {
        let mut ingest = ingest();
        let result = ingest.read_body(&HeaderMap::new(), Body::empty(), 100).await;
        assert!(matches!(result.unwrap_err().failure(), Failure::EmptyBody));
    }

    #[tokio::test]
    async fn test_read_gzip_json() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let mut ingest = ingest();
        let value: serde_json::Value = ingest
            .read_json(&headers, Body::from(gzip(b"{\"a\":1}")), 1024, 10)
            .await
            .unwrap();

        assert_eq!(value, serde_json::json!({"a": 1}));
        assert_eq!(ingest.stage(), Stage::Parsing);
    }

    #[tokio::test]
    async fn test_decompression_bomb() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let body = gzip(&[b' '; 10_000]);
        assert!(body.len() < 100);

        let mut ingest = ingest();
        let result = ingest
            .read_json::<serde_json::Value>(&headers, Body::from(body), 100, 10)
            .await;

        let error = result.unwrap_err();
        assert!(matches!(error.failure(), Failure::TooLarge(1000)));
        assert_eq!(error.stage(), Stage::Decompressing);
    }

    #[tokio::test]
    async fn test_unknown_encoding_is_malformed() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("lzma"));

        let mut ingest = ingest();
        let result = ingest
            .read_json::<serde_json::Value>(&headers, Body::from("{}"), 100, 10)
            .await;
        assert!(matches!(result.unwrap_err().failure(), Failure::Malformed(_)));
    }

    #[tokio::test]
    async fn test_error_response_headers() {
        let ingest = ingest();
        let error = ingest.fail(Failure::NotSampled);
        let response = ingest.respond::<()>(Err(error));

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().contains_key(ELAPSED_HEADER));
        assert_eq!(response.headers()[BODY_SIZE_HEADER], "0");
        assert_eq!(
            response.extensions().get::<FailureCategory>(),
            Some(&FailureCategory("not_sampled"))
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["category"], "not_sampled");
        assert_eq!(payload["detail"], "session is not sampled");
    }
}
