use axum::extract::Request;
use axum::http::request::Parts;
use reel_auth::{SessionToken, TokenError};
use reel_kafka::KafkaTopic;

use crate::ingest::{Failure, Ingest, IngestError, Stage, enqueue};
use crate::service::ServiceState;
use crate::services::queue::{MessageKind, QueueMessage};

/// Whether an endpoint accepts expired tokens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenPolicy {
    /// Only valid tokens are accepted.
    Strict,
    /// Expired tokens are accepted, for events buffered on the device.
    AcceptExpired,
}

/// Reads and verifies the session token of a request.
pub fn authorize(
    state: &ServiceState,
    ingest: &mut Ingest,
    parts: &Parts,
    policy: TokenPolicy,
) -> Result<SessionToken, IngestError> {
    ingest.enter(Stage::ResolvingContinuity);

    match state.codec().parse_from_request(parts) {
        Ok(token) => Ok(token),
        Err(TokenError::Expired(token)) if policy == TokenPolicy::AcceptExpired => {
            reel_log::trace!(session_id = %token.id(), "accepting expired token");
            Ok(token)
        }
        Err(error) => Err(ingest.fail(Failure::Unauthorized(error))),
    }
}

/// Forwards a batch of recorded events to the queue.
///
/// The body ceiling is the beacon size negotiated for the session. The inflated batch is
/// forwarded unmodified.
pub async fn push_batch(
    state: &ServiceState,
    ingest: &mut Ingest,
    request: Request,
    topic: KafkaTopic,
    policy: TokenPolicy,
) -> Result<(), IngestError> {
    let (parts, body) = request.into_parts();
    let token = authorize(state, ingest, &parts, policy)?;

    let ceiling = state.negotiation().get(token.id()).beacon_size_limit;
    let factor = state.config().max_decompressed_factor();
    let batch = ingest.read_body(&parts.headers, body, ceiling).await?;
    let batch = ingest.decompress(&parts.headers, batch, ceiling, factor)?;

    ingest.enter(Stage::Executing);
    enqueue(
        state,
        topic,
        QueueMessage::new(token.id(), MessageKind::Batch, batch),
    );

    Ok(())
}
