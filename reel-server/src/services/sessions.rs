use std::error::Error;
use std::fmt;

use async_trait::async_trait;

use crate::events::{SessionStartEvent, UnstartedSession};

/// A session record could not be written.
#[derive(Debug, thiserror::Error)]
#[error("failed to store session record")]
pub struct SessionStoreError(#[source] pub Box<dyn Error + Send + Sync>);

/// Durable storage of session records.
///
/// Writes are best-effort from the point of view of the client: failures are logged and counted
/// but never fail a request.
#[async_trait]
pub trait SessionStore: Send + Sync + fmt::Debug {
    /// Records a newly minted session.
    async fn add(&self, event: &SessionStartEvent) -> Result<(), SessionStoreError>;

    /// Records a client that never started recording.
    async fn add_unstarted(&self, session: &UnstartedSession) -> Result<(), SessionStoreError>;
}

/// Drops all records. Used when no database is attached to this instance.
#[derive(Debug, Default)]
pub struct DiscardSessionStore;

#[async_trait]
impl SessionStore for DiscardSessionStore {
    async fn add(&self, event: &SessionStartEvent) -> Result<(), SessionStoreError> {
        reel_log::trace!(session_id = %event.session_id, "discarding session record");
        Ok(())
    }

    async fn add_unstarted(&self, session: &UnstartedSession) -> Result<(), SessionStoreError> {
        reel_log::trace!(project_key = %session.project_key, "discarding unstarted session");
        Ok(())
    }
}
