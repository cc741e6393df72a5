use std::convert::Infallible;
use std::time::Instant;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// The time at which the request started.
///
/// Inserted by the [`metrics`](crate::middlewares::metrics) middleware. Falls back to the time of
/// extraction when the middleware is not installed.
#[derive(Clone, Copy, Debug)]
pub struct StartTime(Instant);

impl StartTime {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    /// Returns the `Instant` of this start time.
    #[inline]
    pub fn into_inner(self) -> Instant {
        self.0
    }
}

impl<S> FromRequestParts<S> for StartTime
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<StartTime>()
            .copied()
            .unwrap_or_else(StartTime::now))
    }
}
