use axum::RequestExt;
use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use reel_statsd::metric;

use crate::extractors::StartTime;
use crate::ingest::FailureCategory;
use crate::statsd::{ReelCounters, ReelTimers};

/// A middleware that counts and times requests per route.
///
/// Inserts the [`StartTime`] of the request. Use this with [`axum::middleware::from_fn`].
pub async fn metrics(mut request: Request, next: Next) -> Response {
    let start_time = StartTime::now();
    request.extensions_mut().insert(start_time);

    let matched_path = request.extract_parts::<MatchedPath>().await;
    let route = matched_path.as_ref().map_or("unknown", |m| m.as_str());

    let response = next.run(request).await;

    let category = response
        .extensions()
        .get::<FailureCategory>()
        .map_or("ok", |category| category.0);

    metric!(
        counter(ReelCounters::Requests) += 1,
        route = route,
        status = response.status().as_str(),
        category = category,
    );
    metric!(
        timer(ReelTimers::RequestsDuration) = start_time.into_inner().elapsed(),
        route = route,
        status = response.status().as_str(),
    );

    response
}
