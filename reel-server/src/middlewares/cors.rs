use std::time::Duration;

use axum::http::{HeaderName, Method};
use tower_http::cors::CorsLayer;

use crate::constants::{BODY_SIZE_HEADER, ELAPSED_HEADER};

/// Creates the CORS middleware for endpoints called from browsers.
///
/// Allows POST from any origin and exposes the timing headers of ingestion responses.
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_methods(Method::POST)
        .allow_headers([
            HeaderName::from_static("x-requested-with"),
            HeaderName::from_static("origin"),
            HeaderName::from_static("referer"),
            HeaderName::from_static("accept"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-encoding"),
        ])
        .allow_origin(tower_http::cors::Any)
        .expose_headers([
            HeaderName::from_static(ELAPSED_HEADER),
            HeaderName::from_static(BODY_SIZE_HEADER),
        ])
        .max_age(Duration::from_secs(3600))
}
