//! A simple healthcheck endpoint for the server.

use axum::Json;
use axum::response::IntoResponse;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Status {
    is_healthy: bool,
}

/// Reports that this instance accepts requests.
pub async fn handle() -> impl IntoResponse {
    Json(Status { is_healthy: true })
}
