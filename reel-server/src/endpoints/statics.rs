use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::utils::ApiErrorResponse;

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        ApiErrorResponse::with_detail("not found").with_category("not_found"),
    )
}
