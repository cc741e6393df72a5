use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
pub use tower_http::catch_panic::CatchPanicLayer;

use crate::ingest::FailureCategory;
use crate::utils::ApiErrorResponse;

/// Handler function for the [`CatchPanicLayer`] middleware.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "no error details"
    };

    reel_log::error!("panic in web handler: {detail}");

    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        ApiErrorResponse::with_detail(detail).with_category("internal"),
    )
        .into_response();

    response.extensions_mut().insert(FailureCategory("internal"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payloads() {
        let response = handle_panic(Box::new("static message"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = handle_panic(Box::new(42u32));
        assert_eq!(
            response.extensions().get::<FailureCategory>(),
            Some(&FailureCategory("internal"))
        );
    }
}
