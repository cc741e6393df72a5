//! Web server endpoints.
//!
//! This module contains implementations for all supported reel endpoints, as well as a generic
//! route configuration method.

mod health_check;
mod mobile;
mod statics;
mod web;

use axum::Router;
use axum::routing::{get, post};
use reel_config::Config;

use crate::middlewares;
use crate::service::ServiceState;

pub fn routes(_config: &Config) -> Router<ServiceState> {
    // Called from browsers, hence wrapped in CORS.
    #[rustfmt::skip]
    let web_routes = Router::new()
        .route("/v1/web/start", post(web::start))
        .route("/v1/web/i", post(web::push))
        .route("/v1/web/not-started", post(web::not_started))
        .route("/v1/web/feature-flags", post(web::feature_flags))
        .layer(middlewares::cors());

    #[rustfmt::skip]
    let mobile_routes = Router::new()
        .route("/v1/mobile/start", post(mobile::start))
        .route("/v1/mobile/i", post(mobile::push))
        .route("/v1/mobile/late", post(mobile::late_push))
        .route("/v1/mobile/images", post(mobile::images));

    Router::new()
        .route("/api/health", get(health_check::handle))
        .merge(web_routes)
        .merge(mobile_routes)
        .fallback(statics::not_found)
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    use crate::testutils::{TestServer, json_body};

    #[tokio::test]
    async fn test_health_check() {
        let server = TestServer::new();
        let request = Request::get("/api/health").body(Body::empty()).unwrap();

        let response = server.send(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            serde_json::json!({"is_healthy": true})
        );
    }

    #[tokio::test]
    async fn test_duplicate_slashes() {
        let server = TestServer::new();
        let request = Request::get("/api//health").body(Body::empty()).unwrap();

        let response = server.send(request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let server = TestServer::new();
        let request = Request::get("/v2/anything").body(Body::empty()).unwrap();

        let response = server.send(request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().contains_key(axum::http::header::SERVER));
        assert_eq!(json_body(response).await["category"], "not_found");
    }
}
