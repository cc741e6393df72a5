//! Middlewares for the HTTP server.
//!
//! This module exposes tower [layers](tower::Layer) and related utilities to configure the axum
//! HTTP server. Most of the middlewares are registered as a layer on the
//! [`Router`](axum::Router), see [`make_app`](crate::services::server::make_app).

mod cors;
mod handle_panic;
mod metrics;
mod normalize_path;
mod trace;

pub use self::cors::*;
pub use self::handle_panic::*;
pub use self::metrics::*;
pub use self::normalize_path::*;
pub use self::trace::*;
