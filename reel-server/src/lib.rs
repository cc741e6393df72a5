//! The Reel server, the front door of the session replay pipeline.
//!
//! Browsers and mobile SDKs open a session at a start endpoint and then stream batches of
//! recorded events for it. For every request, Reel decides whether it belongs to a new or a
//! running session:
//!
//! - A start request without a valid token passes the per-project sampling gate, receives a
//!   freshly minted, time-ordered [`SessionId`](reel_ids::SessionId) and a signed token that
//!   the client echoes on every subsequent request. A start event is stored and enqueued.
//! - A start request with a valid token continues its session without side effects.
//! - Push requests are authorized by their token and forwarded unmodified to the queue, keyed
//!   by the session id.
//!
//! # Request lifecycle
//!
//! All ingestion endpoints are driven by the state machine in the `ingest` module. It reads the
//! body up to a ceiling, inflates it, parses it, resolves the session and finally executes the
//! side effects. Failures map to a stable category and exactly one response status.
//!
//! # Collaborators
//!
//! Project lookup, client and geo resolution, session persistence, feature flags, object
//! storage and the message queue are reached through narrow traits in the `services` module.
//! The implementations shipped here are driven by the configuration; the Kafka queue requires
//! the `processing` feature.
#![doc(
    html_logo_url = "https://raw.githubusercontent.com/reel-replay/reel/master/artwork/reel-icon.png",
    html_favicon_url = "https://raw.githubusercontent.com/reel-replay/reel/master/artwork/reel-icon.png"
)]

mod constants;
mod endpoints;
mod events;
mod extractors;
mod ingest;
mod middlewares;
mod service;
mod services;
mod statsd;
mod utils;

#[cfg(test)]
mod testutils;

use std::sync::Arc;

use anyhow::Context;
use reel_config::Config;
use tokio::sync::Notify;

pub use self::service::ServiceError;
pub use self::services::server::ServerError;

use self::service::ServiceState;
use self::services::server::HttpServer;

/// Runs the Reel web server.
///
/// This boots the entire server application. It blocks the current thread until a shutdown
/// signal is received or a fatal error happens. Behavior of the server is determined by the
/// `config` passed into this function.
pub fn run(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);
    reel_log::info!("reel server starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("reel-worker")
        .enable_all()
        .build()
        .context("failed to start the tokio runtime")?;

    runtime.block_on(async move {
        let state = ServiceState::start(config.clone()).context("failed to start services")?;
        let server = HttpServer::bind(state.clone()).context("failed to bind the http server")?;

        let stop = Arc::new(Notify::new());
        let notified = stop.clone();
        let mut handle = tokio::spawn(server.run(async move { notified.notified().await }));

        let signaled = tokio::select! {
            result = &mut handle => {
                result.context("http server panicked")??;
                false
            }
            () = shutdown_signal() => true,
        };

        if signaled {
            reel_log::info!("received shutdown signal");
            stop.notify_one();

            let timeout = config.shutdown_timeout();
            match tokio::time::timeout(timeout, handle).await {
                Ok(result) => result.context("http server panicked")??,
                Err(_) => reel_log::warn!("requests still in flight after {timeout:?}, stopping"),
            }
        }

        state.shutdown(config.shutdown_timeout());
        reel_log::info!("reel server stopped");
        Ok::<_, anyhow::Error>(())
    })
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            reel_log::error!("failed to listen for ctrl-c: {}", reel_log::LogError(&error));
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    () = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(error) => {
                reel_log::error!("failed to listen for SIGTERM: {}", reel_log::LogError(&error));
                ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
