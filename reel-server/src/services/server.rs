use std::future::Future;
use std::net::SocketAddr;

use axum::ServiceExt;
use axum::extract::Request;
use axum::http::{HeaderValue, header};
use tokio::net::{TcpListener, TcpSocket};
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::constants;
use crate::endpoints;
use crate::middlewares::{self, CatchPanicLayer, NormalizePath};
use crate::service::ServiceState;

/// Backlog of pending connections on the listening socket.
const LISTEN_BACKLOG: u32 = 1024;

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] std::io::Error),
}

pub type App = NormalizePath<axum::Router>;

/// Build the axum application with all routes and middleware.
pub fn make_app(service: ServiceState) -> App {
    // Layers added first are called first for requests and last for responses.
    let middleware = ServiceBuilder::new()
        .layer(axum::middleware::from_fn(middlewares::metrics))
        .layer(CatchPanicLayer::custom(middlewares::handle_panic))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(constants::SERVER),
        ))
        .layer(middlewares::trace_http_layer());

    let router = endpoints::routes(service.config())
        .layer(middleware)
        .with_state(service);

    // Path normalization must run before routing, so it wraps the router.
    NormalizePath::new(router)
}

fn listen(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

/// HTTP server hosting all endpoints.
///
/// The listener is bound on creation, so that bind errors surface before the server runs.
#[derive(Debug)]
pub struct HttpServer {
    service: ServiceState,
    listener: TcpListener,
}

impl HttpServer {
    /// Binds the listen address of the configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(service: ServiceState) -> Result<Self, ServerError> {
        let listener = listen(service.config().listen_addr())?;
        Ok(Self { service, listener })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves requests until `shutdown` resolves, then drains in-flight requests.
    pub async fn run(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let Self { service, listener } = self;

        if let Ok(addr) = listener.local_addr() {
            reel_log::info!("spawning http server");
            reel_log::info!("  listening on http://{addr}/");
        }

        let app = ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(
            make_app(service),
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                reel_log::info!("shutting down HTTP server");
            })
            .await?;

        Ok(())
    }
}
