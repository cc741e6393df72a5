use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;

use crate::extractors::StartTime;

/// Returns the first address of an `X-Forwarded-For` header.
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Information about the client that sent a request.
#[derive(Clone, Debug)]
pub struct RequestMeta {
    client_ip: Option<IpAddr>,
    user_agent: Option<String>,
    start_time: StartTime,
}

impl RequestMeta {
    /// The address of the client, preferring the first `X-Forwarded-For` entry over the peer.
    pub fn client_ip(&self) -> Option<IpAddr> {
        self.client_ip
    }

    /// The raw `User-Agent` header.
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn start_time(&self) -> StartTime {
        self.start_time
    }
}

impl<S> FromRequestParts<S> for RequestMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        Ok(RequestMeta {
            client_ip: forwarded_for(&parts.headers).or(peer),
            user_agent,
            start_time: StartTime::from_request_parts(parts, state).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Request;

    use super::*;

    async fn extract(request: Request<()>) -> RequestMeta {
        let (mut parts, _) = request.into_parts();
        RequestMeta::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn test_forwarded_for_wins() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header(USER_AGENT, "curl")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 5000))));

        let meta = extract(request).await;
        assert_eq!(meta.client_ip(), Some("203.0.113.7".parse().unwrap()));
        assert_eq!(meta.user_agent(), Some("curl"));
    }

    #[tokio::test]
    async fn test_peer_fallback() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "garbage")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 2], 5000))));

        let meta = extract(request).await;
        assert_eq!(meta.client_ip(), Some("10.0.0.2".parse().unwrap()));
        assert_eq!(meta.user_agent(), None);
    }
}
