//! Session tokens for Reel.
//!
//! A [`SessionToken`] binds a client to a running session. It carries the [`SessionId`], the clock
//! delta between server and client at session start, and the instant at which the token expires.
//! Clients receive the token from a start request and echo it on every subsequent request.
//!
//! The serialized token has the format `{payload}:{signature}`, where:
//!  - `payload`: A URL-safe base64 encoding of a versioned, big-endian binary record.
//!  - `signature`: A URL-safe base64 encoding of the SHA512 HMAC of the encoded payload.
//!
//! Use a [`TokenCodec`] to compose and parse tokens:
//!
//! ```
//! use reel_auth::{SessionToken, TokenCodec};
//! use reel_ids::SessionId;
//!
//! let codec = TokenCodec::new(b"secret".to_vec(), Vec::new());
//! let token = SessionToken::new(SessionId::from_u64(42), -12, 1_000);
//!
//! let composed = codec.compose(&token);
//! let parsed = codec.parse_at(&composed, 999).unwrap();
//! assert_eq!(parsed.id(), token.id());
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

use std::borrow::Cow;
use std::fmt;

use chrono::Utc;
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use http::header::AUTHORIZATION;
use rand::RngCore as _;
use reel_ids::SessionId;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

/// Version byte written at the start of every payload.
const TOKEN_VERSION: u8 = 1;

/// Size of the binary payload: version, id, delay and expiry.
const PAYLOAD_SIZE: usize = 1 + 8 + 8 + 8;

/// Name of the query parameter that may carry the token.
const TOKEN_QUERY_PARAM: &str = "token";

/// Decoded contents of a session token.
///
/// Two tokens are equal if they refer to the same session.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct SessionToken {
    id: SessionId,
    delay: i64,
    expires_at: i64,
}

impl SessionToken {
    /// Creates a token for the given session.
    ///
    /// `delay` is the server-observed start time minus the client-reported start time and
    /// `expires_at` is a unix timestamp in milliseconds.
    pub fn new(id: SessionId, delay: i64, expires_at: i64) -> Self {
        Self {
            id,
            delay,
            expires_at,
        }
    }

    /// Returns the identifier of the session.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the clock delta in milliseconds.
    pub fn delay(&self) -> i64 {
        self.delay
    }

    /// Returns the expiry as unix timestamp in milliseconds.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Returns `true` if the token is no longer valid at `now_millis`.
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expires_at < now_millis
    }

    fn to_bytes(self) -> [u8; PAYLOAD_SIZE] {
        let mut bytes = [0; PAYLOAD_SIZE];
        bytes[0] = TOKEN_VERSION;
        bytes[1..9].copy_from_slice(&self.id.to_be_bytes());
        bytes[9..17].copy_from_slice(&self.delay.to_be_bytes());
        bytes[17..25].copy_from_slice(&self.expires_at.to_be_bytes());
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; PAYLOAD_SIZE] = bytes.try_into().ok()?;
        if bytes[0] != TOKEN_VERSION {
            return None;
        }

        let id = u64::from_be_bytes(bytes[1..9].try_into().ok()?);
        let delay = i64::from_be_bytes(bytes[9..17].try_into().ok()?);
        let expires_at = i64::from_be_bytes(bytes[17..25].try_into().ok()?);

        Some(Self::new(SessionId::from_u64(id), delay, expires_at))
    }
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SessionToken {}

/// An error returned when a token cannot be used.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TokenError {
    /// The request does not carry a token.
    #[error("missing session token")]
    Missing,
    /// The token is malformed or its signature does not match.
    #[error("corrupt session token")]
    Corrupt,
    /// The token is authentic but has expired.
    ///
    /// Carries the decoded token for endpoints that accept late events.
    #[error("session token expired")]
    Expired(SessionToken),
}

impl TokenError {
    /// Returns the decoded token if the only problem is its expiry.
    pub fn expired_token(&self) -> Option<SessionToken> {
        match self {
            Self::Expired(token) => Some(*token),
            _ => None,
        }
    }
}

/// Composes and parses signed session tokens.
///
/// Tokens are always signed with the current secret. Previous secrets are accepted when parsing,
/// which allows rotating the secret without invalidating running sessions.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
    previous_secrets: Vec<Vec<u8>>,
}

impl TokenCodec {
    /// Creates a codec signing with `secret`.
    pub fn new(secret: impl Into<Vec<u8>>, previous_secrets: Vec<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            previous_secrets,
        }
    }

    /// Creates an Hmac instance for signing the payload.
    fn mac(secret: &[u8]) -> Hmac<Sha512> {
        Hmac::new_from_slice(secret).expect("HMAC takes variable keys")
    }

    /// Serializes and signs the token.
    pub fn compose(&self, token: &SessionToken) -> String {
        let payload = BASE64URL_NOPAD.encode(&token.to_bytes());

        let mut mac = Self::mac(&self.secret);
        mac.update(payload.as_bytes());
        let signature = BASE64URL_NOPAD.encode(&mac.finalize().into_bytes());

        format!("{payload}:{signature}")
    }

    /// Parses a token and validates it against the current time.
    pub fn parse(&self, token: &str) -> Result<SessionToken, TokenError> {
        self.parse_at(token, Utc::now().timestamp_millis())
    }

    /// Parses a token and validates its expiry against `now_millis`.
    ///
    /// The signature is checked before the payload is decoded. A token with a valid signature
    /// that has expired yields [`TokenError::Expired`].
    pub fn parse_at(&self, token: &str, now_millis: i64) -> Result<SessionToken, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Missing);
        }

        let (payload, signature) = token.split_once(':').ok_or(TokenError::Corrupt)?;
        let code = BASE64URL_NOPAD
            .decode(signature.as_bytes())
            .map_err(|_| TokenError::Corrupt)?;

        if !self.verify(payload, &code) {
            return Err(TokenError::Corrupt);
        }

        let bytes = BASE64URL_NOPAD
            .decode(payload.as_bytes())
            .map_err(|_| TokenError::Corrupt)?;
        let token = SessionToken::from_bytes(&bytes).ok_or(TokenError::Corrupt)?;

        if token.is_expired_at(now_millis) {
            return Err(TokenError::Expired(token));
        }

        Ok(token)
    }

    /// Extracts the token from a request and parses it.
    ///
    /// The token is read from an `Authorization: Bearer` header, falling back to the `token`
    /// query parameter.
    pub fn parse_from_request(
        &self,
        parts: &http::request::Parts,
    ) -> Result<SessionToken, TokenError> {
        let token = token_from_request(parts).ok_or(TokenError::Missing)?;
        self.parse(&token)
    }

    fn verify(&self, payload: &str, code: &[u8]) -> bool {
        std::iter::once(&self.secret)
            .chain(&self.previous_secrets)
            .any(|secret| {
                let mut mac = Self::mac(secret);
                mac.update(payload.as_bytes());
                mac.verify_slice(code).is_ok()
            })
    }
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("secret", &"[redacted]")
            .field("previous_secrets", &self.previous_secrets.len())
            .finish()
    }
}

/// Returns the raw token of a request, if any.
pub fn token_from_request(parts: &http::request::Parts) -> Option<Cow<'_, str>> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(header) = header {
        return Some(Cow::Borrowed(header));
    }

    let query = parts.uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

/// Generates a new random secret suitable for signing tokens.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 48];
    rand::rng().fill_bytes(&mut bytes);
    BASE64URL_NOPAD.encode(&bytes)
}

#[cfg(test)]
mod tests {
    use http::Request;

    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"test-secret".to_vec(), Vec::new())
    }

    fn token() -> SessionToken {
        SessionToken::new(SessionId::from_u64(7_178_940_825_421_824), -1500, NOW + 1_800_000)
    }

    fn parts(request: Request<()>) -> http::request::Parts {
        request.into_parts().0
    }

    #[test]
    fn test_roundtrip() {
        let codec = codec();
        let composed = codec.compose(&token());
        let parsed = codec.parse_at(&composed, NOW).unwrap();

        assert_eq!(parsed.id(), token().id());
        assert_eq!(parsed.delay(), -1500);
        assert_eq!(parsed.expires_at(), NOW + 1_800_000);
    }

    #[test]
    fn test_url_safe() {
        let composed = codec().compose(&token());
        assert!(
            composed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':'))
        );
    }

    #[test]
    fn test_tamper_every_bit() {
        let codec = codec();
        let composed = codec.compose(&token());

        // The high bit would leave ASCII, which a `str` token cannot carry.
        for index in 0..composed.len() {
            for bit in 0..7 {
                let mut bytes = composed.clone().into_bytes();
                bytes[index] ^= 1 << bit;
                let tampered = String::from_utf8(bytes).unwrap();
                assert_eq!(
                    codec.parse_at(&tampered, NOW),
                    Err(TokenError::Corrupt),
                    "bit {bit} of byte {index} in {tampered:?}"
                );
            }
        }
    }

    #[test]
    fn test_foreign_secret() {
        let composed = TokenCodec::new(b"other".to_vec(), Vec::new()).compose(&token());
        assert_eq!(codec().parse_at(&composed, NOW), Err(TokenError::Corrupt));
    }

    #[test]
    fn test_previous_secret() {
        let composed = codec().compose(&token());
        let rotated = TokenCodec::new(b"new-secret".to_vec(), vec![b"test-secret".to_vec()]);

        assert_eq!(rotated.parse_at(&composed, NOW), Ok(token()));
        assert_ne!(rotated.compose(&token()), composed);
    }

    #[test]
    fn test_expired() {
        let codec = codec();
        let expired = SessionToken::new(SessionId::from_u64(1), 0, NOW - 10_000);
        let composed = codec.compose(&expired);

        let error = codec.parse_at(&composed, NOW).unwrap_err();
        assert_eq!(error, TokenError::Expired(expired));
        assert_eq!(error.expired_token().map(|t| t.expires_at()), Some(NOW - 10_000));
    }

    #[test]
    fn test_garbage() {
        let codec = codec();
        assert_eq!(codec.parse_at("", NOW), Err(TokenError::Missing));
        assert_eq!(codec.parse_at("abc", NOW), Err(TokenError::Corrupt));
        assert_eq!(codec.parse_at("abc:def", NOW), Err(TokenError::Corrupt));
        assert_eq!(codec.parse_at(":", NOW), Err(TokenError::Corrupt));
    }

    #[test]
    fn test_unknown_version() {
        let codec = codec();
        let mut bytes = token().to_bytes();
        bytes[0] = 2;
        let payload = BASE64URL_NOPAD.encode(&bytes);

        let mut mac = TokenCodec::mac(b"test-secret");
        mac.update(payload.as_bytes());
        let signature = BASE64URL_NOPAD.encode(&mac.finalize().into_bytes());

        assert_eq!(
            codec.parse_at(&format!("{payload}:{signature}"), NOW),
            Err(TokenError::Corrupt)
        );
    }

    #[test]
    fn test_from_bearer_header() {
        let composed = codec().compose(&token());
        let parts = parts(
            Request::post("/v1/web/i")
                .header("Authorization", format!("Bearer {composed}"))
                .body(())
                .unwrap(),
        );

        assert_eq!(token_from_request(&parts).as_deref(), Some(composed.as_str()));
    }

    #[test]
    fn test_from_query() {
        let composed = codec().compose(&token());
        let parts = parts(
            Request::post(format!("/v1/web/i?foo=bar&token={composed}"))
                .body(())
                .unwrap(),
        );

        assert_eq!(token_from_request(&parts).as_deref(), Some(composed.as_str()));
    }

    #[test]
    fn test_missing() {
        let parts = parts(
            Request::post("/v1/web/i")
                .header("Authorization", "Basic Zm9vOmJhcg==")
                .body(())
                .unwrap(),
        );

        assert_eq!(codec().parse_from_request(&parts), Err(TokenError::Missing));
    }

    #[test]
    fn test_generate_secret() {
        let first = generate_secret();
        assert_eq!(first.len(), 64);
        assert_ne!(first, generate_secret());
    }
}
