use std::io::{self, Write};

use axum::http::HeaderMap;
use axum::http::header::CONTENT_ENCODING;
use bytes::Bytes;
use flate2::write::{GzDecoder, ZlibDecoder};

/// Start size for the [`Sink`]'s internal target buffer.
///
/// The allocated buffer will be smaller if the limit is set to a lower value. The buffer grows
/// dynamically up to the limit as large payloads are being decompressed.
const DECODE_BUFFER_SIZE: usize = 8192;

/// Content encodings accepted on request bodies.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum HttpEncoding {
    /// The body is not compressed.
    #[default]
    Identity,
    /// `gzip` (RFC 1952).
    Gzip,
    /// `deflate`, a zlib stream (RFC 1950).
    Deflate,
    /// Brotli (RFC 7932).
    Br,
    /// Zstandard (RFC 8878).
    Zstd,
}

impl HttpEncoding {
    /// Parses a single `Content-Encoding` token.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("identity") {
            Some(Self::Identity)
        } else if value.eq_ignore_ascii_case("gzip") || value.eq_ignore_ascii_case("x-gzip") {
            Some(Self::Gzip)
        } else if value.eq_ignore_ascii_case("deflate") {
            Some(Self::Deflate)
        } else if value.eq_ignore_ascii_case("br") {
            Some(Self::Br)
        } else if value.eq_ignore_ascii_case("zstd") {
            Some(Self::Zstd)
        } else {
            None
        }
    }

    /// Reads the encoding of a request from its headers.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, DecodeError> {
        let Some(value) = headers.get(CONTENT_ENCODING) else {
            return Ok(Self::Identity);
        };

        let value = value.to_str().map_err(|_| {
            DecodeError::UnknownEncoding(String::from_utf8_lossy(value.as_bytes()).into_owned())
        })?;

        Self::parse(value).ok_or_else(|| DecodeError::UnknownEncoding(value.to_owned()))
    }
}

/// Errors while inflating a request body.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The request declares an encoding that is not supported.
    #[error("unsupported content encoding {0:?}")]
    UnknownEncoding(String),
    /// The inflated body is larger than allowed.
    #[error("decompressed body exceeds {0} bytes")]
    Overflow(usize),
    /// The body is not valid for its declared encoding.
    #[error("failed to decompress body")]
    Corrupt(#[source] io::Error),
}

/// A plain sink for chunks of binary data with a limit.
///
/// The sink grows to the stated `limit` and then fails with [`io::ErrorKind::WriteZero`].
#[derive(Debug, Default)]
struct Sink {
    buffer: Vec<u8>,
    remaining: usize,
}

impl Sink {
    fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            remaining: limit,
        }
    }

    fn into_bytes(self) -> Bytes {
        self.buffer.into()
    }
}

impl Write for Sink {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            // `flush` is often unchecked for `Ok(0)`, so report the overflow explicitly.
            return Err(io::ErrorKind::WriteZero.into());
        }

        if buf.len() > self.remaining {
            buf = &buf[..self.remaining];
        }

        if self.buffer.is_empty() {
            self.buffer.reserve(DECODE_BUFFER_SIZE.min(self.remaining));
        }

        self.buffer.extend_from_slice(buf);
        self.remaining -= buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Maps an overflowing sink to [`DecodeError::Overflow`].
fn guard<T>(result: io::Result<T>, limit: usize) -> Result<T, DecodeError> {
    result.map_err(|error| match error.kind() {
        io::ErrorKind::WriteZero => DecodeError::Overflow(limit),
        _ => DecodeError::Corrupt(error),
    })
}

/// Inflates `body` according to `encoding`.
///
/// The inflated payload may be at most `limit` bytes. Uncompressed bodies are returned unchanged.
pub fn decode(encoding: HttpEncoding, body: Bytes, limit: usize) -> Result<Bytes, DecodeError> {
    let sink = match encoding {
        HttpEncoding::Identity => return Ok(body),
        HttpEncoding::Gzip => {
            let mut decoder = GzDecoder::new(Sink::new(limit));
            guard(decoder.write_all(&body), limit)?;
            guard(decoder.finish(), limit)?
        }
        HttpEncoding::Deflate => {
            let mut decoder = ZlibDecoder::new(Sink::new(limit));
            guard(decoder.write_all(&body), limit)?;
            guard(decoder.finish(), limit)?
        }
        HttpEncoding::Br => {
            let mut decoder = brotli::DecompressorWriter::new(Sink::new(limit), DECODE_BUFFER_SIZE);
            guard(decoder.write_all(&body), limit)?;
            guard(decoder.close(), limit)?;
            match decoder.into_inner() {
                Ok(sink) | Err(sink) => sink,
            }
        }
        HttpEncoding::Zstd => {
            let mut decoder = guard(zstd::stream::write::Decoder::new(Sink::new(limit)), limit)?;
            guard(decoder.write_all(&body), limit)?;
            guard(decoder.flush(), limit)?;
            decoder.into_inner()
        }
    };

    Ok(sink.into_bytes())
}
