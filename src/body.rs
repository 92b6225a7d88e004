//! Body capture — transparent decompression and size-bounded buffering of
//! request/response bodies for the request logger.
//!
//! The logger persists bodies for display, not for replay, so captured
//! bodies are decompressed (gzip is the only encoding upstreams commonly
//! use that the logger needs to read through) and truncated past a size
//! ceiling rather than streamed.

use std::io::Read;

use bytes::Bytes;

use crate::http::{HttpRequest, HttpResponse};

/// Default ceiling on how much of a body gets captured for logging.
pub const MAX_CAPTURE_BYTES: usize = 10 * 1024 * 1024;

/// The marker appended to a captured body when it was truncated.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// A body captured for logging purposes: possibly decompressed, possibly
/// truncated.
#[derive(Debug, Clone)]
pub struct CapturedBody {
    pub bytes: Bytes,
    pub truncated: bool,
    /// `true` if a `Content-Encoding: gzip` body was successfully decoded —
    /// callers that replace a live response's body with `bytes` must also
    /// drop its `Content-Encoding` header so the two stay consistent.
    pub decoded_gzip: bool,
}

impl CapturedBody {
    fn from_decoded(mut decoded: Vec<u8>, max_bytes: usize, decoded_gzip: bool) -> Self {
        let truncated = decoded.len() > max_bytes;
        if truncated {
            decoded.truncate(max_bytes);
            decoded.extend_from_slice(TRUNCATION_MARKER.as_bytes());
        }
        Self { bytes: Bytes::from(decoded), truncated, decoded_gzip }
    }
}

/// Captures a request body, honoring `Content-Encoding: gzip` if present.
pub fn capture_request(request: &HttpRequest) -> CapturedBody {
    capture(request.body(), request.headers().get("content-encoding"), MAX_CAPTURE_BYTES)
}

/// Captures a response body, honoring `Content-Encoding: gzip` if present.
pub fn capture_response(response: &HttpResponse) -> CapturedBody {
    capture(response.body(), response.headers().get("content-encoding"), MAX_CAPTURE_BYTES)
}

fn capture(body: &Bytes, content_encoding: Option<&str>, max_bytes: usize) -> CapturedBody {
    let is_gzip = content_encoding.is_some_and(|enc| enc.eq_ignore_ascii_case("gzip"));

    if is_gzip {
        match gunzip(body) {
            Ok(decoded) => return CapturedBody::from_decoded(decoded, max_bytes, true),
            Err(_) => {
                // Malformed or partial gzip stream — fall through and
                // capture the raw bytes instead of dropping the body.
            }
        }
    }

    CapturedBody::from_decoded(body.to_vec(), max_bytes, false)
}

fn gunzip(body: &Bytes) -> std::io::Result<Vec<u8>> {
    let mut decoder = flate2::read::GzDecoder::new(body.as_ref());
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
