//! HTTP/1.1 response parsing and serialization.
//!
//! The proxy parses responses twice over: once receiving them from the
//! upstream (headers via [`HttpResponse::parse_head`], body read separately
//! by [`super::client`] since framing depends on `Content-Length`, chunked
//! encoding, or connection-close), and once serializing them back out to the
//! client via [`HttpResponse::into_bytes`].

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::context::RequestContext;

use super::{Headers, StatusCode, Version};

/// Errors that can occur while parsing an HTTP/1.1 response.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A fully parsed HTTP/1.1 response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    version: Version,
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    context: RequestContext,
}

impl HttpResponse {
    const MAX_HEADERS: usize = 64;

    /// Builds a new response with an empty body, carrying the context of the
    /// request it answers. Used both for locally-generated error responses
    /// (e.g. a `502 Bad Gateway`) and as the starting point after parsing
    /// the head of an upstream response.
    pub fn new(status: StatusCode, context: RequestContext) -> Self {
        Self { version: Version::Http11, status, headers: Headers::new(), body: Bytes::new(), context }
    }

    /// Parses the status line and headers of a raw HTTP/1.1 response.
    ///
    /// The body is left empty — callers read it separately according to the
    /// framing the headers describe (`Content-Length`, `Transfer-Encoding:
    /// chunked`, or read-until-close) and attach it with [`Self::set_body`].
    ///
    /// Returns the parsed response and the byte offset where the body
    /// begins.
    pub fn parse_head(buf: &[u8], context: RequestContext) -> Result<(Self, usize), ResponseError> {
        let mut raw_headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_resp = httparse::Response::new(&mut raw_headers);

        let body_offset = match raw_resp.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(ResponseError::Incomplete),
        };

        let code = raw_resp.code.ok_or(ResponseError::MissingField { field: "status code" })?;
        let reason = raw_resp.reason.unwrap_or_default().to_owned();
        let status = StatusCode::with_reason(code, reason);

        let minor = raw_resp.version.ok_or(ResponseError::MissingField { field: "version" })?;
        let version = Version::from_minor(minor);

        let mut headers = Headers::with_capacity(raw_resp.headers.len());
        for header in raw_resp.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                headers.insert(header.name, value);
            }
        }

        Ok((Self { version, status, headers, body: Bytes::new(), context }, body_offset))
    }

    pub fn status(&self) -> &StatusCode {
        &self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        self.body = body.into();
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }

    pub fn is_chunked(&self) -> bool {
        self.headers
            .get("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    }

    /// Serializes the response into HTTP/1.1 wire bytes for sending to the
    /// client. `Content-Length` is always rewritten to match the buffered
    /// body, since modifiers may have changed it; `Transfer-Encoding` is
    /// stripped in favor of the rewritten length, matching the whole-body
    /// capture discipline the rest of the pipeline uses.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();
        self.headers.remove("transfer-encoding");
        self.headers.remove("content-length");
        self.headers.insert("Content-Length", content_length.to_string());

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + content_length);

        buf.put(format!("{} {}\r\n", self.version, self.status).as_bytes());
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);
        if !self.body.is_empty() {
            buf.put(self.body.as_ref());
        }

        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_head_separates_body_offset() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        let (resp, offset) = HttpResponse::parse_head(raw, RequestContext::new()).unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(resp.content_length(), Some(5));
        assert_eq!(&raw[offset..], b"hello");
    }

    #[test]
    fn detects_chunked_encoding() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let (resp, _) = HttpResponse::parse_head(raw, RequestContext::new()).unwrap();
        assert!(resp.is_chunked());
    }

    #[test]
    fn into_bytes_rewrites_content_length() {
        let resp = HttpResponse::new(StatusCode::new(200), RequestContext::new())
            .body_bytes(Bytes::from_static(b"hi"));
        let bytes = resp.into_bytes();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }

    #[test]
    fn incomplete_response() {
        let raw = b"HTTP/1.1 200";
        assert!(matches!(
            HttpResponse::parse_head(raw, RequestContext::new()),
            Err(ResponseError::Incomplete)
        ));
    }
}
