//! HTTP/1.1 request parsing and serialization.
//!
//! A proxy's request type has to do more than a server's: it parses the
//! absolute-form (or CONNECT-authority-form) request line a client sends to
//! a proxy, and it must also serialize back to origin-form bytes to forward
//! upstream. Both directions live here, mirroring how [`super::response`]
//! handles both parsing (from the upstream) and serialization (to the
//! client).

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::context::RequestContext;

use super::{Headers, Method, ProxyUrl, UrlError, Version};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request body exceeds maximum allowed size of {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },

    #[error("invalid request target: {0}")]
    Url(#[from] UrlError),
}

/// A fully parsed HTTP/1.1 request, as received from the client.
///
/// The request target is normalized into an absolute [`ProxyUrl`] regardless
/// of whether the client sent it in absolute form (`GET http://host/path
/// HTTP/1.1`, as a forward proxy receives) or origin form with a separate
/// `Host` header — the latter is reconstructed from the `Host` header so a
/// transparently-tunneled request behind an already-established CONNECT can
/// still be proxied.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    url: ProxyUrl,
    version: Version,
    headers: Headers,
    body: Bytes,
    context: RequestContext,
}

impl HttpRequest {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parses a raw HTTP/1.1 request from a byte slice.
    ///
    /// `default_scheme` and `default_host` resolve the request target when
    /// the client sent origin-form (a bare path plus a `Host` header) rather
    /// than absolute-form; this is the common case once a CONNECT tunnel has
    /// been established and the client believes it is talking directly to
    /// the origin.
    ///
    /// Returns the parsed request and the byte offset at which the body
    /// begins in `buf`.
    pub fn parse(
        buf: &[u8],
        default_scheme: &str,
        default_host: Option<&str>,
    ) -> Result<(Self, usize), RequestError> {
        let mut raw_headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut raw_headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
            .unwrap(); // Infallible

        let raw_target = raw_req.path.ok_or(RequestError::MissingField { field: "path" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let url = if raw_target.starts_with("http://") || raw_target.starts_with("https://") {
            ProxyUrl::parse(raw_target)?
        } else if method.is_connect() {
            ProxyUrl::parse_authority(raw_target)?
        } else {
            let host = header_map
                .get("host")
                .or(default_host)
                .ok_or(RequestError::MissingField { field: "host" })?;
            let origin = format!("{default_scheme}://{host}{raw_target}");
            ProxyUrl::parse(&origin)?
        };

        let minor = raw_req.version.ok_or(RequestError::MissingField { field: "version" })?;
        let version = Version::from_minor(minor);

        let body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((
            Self { method, url, version, headers: header_map, body, context: RequestContext::new() },
            body_offset,
        ))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &ProxyUrl {
        &self.url
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

    /// Returns `true` if the connection should be kept alive after this request.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => !conn.eq_ignore_ascii_case("close"),
            None => matches!(self.version, Version::Http11),
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }

    /// Serializes the request into origin-form HTTP/1.1 wire bytes, ready to
    /// be sent to the upstream: the request line uses the path and query
    /// only, since the absolute form is a proxy-to-proxy convention that
    /// origin servers do not expect.
    pub fn into_bytes(self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(256 + self.headers.len() * 64 + self.body.len());

        buf.put(
            format!(
                "{} {} {}\r\n",
                self.method.as_str(),
                self.url.path_and_query(),
                self.version
            )
            .as_bytes(),
        );

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
    fn parse_absolute_form() {
        let raw = b"GET http://example.com/hello?name=world HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, offset) = HttpRequest::parse(raw, "http", None).unwrap();
        assert_eq!(req.method().as_str(), "GET");
        assert_eq!(req.url().host(), "example.com");
        assert_eq!(req.url().path(), "/hello");
        assert_eq!(req.url().query(), Some("name=world"));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn parse_origin_form_with_host_header() {
        let raw = b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = HttpRequest::parse(raw, "https", None).unwrap();
        assert_eq!(req.url().scheme(), "https");
        assert_eq!(req.url().host(), "example.com");
        assert_eq!(req.url().path(), "/hello");
    }

    #[test]
    fn parse_connect_authority() {
        let raw = b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n";
        let (req, _) = HttpRequest::parse(raw, "http", None).unwrap();
        assert!(req.method().is_connect());
        assert_eq!(req.url().authority(), "example.com:443");
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(HttpRequest::parse(raw, "http", None), Err(RequestError::Incomplete)));
    }

    #[test]
    fn roundtrip_to_bytes_uses_origin_form() {
        let raw = b"GET http://example.com/a?b=c HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = HttpRequest::parse(raw, "http", None).unwrap();
        let bytes = req.into_bytes();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("GET /a?b=c HTTP/1.1\r\n"));
    }
}
