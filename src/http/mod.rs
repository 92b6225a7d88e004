//! HTTP/1.1 protocol types shared by both ends of the proxy.
//!
//! This module provides the core HTTP primitives: [`Method`], [`Version`],
//! [`StatusCode`], [`Headers`], [`HttpRequest`], and [`HttpResponse`]. Unlike
//! a plain HTTP server, a proxy needs to both *parse* requests (from the
//! client) and *serialize* requests (to the upstream), and both *parse*
//! responses (from the upstream) and *serialize* responses (to the client) —
//! so both directions are implemented for each type, in `client` and in the
//! respective `request`/`response` modules.

use std::fmt;

pub mod client;
pub mod headers;
pub mod request;
pub mod response;
pub mod url;

pub use headers::Headers;
pub use request::HttpRequest;
pub use response::HttpResponse;
pub use url::ProxyUrl;

/// The HTTP protocol version on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Builds a `Version` from httparse's minor-version digit (0 or 1).
    pub fn from_minor(minor: u8) -> Self {
        if minor == 0 { Self::Http10 } else { Self::Http11 }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http10 => "HTTP/1.0",
            Self::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP/1.0" => Ok(Self::Http10),
            "HTTP/1.1" => Ok(Self::Http11),
            _ => Err(ParseVersionError),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported HTTP version")]
pub struct ParseVersionError;

/// An HTTP status code plus its reason phrase.
///
/// Unlike a server that only ever emits a small, known set of statuses, a
/// proxy must faithfully relay whatever status an upstream sent — including
/// non-standard or rarely used codes — so this is a `(u16, reason)` pair
/// rather than a closed enum. Well-known codes get a canonical reason
/// phrase for free via [`StatusCode::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatusCode {
    code: u16,
    reason: String,
}

impl StatusCode {
    pub const OK: u16 = 200;
    pub const NO_CONTENT: u16 = 204;
    pub const BAD_REQUEST: u16 = 400;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
    pub const BAD_GATEWAY: u16 = 502;

    /// Builds a status code, filling in the canonical reason phrase for
    /// well-known codes and a generic one otherwise.
    pub fn new(code: u16) -> Self {
        let reason = canonical_reason(code).unwrap_or("Unknown Status").to_owned();
        Self { code, reason }
    }

    /// Builds a status code with an explicit reason phrase, e.g. one read
    /// verbatim off the wire from an upstream response.
    pub fn with_reason(code: u16, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }

    pub fn as_u16(&self) -> u16 {
        self.code
    }

    pub fn reason_phrase(&self) -> &str {
        &self.reason
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::new(Self::OK)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

fn canonical_reason(code: u16) -> Option<&'static str> {
    Some(match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => return None,
    })
}

/// An HTTP request method.
///
/// Standard methods are represented as unit variants for zero-cost
/// comparison. Non-standard methods are captured in the `Custom` variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET — retrieve a representation of the target resource.
    Get,
    /// POST — perform resource-specific processing on the request payload.
    Post,
    /// PUT — replace the target resource's current representation.
    Put,
    /// DELETE — remove the association between the target resource and its functionality.
    Delete,
    /// HEAD — identical to GET but without a response body.
    Head,
    /// OPTIONS — describe the communication options for the target resource.
    Options,
    /// PATCH — apply partial modifications to a resource.
    Patch,
    /// CONNECT — establish a tunnel to the server identified by the target resource.
    Connect,
    /// TRACE — perform a message loop-back test along the path to the target resource.
    Trace,
    /// A non-standard extension method.
    Custom(String),
}

impl Method {
    /// Returns the method as a string slice.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch => "PATCH",
            Self::Connect => "CONNECT",
            Self::Trace => "TRACE",
            Self::Custom(s) => s.as_str(),
        }
    }

    /// Returns `true` if this is the CONNECT method, the proxy's tunnel hook.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            "PATCH" => Self::Patch,
            "CONNECT" => Self::Connect,
            "TRACE" => Self::Trace,
            other => Self::Custom(other.to_owned()),
        })
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
