//! Absolute-URL handling for proxied requests.
//!
//! A forward proxy receives request lines carrying an absolute URL
//! (`GET http://example.com/path HTTP/1.1`) rather than the origin-form path
//! a normal server sees, and a CONNECT request carries an `authority` target
//! (`example.com:443`). [`ProxyUrl`] captures both shapes.

use std::fmt;

use thiserror::Error;
use url::Url;

/// Errors encountered while parsing a request target into a [`ProxyUrl`].
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("could not parse URL: {0}")]
    Parse(#[from] url::ParseError),

    #[error("URL is missing a host")]
    MissingHost,

    #[error("CONNECT target {0:?} is not a valid host:port authority")]
    InvalidAuthority(String),
}

/// An absolute URL as seen by the proxy: scheme, host, optional explicit
/// port, path, and query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrl {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
    query: Option<String>,
}

impl ProxyUrl {
    /// Parses an absolute-form request target (`http://host:port/path?query`).
    pub fn parse(raw: &str) -> Result<Self, UrlError> {
        let parsed = Url::parse(raw)?;
        let host = parsed.host_str().ok_or(UrlError::MissingHost)?.to_owned();
        let path = if parsed.path().is_empty() { "/".to_owned() } else { parsed.path().to_owned() };
        Ok(Self {
            scheme: parsed.scheme().to_owned(),
            host,
            port: parsed.port(),
            path,
            query: parsed.query().map(str::to_owned),
        })
    }

    /// Parses a CONNECT request's `host:port` authority target.
    ///
    /// The resulting `ProxyUrl` always uses the `https` scheme since CONNECT
    /// exists to establish a TLS tunnel, and carries no path or query.
    pub fn parse_authority(authority: &str) -> Result<Self, UrlError> {
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| UrlError::InvalidAuthority(authority.to_owned()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| UrlError::InvalidAuthority(authority.to_owned()))?;
        Ok(Self {
            scheme: "https".to_owned(),
            host: host.to_owned(),
            port: Some(port),
            path: "/".to_owned(),
            query: None,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the effective port: the explicit port if present, otherwise
    /// the scheme's default (443 for https, 80 otherwise).
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.scheme.as_str() {
            "https" => 443,
            _ => 80,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The `host:port` pair used to dial the upstream and to key the CONNECT
    /// tunnel and certificate cache.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port())
    }

    /// The path and query string as they should appear on the origin-form
    /// request line sent to the upstream (`/path?query`).
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{q}", self.path),
            None => self.path.clone(),
        }
    }
}

impl fmt::Display for ProxyUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let default_port = match self.scheme.as_str() {
            "https" => 443,
            _ => 80,
        };
        write!(f, "{}://{}", self.scheme, self.host)?;
        if self.port() != default_port {
            write!(f, ":{}", self.port())?;
        }
        write!(f, "{}", self.path_and_query())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_absolute_url() {
        let u = ProxyUrl::parse("http://example.com/search?q=rust").unwrap();
        assert_eq!(u.scheme(), "http");
        assert_eq!(u.host(), "example.com");
        assert_eq!(u.port(), 80);
        assert_eq!(u.path(), "/search");
        assert_eq!(u.query(), Some("q=rust"));
    }

    #[test]
    fn parse_https_with_explicit_port() {
        let u = ProxyUrl::parse("https://example.com:8443/").unwrap();
        assert_eq!(u.port(), 8443);
        assert_eq!(u.authority(), "example.com:8443");
    }

    #[test]
    fn parse_connect_authority() {
        let u = ProxyUrl::parse_authority("example.com:443").unwrap();
        assert_eq!(u.scheme(), "https");
        assert_eq!(u.host(), "example.com");
        assert_eq!(u.port(), 443);
    }

    #[test]
    fn reject_malformed_authority() {
        assert!(ProxyUrl::parse_authority("example.com").is_err());
    }
}
