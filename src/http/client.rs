//! Reverse-proxy dialer — sends a parsed request upstream and reads back the
//! response.
//!
//! This is the half of the proxy a plain HTTP server never needs: having
//! parsed a request from the client, something has to open a connection to
//! the *actual* destination, replay the request on it, and parse whatever
//! comes back. [`dial`] does exactly that, over plain TCP or TLS depending
//! on the request's scheme.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rustls_pki_types::ServerName;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::context::RequestContext;

use super::response::{HttpResponse, ResponseError};
use super::{HttpRequest, ProxyUrl};

/// Maximum response body size the dialer will buffer (64 MiB), mirroring the
/// capture ceiling applied on the way back to the client.
const MAX_RESPONSE_BODY: usize = 64 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum DialError {
    #[error("I/O error talking to upstream: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS handshake with upstream failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid upstream hostname for TLS SNI: {0:?}")]
    InvalidServerName(String),

    #[error("failed to parse upstream response: {0}")]
    Response(#[from] ResponseError),

    #[error("upstream response body exceeds {max_bytes} bytes")]
    BodyTooLarge { max_bytes: usize },

    #[error("upstream closed the connection before sending a complete response")]
    UnexpectedEof,

    #[error("malformed chunked transfer encoding from upstream")]
    MalformedChunk,
}

/// Builds a `rustls::ClientConfig` trusting the platform's native root
/// certificate store, used for outbound TLS connections to upstream origins
/// (as opposed to [`crate::certs::CertMinter`], which mints certificates for
/// inbound TLS termination of intercepted client connections).
pub fn native_tls_client_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }

    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Dials the upstream identified by `request.url()`, sends the request, and
/// returns the parsed response.
///
/// Connects in plaintext for `http` URLs and over TLS (SNI set from the
/// host) for `https` URLs — the latter is how the proxy re-encrypts traffic
/// after terminating the client's TLS connection at the CONNECT tunnel.
pub async fn dial(
    request: HttpRequest,
    tls_config: Arc<rustls::ClientConfig>,
) -> Result<HttpResponse, DialError> {
    let url = request.url().clone();
    let context = request.context().clone();
    let tcp = TcpStream::connect((url.host(), url.port())).await?;
    tcp.set_nodelay(true).ok();

    if url.scheme() == "https" {
        let connector = TlsConnector::from(tls_config);
        let server_name = ServerName::try_from(url.host().to_owned())
            .map_err(|_| DialError::InvalidServerName(url.host().to_owned()))?;
        let stream = connector.connect(server_name, tcp).await?;
        exchange(stream, request, context, &url).await
    } else {
        exchange(tcp, request, context, &url).await
    }
}

async fn exchange<S>(
    mut stream: S,
    request: HttpRequest,
    context: RequestContext,
    url: &ProxyUrl,
) -> Result<HttpResponse, DialError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let close_requested = !request.is_keep_alive();
    let wire = request.into_bytes();
    stream.write_all(&wire).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let (mut response, body_offset) = loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(DialError::UnexpectedEof);
        }
        match HttpResponse::parse_head(&buf, context.clone()) {
            Ok(pair) => break pair,
            Err(ResponseError::Incomplete) => continue,
            Err(e) => return Err(e.into()),
        }
    };
    let _ = buf.split_to(body_offset);

    let body = if response.is_chunked() {
        read_chunked_body(&mut stream, &mut buf).await?
    } else if let Some(len) = response.content_length() {
        read_exact_body(&mut stream, &mut buf, len).await?
    } else if close_requested || url.scheme() == "https" {
        read_until_close(&mut stream, &mut buf).await?
    } else {
        Bytes::new()
    };

    response.set_body(body);
    Ok(response)
}

async fn read_exact_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut BytesMut,
    len: usize,
) -> Result<Bytes, DialError> {
    if len > MAX_RESPONSE_BODY {
        return Err(DialError::BodyTooLarge { max_bytes: MAX_RESPONSE_BODY });
    }
    while buf.len() < len {
        if stream.read_buf(buf).await? == 0 {
            return Err(DialError::UnexpectedEof);
        }
    }
    Ok(buf.split_to(len).freeze())
}

async fn read_until_close<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> Result<Bytes, DialError> {
    loop {
        if buf.len() > MAX_RESPONSE_BODY {
            return Err(DialError::BodyTooLarge { max_bytes: MAX_RESPONSE_BODY });
        }
        if stream.read_buf(buf).await? == 0 {
            break;
        }
    }
    Ok(std::mem::take(buf).freeze())
}

/// Decodes an HTTP/1.1 chunked transfer-coded body into its unwrapped bytes.
async fn read_chunked_body<S: AsyncRead + Unpin>(
    stream: &mut S,
    buf: &mut BytesMut,
) -> Result<Bytes, DialError> {
    let mut out = BytesMut::new();

    loop {
        let line_end = loop {
            if let Some(pos) = find_crlf(buf) {
                break pos;
            }
            if stream.read_buf(buf).await? == 0 {
                return Err(DialError::UnexpectedEof);
            }
        };

        let size_line = std::str::from_utf8(&buf[..line_end]).map_err(|_| DialError::MalformedChunk)?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let chunk_size =
            usize::from_str_radix(size_str, 16).map_err(|_| DialError::MalformedChunk)?;
        let _ = buf.split_to(line_end + 2);

        if chunk_size == 0 {
            // Trailing CRLF after the zero chunk; trailers (if any) are
            // discarded since the capture discipline is whole-body only.
            while find_crlf(buf).is_none() {
                if stream.read_buf(buf).await? == 0 {
                    return Err(DialError::UnexpectedEof);
                }
            }
            let pos = find_crlf(buf).unwrap();
            let _ = buf.split_to(pos + 2);
            break;
        }

        if out.len() + chunk_size > MAX_RESPONSE_BODY {
            return Err(DialError::BodyTooLarge { max_bytes: MAX_RESPONSE_BODY });
        }

        while buf.len() < chunk_size + 2 {
            if stream.read_buf(buf).await? == 0 {
                return Err(DialError::UnexpectedEof);
            }
        }

        out.extend_from_slice(&buf[..chunk_size]);
        let _ = buf.split_to(chunk_size + 2);
    }

    Ok(out.freeze())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}
