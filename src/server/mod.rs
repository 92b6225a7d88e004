//! The proxy engine — the HTTP handler that routes CONNECT tunnels versus
//! plain requests, runs the modifier pipelines, drives the upstream
//! reverse-proxy dialer, and performs TLS interception.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::certs::{CertMinter, SniOrFallbackResolver};
use crate::http::client::{self, DialError};
use crate::http::request::RequestError;
use crate::http::{HttpRequest, HttpResponse, StatusCode};
use crate::middleware::{ModifierError, ModifierPipeline};
use crate::once_listener::OnceListener;

/// Maximum size of a complete HTTP request the engine will buffer before
/// rejecting it (8 MiB) — mirrors the response-side capture ceiling in
/// [`crate::http::client`].
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

const INITIAL_BUF_SIZE: usize = 4096;

/// Errors the engine can surface while driving a connection. Matches the
/// taxonomy: client-caused transport errors, upstream errors, and
/// middleware rejections all end up here, rendered to the client according
/// to their kind (or, for transport errors, simply dropped).
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream request failed: {0}")]
    Upstream(#[from] DialError),

    #[error("a modifier rejected the exchange: {0}")]
    Modifier(#[from] ModifierError),

    #[error("TLS handshake failed: {0}")]
    Tls(#[from] rustls::Error),
}

/// HTTP(S) intercepting proxy engine.
///
/// Binds a listener and, for every accepted connection, runs a serve loop
/// that reads HTTP/1.1 requests, routes CONNECT tunnels through TLS
/// interception, and proxies everything else through the modifier pipeline
/// and the reverse-proxy dialer.
pub struct ProxyEngine {
    listener: TcpListener,
    local_addr: SocketAddr,
    cert_minter: Arc<CertMinter>,
    pipeline: ModifierPipeline,
    upstream_tls_config: Arc<rustls::ClientConfig>,
}

impl ProxyEngine {
    /// Binds the engine to `addr`, ready to intercept CONNECT tunnels using
    /// leaf certificates minted by `cert_minter` and to run every exchange
    /// through `pipeline`.
    pub async fn bind(
        addr: impl AsRef<str>,
        cert_minter: Arc<CertMinter>,
        pipeline: ModifierPipeline,
    ) -> Result<Self, ProxyError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::Bind { addr: addr.to_owned(), source: e })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            cert_minter,
            pipeline,
            upstream_tls_config: client::native_tls_client_config(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until the process is terminated or the listener
    /// itself fails unrecoverably.
    pub async fn run(self) -> Result<(), ProxyError> {
        let engine = Arc::new(self);
        info!(address = %engine.local_addr, "wiretap proxy listening");

        loop {
            let (stream, peer_addr) = match engine.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            debug!(peer = %peer_addr, "connection accepted");
            let engine = Arc::clone(&engine);

            tokio::spawn(async move {
                if let Err(e) = engine.serve(stream, peer_addr, "http", None).await {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }
    }

    /// Drives one connection's worth of HTTP/1.1 requests. Generic over the
    /// transport so the same loop handles both the freshly accepted plain
    /// `TcpStream` and the TLS-terminated stream a CONNECT tunnel hands back
    /// to it once the tunnel is established.
    ///
    /// `default_scheme`/`default_host` resolve origin-form requests (a bare
    /// path plus a `Host` header) into absolute URLs — `default_host` is set
    /// once a CONNECT tunnel is underway so requests inside it resolve
    /// against the tunneled authority even if the client omits `Host`.
    async fn serve<S>(
        self: Arc<Self>,
        mut stream: S,
        peer_addr: SocketAddr,
        default_scheme: &'static str,
        default_host: Option<String>,
    ) -> Result<(), std::io::Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

        loop {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer = %peer_addr, "connection closed by peer");
                break;
            }

            if buf.len() > MAX_REQUEST_SIZE {
                warn!(peer = %peer_addr, "request too large — sending 413");
                let response = HttpResponse::new(
                    StatusCode::new(413),
                    crate::context::RequestContext::new(),
                )
                .body_bytes(Bytes::from_static(b"Request entity too large"));
                stream.write_all(&response.into_bytes()).await?;
                break;
            }

            let (mut request, body_offset) =
                match HttpRequest::parse(&buf, default_scheme, default_host.as_deref()) {
                    Ok(pair) => pair,
                    Err(RequestError::Incomplete) => continue,
                    Err(e) => {
                        warn!(peer = %peer_addr, error = %e, "bad request — sending 400");
                        let response = HttpResponse::new(
                            StatusCode::new(400),
                            crate::context::RequestContext::new(),
                        )
                        .body_bytes(Bytes::from(format!("Bad Request: {e}")));
                        stream.write_all(&response.into_bytes()).await?;
                        break;
                    }
                };

            let content_length = request.content_length().unwrap_or(0);
            let total_needed = body_offset + content_length;
            if buf.len() < total_needed {
                continue;
            }

            request.set_body(Bytes::copy_from_slice(&buf[body_offset..total_needed]));
            let keep_alive = request.is_keep_alive();
            let _ = buf.split_to(total_needed);

            if request.method().is_connect() {
                debug!(peer = %peer_addr, host = %request.url().host(), "handling CONNECT tunnel");
                if let Err(e) = Arc::clone(&self).handle_connect(request, stream, peer_addr).await {
                    warn!(peer = %peer_addr, error = %e, "CONNECT tunnel failed");
                }
                // The stream was consumed by the tunnel (or failed to hijack
                // at all); either way this loop no longer owns it.
                break;
            }

            debug!(
                peer = %peer_addr,
                method = %request.method(),
                url = %request.url(),
                "dispatching proxied request"
            );

            let response = self.handle_plain(request).await;
            stream.write_all(&response.into_bytes()).await?;
            stream.flush().await?;

            if !keep_alive {
                debug!(peer = %peer_addr, "Connection: close — shutting down");
                break;
            }
        }

        Ok(())
    }

    /// Runs a non-CONNECT request through the request chain, the upstream
    /// dialer, and the response chain, producing the response to write back
    /// to the client. Never returns an error: every failure mode renders as
    /// a response (502 Bad Gateway) instead, per the error-handling design.
    async fn handle_plain(&self, mut request: HttpRequest) -> HttpResponse {
        let context = request.context().clone();

        // The proxy must not leak the client's address to the upstream
        // unless a modifier explicitly chooses to add one back.
        request.headers_mut().remove("x-forwarded-for");
        request.headers_mut().insert("X-Forwarded-For", "");

        let request = match self.pipeline.apply_request(request).await {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "request modifier rejected the exchange");
                return bad_gateway(context);
            }
        };

        let response = match client::dial(request, Arc::clone(&self.upstream_tls_config)).await {
            Ok(response) => response,
            Err(err) => {
                error!(error = %err, "upstream request failed");
                return bad_gateway(context);
            }
        };

        match self.pipeline.apply_response(response).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "response modifier rejected the exchange");
                bad_gateway(context)
            }
        }
    }

    /// Performs the CONNECT tunnel handshake: hijacks the raw
    /// connection, answers `200 Connection Established`, upgrades it in
    /// place to a TLS server using a leaf certificate minted for the
    /// tunneled host, and hands the secured connection back to [`Self::serve`]
    /// to run the inner requests through the same pipeline.
    async fn handle_connect(
        self: Arc<Self>,
        request: HttpRequest,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ProxyError> {
        let host = request.url().host().to_owned();

        // Mint eagerly so a misconfigured CA fails the tunnel before the
        // client has committed to a TLS handshake on top of a 200 it can no
        // longer trust.
        if let Err(err) = self.cert_minter.certificate_for(&host) {
            warn!(host = %host, error = %err, "failed to mint certificate, refusing CONNECT");
            let response = HttpResponse::new(StatusCode::new(503), request.context().clone());
            let mut stream = stream;
            stream.write_all(&response.into_bytes()).await.ok();
            return Ok(());
        }

        let mut once = OnceListener::new(stream);
        let mut stream = once
            .take()
            .map_err(|_| rustls::Error::General("CONNECT stream already hijacked".to_owned()))?;

        stream.write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;
        stream.flush().await?;

        let resolver = Arc::new(SniOrFallbackResolver::new(Arc::clone(&self.cert_minter), host.clone()));
        let tls_config = Arc::new(
            rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_cert_resolver(resolver),
        );
        let acceptor = TlsAcceptor::from(tls_config);

        let tls_stream = match acceptor.accept(stream).await {
            Ok(tls_stream) => tls_stream,
            Err(err) => {
                // The 200 is already written and cannot be taken back; the
                // failure is logged, not propagated to the client.
                warn!(host = %host, peer = %peer_addr, error = %err, "TLS handshake with client failed");
                return Ok(());
            }
        };

        self.serve(tls_stream, peer_addr, "https", Some(host)).await?;
        Ok(())
    }
}

fn bad_gateway(context: crate::context::RequestContext) -> HttpResponse {
    HttpResponse::new(StatusCode::new(StatusCode::BAD_GATEWAY), context)
        .body_bytes(Bytes::from_static(b"Bad Gateway"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reqlog::{MemoryRepository, RegexScope, RequestLogger};
    use std::io::Write;
    use tokio::io::AsyncReadExt as _;
    use tokio::net::TcpListener as TokioTcpListener;

    fn test_ca() -> (String, String) {
        use rcgen::{CertificateParams, KeyPair};
        let mut ca_params = CertificateParams::new(Vec::new()).unwrap();
        ca_params.distinguished_name.push(rcgen::DnType::CommonName, "wiretap test CA");
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();
        (ca_cert.pem(), ca_key.serialize_pem())
    }

    async fn spawn_fake_upstream(body: &'static str) -> SocketAddr {
        let listener = TokioTcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn passthrough_plain_get_with_no_active_project() {
        let upstream_addr = spawn_fake_upstream("hello").await;
        let (ca_cert_pem, ca_key_pem) = test_ca();
        let minter = Arc::new(CertMinter::from_ca_pem(&ca_cert_pem, &ca_key_pem).unwrap());
        let repo = Arc::new(MemoryRepository::new());
        let logger = Arc::new(RequestLogger::new(repo.clone(), Arc::new(RegexScope::new())));
        let pipeline = ModifierPipeline::new()
            .with_request_modifier(crate::middleware::from_request_modifier(logger.clone()))
            .with_response_modifier(crate::middleware::from_response_modifier(logger));

        let engine = ProxyEngine::bind("127.0.0.1:0", minter, pipeline).await.unwrap();
        let proxy_addr = engine.local_addr();
        tokio::spawn(engine.run());

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let req = format!(
            "GET http://127.0.0.1:{}/a HTTP/1.1\r\nHost: upstream.test\r\n\r\n",
            upstream_addr.port()
        );
        client.write_all(req.as_bytes()).await.unwrap();

        let mut response = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = client.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);
            if response.windows(4).any(|w| w == b"\r\n\r\n") && response.ends_with(b"hello") {
                break;
            }
        }

        let text = String::from_utf8(response).unwrap();
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.ends_with("hello"));
    }

    #[test]
    fn ca_material_loads() {
        let (ca_cert_pem, ca_key_pem) = test_ca();
        assert!(CertMinter::from_ca_pem(&ca_cert_pem, &ca_key_pem).is_ok());
        let mut buf = Vec::new();
        write!(buf, "{ca_cert_pem}").unwrap();
        assert!(!buf.is_empty());
    }
}
