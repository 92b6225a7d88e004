//! End-to-end scenarios driving a real `ProxyEngine` against loopback
//! upstreams, mirroring the literal scenarios worked through module-by-module
//! in the inline `#[cfg(test)]` suites.

use std::io::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use rcgen::{CertificateParams, DnType, IsCa, KeyPair};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use wiretap::certs::CertMinter;
use wiretap::middleware::{from_request_modifier, from_response_modifier, ModifierPipeline};
use wiretap::reqlog::{MemoryRepository, RegexScope, RequestLogger, ProjectId};
use wiretap::server::ProxyEngine;

fn test_ca() -> (String, String) {
    let mut ca_params = CertificateParams::new(Vec::new()).unwrap();
    ca_params.distinguished_name.push(DnType::CommonName, "wiretap integration test CA");
    ca_params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    let ca_key = KeyPair::generate().unwrap();
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();
    (ca_cert.pem(), ca_key.serialize_pem())
}

/// Spins up a loopback HTTP/1.1 "upstream" that always answers the same
/// fixed response, closing after one request.
async fn spawn_fake_upstream(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.flush().await;
        }
    });
    addr
}

/// An upstream address nothing is listening on, to exercise the dial-failure
/// path without racing a real connection-refused on a live port.
async fn unreachable_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

struct Harness {
    proxy_addr: SocketAddr,
    logger: Arc<RequestLogger>,
}

async fn start_proxy(logger: Arc<RequestLogger>) -> Harness {
    let (ca_cert_pem, ca_key_pem) = test_ca();
    let minter = Arc::new(CertMinter::from_ca_pem(&ca_cert_pem, &ca_key_pem).unwrap());
    let pipeline = ModifierPipeline::new()
        .with_request_modifier(from_request_modifier(Arc::clone(&logger)))
        .with_response_modifier(from_response_modifier(Arc::clone(&logger)));

    let engine = ProxyEngine::bind("127.0.0.1:0", minter, pipeline).await.unwrap();
    let proxy_addr = engine.local_addr();
    tokio::spawn(engine.run());

    Harness { proxy_addr, logger }
}

async fn read_http_message(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match timeout(Duration::from_secs(2), stream.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                out.extend_from_slice(&buf[..n]);
                if let Some(header_end) = find_double_crlf(&out) {
                    let headers = String::from_utf8_lossy(&out[..header_end]);
                    if let Some(len) = content_length(&headers) {
                        if out.len() >= header_end + 4 + len {
                            break;
                        }
                        continue;
                    }
                    break;
                }
            }
            _ => break,
        }
    }
    out
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(headers: &str) -> Option<usize> {
    headers
        .lines()
        .find_map(|line| line.strip_prefix("Content-Length:").or_else(|| line.strip_prefix("content-length:")))
        .and_then(|v| v.trim().parse().ok())
}

#[tokio::test]
async fn passthrough_plain_get_with_no_active_project() {
    let upstream_addr =
        spawn_fake_upstream("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
    let repo = Arc::new(MemoryRepository::new());
    let logger = Arc::new(RequestLogger::new(Arc::clone(&repo) as _, Arc::new(RegexScope::new())));
    let harness = start_proxy(logger).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.unwrap();
    let req = format!(
        "GET http://127.0.0.1:{}/a HTTP/1.1\r\nHost: upstream.test\r\n\r\n",
        upstream_addr.port()
    );
    client.write_all(req.as_bytes()).await.unwrap();

    let raw = read_http_message(&mut client).await;
    let text = String::from_utf8(raw).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.ends_with("hello"));
    assert!(harness.logger.find_requests().await.is_empty());
}

#[tokio::test]
async fn logged_plain_get_with_active_project() {
    let upstream_addr =
        spawn_fake_upstream("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
    let repo = Arc::new(MemoryRepository::new());
    let logger = Arc::new(RequestLogger::new(Arc::clone(&repo) as _, Arc::new(RegexScope::new())));
    logger.set_active_project_id(ProjectId(7));
    let harness = start_proxy(Arc::clone(&logger)).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.unwrap();
    let req = format!(
        "GET http://127.0.0.1:{}/a HTTP/1.1\r\nHost: upstream.test\r\n\r\n",
        upstream_addr.port()
    );
    client.write_all(req.as_bytes()).await.unwrap();

    let raw = read_http_message(&mut client).await;
    let text = String::from_utf8(raw).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(text.ends_with("hello"));

    let requests = logger.find_requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method.as_str(), "GET");
    assert_eq!(requests[0].url.path(), "/a");

    // Response persistence happens on a detached task; give it a moment,
    // then confirm the correlation id is still resolvable.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(logger.find_by_id(requests[0].id).await.is_some());
}

#[tokio::test]
async fn out_of_scope_request_is_bypassed() {
    let upstream_addr =
        spawn_fake_upstream("HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
    let repo = Arc::new(MemoryRepository::new());
    let scope = Arc::new(RegexScope::new().with_url_pattern(regex::Regex::new("never-matches").unwrap()));
    let logger = Arc::new(RequestLogger::new(Arc::clone(&repo) as _, scope));
    logger.set_active_project_id(ProjectId(7));
    logger.set_bypass_out_of_scope(true);
    let harness = start_proxy(Arc::clone(&logger)).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.unwrap();
    let req = format!(
        "GET http://127.0.0.1:{}/a HTTP/1.1\r\nHost: upstream.test\r\n\r\n",
        upstream_addr.port()
    );
    client.write_all(req.as_bytes()).await.unwrap();

    let raw = read_http_message(&mut client).await;
    let text = String::from_utf8(raw).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(logger.find_requests().await.is_empty());
}

#[tokio::test]
async fn upstream_connection_refused_yields_bad_gateway() {
    let dead_addr = unreachable_upstream().await;
    let repo = Arc::new(MemoryRepository::new());
    let logger = Arc::new(RequestLogger::new(Arc::clone(&repo) as _, Arc::new(RegexScope::new())));
    let harness = start_proxy(logger).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.unwrap();
    let req = format!(
        "GET http://127.0.0.1:{}/a HTTP/1.1\r\nHost: upstream.test\r\n\r\n",
        dead_addr.port()
    );
    client.write_all(req.as_bytes()).await.unwrap();

    let raw = read_http_message(&mut client).await;
    let text = String::from_utf8(raw).unwrap();
    assert!(text.starts_with("HTTP/1.1 502"), "unexpected response: {text}");
}

#[tokio::test]
async fn gzipped_response_is_decoded_for_the_client() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"world").unwrap();
    let gz_body = encoder.finish().unwrap();

    let mut raw_response = Vec::new();
    raw_response.extend_from_slice(b"HTTP/1.1 200 OK\r\n");
    raw_response.extend_from_slice(b"Content-Encoding: gzip\r\n");
    raw_response.extend_from_slice(format!("Content-Length: {}\r\n\r\n", gz_body.len()).as_bytes());
    raw_response.extend_from_slice(&gz_body);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(&raw_response).await;
            let _ = stream.flush().await;
        }
    });

    let repo = Arc::new(MemoryRepository::new());
    let logger = Arc::new(RequestLogger::new(Arc::clone(&repo) as _, Arc::new(RegexScope::new())));
    logger.set_active_project_id(ProjectId(1));
    let harness = start_proxy(Arc::clone(&logger)).await;

    let mut client = TcpStream::connect(harness.proxy_addr).await.unwrap();
    let req = format!(
        "GET http://127.0.0.1:{}/a HTTP/1.1\r\nHost: upstream.test\r\n\r\n",
        upstream_addr.port()
    );
    client.write_all(req.as_bytes()).await.unwrap();

    let raw = read_http_message(&mut client).await;
    let text = String::from_utf8(raw).unwrap();
    assert!(text.starts_with("HTTP/1.1 200"));
    assert!(!text.contains("Content-Encoding"));
    assert!(text.ends_with("world"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let requests = logger.find_requests().await;
    assert_eq!(requests.len(), 1);
}

#[tokio::test]
async fn connect_tunnel_terminates_tls_with_minted_certificate() {
    let upstream_addr =
        spawn_fake_upstream("HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n").await;

    let repo = Arc::new(MemoryRepository::new());
    let logger = Arc::new(RequestLogger::new(Arc::clone(&repo) as _, Arc::new(RegexScope::new())));
    let (ca_cert_pem, ca_key_pem) = test_ca();
    let minter = Arc::new(CertMinter::from_ca_pem(&ca_cert_pem, &ca_key_pem).unwrap());
    let pipeline = ModifierPipeline::new()
        .with_request_modifier(from_request_modifier(Arc::clone(&logger)))
        .with_response_modifier(from_response_modifier(Arc::clone(&logger)));
    let engine = ProxyEngine::bind("127.0.0.1:0", minter, pipeline).await.unwrap();
    let proxy_addr = engine.local_addr();
    tokio::spawn(engine.run());

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client
        .write_all(b"CONNECT secure.test:443 HTTP/1.1\r\nHost: secure.test:443\r\n\r\n")
        .await
        .unwrap();

    let mut connect_reply = [0u8; 256];
    let n = client.read(&mut connect_reply).await.unwrap();
    let reply_text = String::from_utf8_lossy(&connect_reply[..n]);
    assert!(reply_text.starts_with("HTTP/1.1 200"), "unexpected CONNECT reply: {reply_text}");

    // Trust the test CA to validate the minted leaf certificate.
    let mut root_store = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut ca_cert_pem.as_bytes()) {
        root_store.add(cert.unwrap()).unwrap();
    }
    let client_config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));
    let server_name = ServerName::try_from("secure.test").unwrap();
    let mut tls_stream = connector.connect(server_name, client).await.unwrap();

    // Absolute-form target inside the tunnel bypasses the tunnel's
    // https-by-default resolution and reaches the plain-HTTP fake upstream.
    let inner_req = format!(
        "GET http://127.0.0.1:{}/x HTTP/1.1\r\nHost: upstream.test\r\n\r\n",
        upstream_addr.port()
    );
    tls_stream.write_all(inner_req.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match timeout(Duration::from_secs(2), tls_stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(n)) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            Ok(Err(_)) => break,
        }
    }
    let text = String::from_utf8_lossy(&buf);
    assert!(text.starts_with("HTTP/1.1 204"), "unexpected response over tunnel: {text}");
}
