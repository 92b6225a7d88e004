//! # wiretap
//!
//! An HTTP(S) intercepting proxy: it accepts client traffic, transparently
//! man-in-the-middles TLS using a user-supplied certificate authority,
//! forwards requests upstream, and exposes every request and response to a
//! pluggable modifier pipeline. A request logger sits on that pipeline and
//! records in-flight traffic, filtered by project activation and
//! scope-matching rules.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wiretap::certs::CertMinter;
//! use wiretap::middleware::ModifierPipeline;
//! use wiretap::reqlog::{MemoryRepository, RegexScope, RequestLogger};
//! use wiretap::server::ProxyEngine;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ca_cert_pem = std::fs::read_to_string("ca.pem")?;
//!     let ca_key_pem = std::fs::read_to_string("ca-key.pem")?;
//!     let minter = Arc::new(CertMinter::from_ca_pem(&ca_cert_pem, &ca_key_pem)?);
//!
//!     let logger = Arc::new(RequestLogger::new(
//!         Arc::new(MemoryRepository::new()),
//!         Arc::new(RegexScope::new()),
//!     ));
//!     let pipeline = ModifierPipeline::new()
//!         .with_request_modifier(wiretap::middleware::from_request_modifier(logger.clone()))
//!         .with_response_modifier(wiretap::middleware::from_response_modifier(logger));
//!
//!     let engine = ProxyEngine::bind("127.0.0.1:8080", minter, pipeline).await?;
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```

pub mod body;
pub mod certs;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod once_listener;
pub mod reqlog;
pub mod server;

pub use context::RequestContext;
pub use http::{Headers, HttpRequest, HttpResponse, Method, ProxyUrl, StatusCode};
pub use middleware::ModifierPipeline;
pub use server::{ProxyEngine, ProxyError};
