//! `wiretap` — the intercepting-proxy binary.
//!
//! Wires the CLI config into a [`CertMinter`], a [`MemoryRepository`]-backed
//! [`RequestLogger`], and a [`ModifierPipeline`] carrying just that logger,
//! then runs the [`ProxyEngine`]. Anything richer (a real persistence
//! backend, a scope rule engine driven by user-authored rules, the admin
//! API) lives outside this crate's scope.

use std::sync::Arc;

use clap::Parser;
use wiretap::certs::CertMinter;
use wiretap::config::Config;
use wiretap::middleware::{ModifierPipeline, from_request_modifier, from_response_modifier};
use wiretap::reqlog::{MemoryRepository, RegexScope, RequestLogger};
use wiretap::server::ProxyEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();

    let ca_cert_pem = std::fs::read_to_string(&config.ca_cert)?;
    let ca_key_pem = std::fs::read_to_string(&config.ca_key)?;
    let cert_minter = Arc::new(CertMinter::from_ca_pem(&ca_cert_pem, &ca_key_pem)?);

    let repository = Arc::new(MemoryRepository::new());
    let scope = Arc::new(RegexScope::new());
    let logger = Arc::new(RequestLogger::new(repository, scope));
    logger.set_active_project_id(config.active_project_id());
    logger.set_bypass_out_of_scope(config.bypass_out_of_scope);

    let pipeline = ModifierPipeline::new()
        .with_request_modifier(from_request_modifier(Arc::clone(&logger)))
        .with_response_modifier(from_response_modifier(logger));

    let engine = ProxyEngine::bind(&config.listen, cert_minter, pipeline).await?;
    tracing::info!(addr = %engine.local_addr(), "wiretap proxy starting");
    engine.run().await?;

    Ok(())
}
