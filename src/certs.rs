//! On-the-fly leaf certificate minting for TLS interception.
//!
//! When the proxy terminates a client's CONNECT tunnel, it has to present a
//! certificate for the target host — one the client will actually trust,
//! which means signing it with a CA the client has been configured to
//! trust. [`CertMinter`] mints and caches one such leaf certificate per
//! host, signed by a locally-held CA keypair, and plugs directly into
//! rustls's SNI-based certificate resolution via [`ResolvesServerCert`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rcgen::{CertificateParams, Issuer, KeyPair};
use rustls::crypto::ring::sign::any_supported_type;
use rustls::pki_types::PrivateKeyDer;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use thiserror::Error;

/// How long a minted leaf certificate stays cached before it is considered
/// expired and re-minted. `rustls::sign::CertifiedKey` does not expose the
/// underlying certificate's `notAfter`, so rather than re-parsing the DER on
/// every lookup the minter tracks its own mint time and a fixed validity
/// window.
const LEAF_VALIDITY: Duration = Duration::from_secs(3600);

struct CachedLeaf {
    key: Arc<CertifiedKey>,
    minted_at: Instant,
}

impl CachedLeaf {
    fn is_expired(&self) -> bool {
        self.minted_at.elapsed() >= LEAF_VALIDITY
    }
}

#[derive(Debug, Error)]
pub enum CertMinterError {
    #[error("failed to parse CA certificate PEM: {0}")]
    CaCert(rcgen::Error),

    #[error("failed to parse CA private key PEM: {0}")]
    CaKey(rcgen::Error),

    #[error("failed to mint leaf certificate for {host}: {source}")]
    Mint { host: String, source: rcgen::Error },

    #[error("failed to build a signing key from the minted certificate: {0}")]
    SigningKey(rustls::Error),
}

/// A CA keypair used to sign freshly minted leaf certificates, plus a cache
/// of certificates already minted for hosts seen earlier in the process's
/// lifetime.
pub struct CertMinter {
    issuer: Issuer<'static, KeyPair>,
    cache: Mutex<HashMap<String, CachedLeaf>>,
}

impl CertMinter {
    /// Loads the proxy's root CA from PEM-encoded certificate and private
    /// key material.
    pub fn from_ca_pem(ca_cert_pem: &str, ca_key_pem: &str) -> Result<Self, CertMinterError> {
        // Idempotent: a consumer embedding this crate alongside its own TLS
        // setup may have already installed a provider, in which case this
        // is a harmless no-op.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let ca_key_pair = KeyPair::from_pem(ca_key_pem).map_err(CertMinterError::CaKey)?;
        let ca_params =
            CertificateParams::from_ca_cert_pem(ca_cert_pem).map_err(CertMinterError::CaCert)?;
        let issuer = Issuer::new(ca_params, ca_key_pair);

        Ok(Self { issuer, cache: Mutex::new(HashMap::new()) })
    }

    /// Mints (or returns a cached, still-valid) leaf certificate for `host`,
    /// for use as a TLS server certificate presented to clients.
    pub fn certificate_for(&self, host: &str) -> Result<Arc<CertifiedKey>, CertMinterError> {
        if let Some(cached) = self.cache.lock().unwrap().get(host) {
            if !cached.is_expired() {
                return Ok(Arc::clone(&cached.key));
            }
        }

        let certified_key = Arc::new(self.mint(host)?);
        self.cache.lock().unwrap().insert(
            host.to_owned(),
            CachedLeaf { key: Arc::clone(&certified_key), minted_at: Instant::now() },
        );
        Ok(certified_key)
    }

    fn mint(&self, host: &str) -> Result<CertifiedKey, CertMinterError> {
        let leaf_key = KeyPair::generate().map_err(|e| CertMinterError::Mint {
            host: host.to_owned(),
            source: e,
        })?;
        let leaf_params = CertificateParams::new(vec![host.to_owned()]).map_err(|e| {
            CertMinterError::Mint { host: host.to_owned(), source: e }
        })?;
        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &self.issuer)
            .map_err(|e| CertMinterError::Mint { host: host.to_owned(), source: e })?;

        let key_der = PrivateKeyDer::try_from(leaf_key.serialize_der())
            .map_err(|e| CertMinterError::SigningKey(rustls::Error::General(e.to_string())))?;
        let signing_key = any_supported_type(&key_der).map_err(CertMinterError::SigningKey)?;

        Ok(CertifiedKey::new(vec![leaf_cert.der().clone()], signing_key))
    }
}

impl std::fmt::Debug for CertMinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertMinter")
            .field("cached_hosts", &self.cache.lock().unwrap().len())
            .finish()
    }
}

impl ResolvesServerCert for CertMinter {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let host = client_hello.server_name()?;
        match self.certificate_for(host) {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::warn!(host, error = %err, "failed to mint leaf certificate");
                None
            }
        }
    }
}

/// A certificate resolver bound to one CONNECT tunnel: it signs for the
/// ClientHello's SNI when present, falling back to the CONNECT request's
/// authority when the client skipped sending one. `rustls::ServerConfig`
/// only carries a single `Arc<dyn ResolvesServerCert>`, shared across every
/// connection that config serves — since the fallback host is specific to
/// one tunnel, the engine builds one of these (and therefore one
/// `ServerConfig`) per CONNECT rather than reusing a single server config
/// process-wide.
pub struct SniOrFallbackResolver {
    minter: Arc<CertMinter>,
    fallback_host: String,
}

impl SniOrFallbackResolver {
    pub fn new(minter: Arc<CertMinter>, fallback_host: String) -> Self {
        Self { minter, fallback_host }
    }
}

impl ResolvesServerCert for SniOrFallbackResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let host = client_hello.server_name().unwrap_or(&self.fallback_host);
        match self.minter.certificate_for(host) {
            Ok(key) => Some(key),
            Err(err) => {
                tracing::warn!(host, error = %err, "failed to mint leaf certificate");
                None
            }
        }
    }
}
