//! TLS utilities for the proxy server.
//!
//! This module provides the per-host acceptor cache used for TLS interception
//! and a no-op certificate verifier for upstreams with self-signed certificates.

use crate::certificate::CertificateAuthority;
use crate::error::ProxyError;
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, ServerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::debug;
use wildmatch::WildMatch;

/// Install ring as the process-wide rustls provider.
///
/// Both ring and aws-lc-rs are compiled in through the dependency graph, so
/// rustls cannot pick one on its own. Installing twice is harmless.
pub fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// No-op certificate verifier for development/testing with self-signed certificates.
///
/// # Warning
/// This disables all TLS security checks - use only in development!
#[derive(Debug)]
pub struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}

/// Terminates intercepted tunnels as the origin host.
pub struct MitmAcceptor {
    ca: Arc<CertificateAuthority>,
    ignore: Vec<WildMatch>,
    configs: Mutex<HashMap<String, Arc<ServerConfig>>>,
}

impl MitmAcceptor {
    pub fn new(ca: Arc<CertificateAuthority>, ignore_hosts: &[String]) -> Self {
        Self {
            ca,
            ignore: ignore_hosts
                .iter()
                .map(|h| WildMatch::new(&h.to_ascii_lowercase()))
                .collect(),
            configs: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a CONNECT to `host` should be terminated rather than tunneled.
    pub fn should_intercept(&self, host: &str) -> bool {
        let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
        !self.ignore.iter().any(|pattern| pattern.matches(&host))
    }

    /// Acceptor presenting a certificate for `host`, issued on first use.
    pub fn acceptor_for(&self, host: &str) -> Result<TlsAcceptor, ProxyError> {
        let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
        let mut configs = self.configs.lock();
        let config = match configs.get(&host) {
            Some(config) => Arc::clone(config),
            None => {
                debug!("Issuing interception certificate for {}", host);
                let config = Arc::new(self.ca.server_config_for(&host)?);
                configs.insert(host, Arc::clone(&config));
                config
            }
        };
        Ok(TlsAcceptor::from(config))
    }

    pub fn cached_hosts(&self) -> usize {
        self.configs.lock().len()
    }
}
