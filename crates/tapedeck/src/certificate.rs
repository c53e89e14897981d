//! Local certificate authority used to impersonate origins during TLS interception.

use crate::error::ProxyError;
use crate::proxy::ensure_crypto_provider;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use time::{Duration, OffsetDateTime};
use tracing::info;

const CA_CERT_FILE: &str = "ca_cert.pem";
const CA_KEY_FILE: &str = "ca_key.pem";

/// Backdating for leaf certificates to tolerate clock skew
const NOT_BEFORE_OFFSET_SECS: i64 = 60;

pub struct CertificateAuthority {
    issuer: Issuer<'static, KeyPair>,
    cert_der: CertificateDer<'static>,
    cert_pem: String,
}

impl CertificateAuthority {
    /// Create a fresh CA that only lives in memory.
    pub fn generate() -> Result<Self, ProxyError> {
        let (cert_pem, key_pair) = Self::generate_ca()?;
        Self::from_parts(&cert_pem, key_pair)
    }

    /// Load `ca_cert.pem` / `ca_key.pem` from `dir`, generating and saving
    /// them first when either is missing.
    pub fn load_or_generate(dir: &Path) -> Result<Self, ProxyError> {
        let cert_path = dir.join(CA_CERT_FILE);
        let key_path = dir.join(CA_KEY_FILE);

        if cert_path.exists() && key_path.exists() {
            let cert_pem = fs::read_to_string(&cert_path)?;
            let key_pem = fs::read_to_string(&key_path)?;
            let key_pair = KeyPair::from_pem(&key_pem)
                .map_err(|e| ProxyError::Certificate(format!("Failed to parse CA key: {e}")))?;
            info!("Loaded CA certificate from {:?}", cert_path);
            return Self::from_parts(&cert_pem, key_pair);
        }

        fs::create_dir_all(dir)?;
        let (cert_pem, key_pair) = Self::generate_ca()?;
        fs::write(&cert_path, &cert_pem)?;
        fs::write(&key_path, key_pair.serialize_pem())?;
        info!("Generated CA certificate at {:?}", cert_path);
        Self::from_parts(&cert_pem, key_pair)
    }

    fn generate_ca() -> Result<(String, KeyPair), ProxyError> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "Tapedeck Recording Proxy CA");
        dn.push(DnType::OrganizationName, "Tapedeck");
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(3650);

        let key_pair = KeyPair::generate()
            .map_err(|e| ProxyError::Certificate(format!("Failed to generate CA key: {e}")))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| ProxyError::Certificate(format!("Failed to generate CA: {e}")))?;
        Ok((cert.pem(), key_pair))
    }

    fn from_parts(cert_pem: &str, key_pair: KeyPair) -> Result<Self, ProxyError> {
        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| ProxyError::Certificate("No certificate found in CA PEM".into()))?
            .map_err(|e| ProxyError::Certificate(format!("Failed to parse CA PEM: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(cert_pem, key_pair)
            .map_err(|e| ProxyError::Certificate(format!("Invalid CA certificate: {e}")))?;

        Ok(Self {
            issuer,
            cert_der,
            cert_pem: cert_pem.to_string(),
        })
    }

    /// CA certificate for clients to trust.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// Issue a leaf certificate for `host`, returning the chain and its key.
    pub fn issue(
        &self,
        host: &str,
    ) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ProxyError> {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;

        params.subject_alt_names = match host.parse::<IpAddr>() {
            Ok(ip) => vec![SanType::IpAddress(ip)],
            Err(_) => vec![SanType::DnsName(host.try_into().map_err(|_| {
                ProxyError::Certificate(format!("Invalid host name: {host}"))
            })?)],
        };

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::seconds(NOT_BEFORE_OFFSET_SECS);
        params.not_after = now + Duration::days(365);

        let key_pair = KeyPair::generate()
            .map_err(|e| ProxyError::Certificate(format!("Failed to generate key: {e}")))?;
        let cert = params
            .signed_by(&key_pair, &self.issuer)
            .map_err(|e| ProxyError::Certificate(format!("Failed to sign certificate: {e}")))?;

        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        Ok((
            vec![CertificateDer::from(cert.der().to_vec()), self.cert_der.clone()],
            key,
        ))
    }

    /// TLS server configuration presenting a certificate for `host`.
    pub fn server_config_for(&self, host: &str) -> Result<ServerConfig, ProxyError> {
        ensure_crypto_provider();
        let (chain, key) = self.issue(host)?;
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| ProxyError::Tls(format!("Failed to build TLS config for {host}: {e}")))?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Ok(config)
    }
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority").finish_non_exhaustive()
    }
}
