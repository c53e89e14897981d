//! Process-wide overrides that route clients through a running proxy.
//!
//! Overrides mutate the environment of the current process. Each one
//! remembers what it replaced and puts it back on deactivation, so activate
//! and deactivate must be paired. Both calls are idempotent.

use std::env;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info};

/// Where overridden clients should be sent.
#[derive(Debug, Clone)]
pub struct OverrideTarget {
    pub host: String,
    pub port: u16,
    /// Hosts that must bypass the proxy
    pub exclusions: Vec<String>,
    /// CA certificate clients must trust, when TLS interception is on
    pub ca_cert_pem: Option<String>,
}

impl OverrideTarget {
    pub fn proxy_url(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("http://[{}]:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

pub trait SystemOverride: Send {
    fn activate(&mut self, target: &OverrideTarget) -> io::Result<()>;

    /// Restore what `activate` replaced. Safe to call when not active.
    fn deactivate(&mut self) -> io::Result<()>;

    fn is_active(&self) -> bool;
}

/// Saved values of a set of environment variables.
#[derive(Debug, Default)]
struct SavedEnv(Vec<(&'static str, Option<String>)>);

impl SavedEnv {
    fn capture(names: &[&'static str]) -> Self {
        Self(names.iter().map(|name| (*name, env::var(name).ok())).collect())
    }

    fn restore(self) {
        for (name, value) in self.0 {
            match value {
                Some(value) => env::set_var(name, value),
                None => env::remove_var(name),
            }
        }
    }
}

const PROXY_VARS: [&str; 6] = [
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "http_proxy",
    "https_proxy",
    "no_proxy",
];

/// Points the standard proxy environment variables at the proxy.
#[derive(Debug, Default)]
pub struct ProxyEnvOverride {
    saved: Option<SavedEnv>,
}

impl ProxyEnvOverride {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SystemOverride for ProxyEnvOverride {
    fn activate(&mut self, target: &OverrideTarget) -> io::Result<()> {
        if self.saved.is_some() {
            return Ok(());
        }
        self.saved = Some(SavedEnv::capture(&PROXY_VARS));

        let url = target.proxy_url();
        let no_proxy = target.exclusions.join(",");
        for name in ["HTTP_PROXY", "http_proxy", "HTTPS_PROXY", "https_proxy"] {
            env::set_var(name, &url);
        }
        for name in ["NO_PROXY", "no_proxy"] {
            env::set_var(name, &no_proxy);
        }

        info!("Proxy environment now points at {}", url);
        Ok(())
    }

    fn deactivate(&mut self) -> io::Result<()> {
        if let Some(saved) = self.saved.take() {
            saved.restore();
            debug!("Proxy environment restored");
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}

/// Points `SSL_CERT_FILE` at a file holding the proxy's CA certificate.
#[derive(Debug, Default)]
pub struct TrustEnvOverride {
    saved: Option<SavedEnv>,
    file: Option<tempfile::TempPath>,
}

impl TrustEnvOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Certificate file in use while active
    pub fn cert_path(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|path| path.to_path_buf())
    }
}

impl SystemOverride for TrustEnvOverride {
    fn activate(&mut self, target: &OverrideTarget) -> io::Result<()> {
        if self.saved.is_some() {
            return Ok(());
        }
        let Some(pem) = target.ca_cert_pem.as_deref() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no CA certificate to trust",
            ));
        };

        let mut file = tempfile::Builder::new()
            .prefix("tapedeck-ca-")
            .suffix(".pem")
            .tempfile()?;
        io::Write::write_all(&mut file, pem.as_bytes())?;
        let path = file.into_temp_path();

        self.saved = Some(SavedEnv::capture(&["SSL_CERT_FILE"]));
        env::set_var("SSL_CERT_FILE", &path);
        info!("Trusting proxy CA via SSL_CERT_FILE={:?}", &*path);
        self.file = Some(path);
        Ok(())
    }

    fn deactivate(&mut self) -> io::Result<()> {
        if let Some(saved) = self.saved.take() {
            saved.restore();
            debug!("SSL_CERT_FILE restored");
        }
        if let Some(path) = self.file.take() {
            path.close()?;
        }
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}
