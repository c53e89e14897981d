//! Interception behavior and TLS configuration.

use super::upstream::{AuthConfig, UpstreamProxyConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Idle client timeout and upstream request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Largest request body buffered for matching and forwarding
    #[serde(default = "default_request_buffer_size")]
    pub request_buffer_size: usize,
    /// Start the proxy with a session and stop it when the session ends
    #[serde(default = "default_true")]
    pub create_on_startup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamProxyConfig>,
    /// Hosts (wildcards allowed) that are never intercepted over TLS and are
    /// excluded from the system proxy override
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_hosts: Vec<String>,
    /// Add localhost and loopback addresses to `ignore_hosts`
    #[serde(default)]
    pub ignore_localhost: bool,
    /// Point the process proxy environment at tapedeck while it runs
    #[serde(default)]
    pub override_system_proxy: bool,
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_request_buffer_size() -> usize {
    8 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            request_buffer_size: default_request_buffer_size(),
            create_on_startup: true,
            auth: None,
            upstream: None,
            ignore_hosts: Vec::new(),
            ignore_localhost: false,
            override_system_proxy: false,
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Ignore list with the loopback names added when `ignore_localhost` is set.
    pub fn effective_ignore_hosts(&self) -> Vec<String> {
        let mut hosts = self.ignore_hosts.clone();
        if self.ignore_localhost {
            for host in ["localhost", "127.0.0.1", "::1"] {
                if !hosts.iter().any(|h| h == host) {
                    hosts.push(host.to_string());
                }
            }
        }
        hosts
    }
}

/// TLS interception settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Terminate CONNECT tunnels with certificates from the local CA
    #[serde(default)]
    pub enabled: bool,
    /// Directory holding `ca_cert.pem` and `ca_key.pem`; generated when missing.
    /// Without it a fresh in-memory CA is created on every start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_dir: Option<PathBuf>,
    /// Skip certificate verification for upstream HTTPS
    #[serde(default)]
    pub upstream_skip_verify: bool,
}
