//! Upstream proxy and proxy authentication configuration.

use serde::{Deserialize, Serialize};

/// A single upstream proxy that all forwarded traffic is chained through.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UpstreamProxyConfig {
    pub host: String,
    pub port: u16,
}

impl UpstreamProxyConfig {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Credentials required from clients in `Proxy-Authorization: Basic`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}
