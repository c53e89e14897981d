//! Configuration types for tapedeck.

mod listen;
mod proxy;
mod tape;
mod upstream;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use listen::ListenConfig;
pub use proxy::{ProxyConfig, TlsConfig};
pub use tape::TapeConfig;
pub use upstream::{AuthConfig, UpstreamProxyConfig};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub tape: TapeConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        // MITM termination only forwards over direct connections
        if self.tls.enabled && self.proxy.upstream.is_some() {
            anyhow::bail!(
                "TLS interception cannot be combined with an upstream proxy. \
                 Disable 'tls.enabled' or remove 'proxy.upstream'"
            );
        }

        if let Some(ref auth) = self.proxy.auth {
            if auth.username.is_empty() || auth.password.is_empty() {
                anyhow::bail!("'proxy.auth' requires a non-empty username and password");
            }
        }

        if self.proxy.request_buffer_size == 0 {
            anyhow::bail!("'proxy.request_buffer_size' must be greater than zero");
        }

        if let Some(ref upstream) = self.proxy.upstream {
            if upstream.host.is_empty() || upstream.port == 0 {
                anyhow::bail!(
                    "Invalid upstream proxy '{}': host and port are required",
                    upstream.authority()
                );
            }
        }

        Ok(())
    }
}
