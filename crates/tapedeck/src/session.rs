//! Session lifecycle: which tape is playing and whether the proxy is up.
//!
//! A [`Recorder`] owns one proxy instance and the tape store. Test harnesses
//! and the CLI call [`Recorder::start`] when a session begins and
//! [`Recorder::stop`] when it ends; the proxy reads the inserted tape through
//! the shared [`ActiveTape`] slot.

use crate::certificate::CertificateAuthority;
use crate::config::Config;
use crate::error::{ProxyError, SessionError, TapeError};
use crate::overrides::{OverrideTarget, ProxyEnvOverride, SystemOverride, TrustEnvOverride};
use crate::proxy::{ProxyHandle, ProxyServer};
use crate::tape::{MatchRule, Tape, TapeMode, TapeStore};
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Slot holding the tape the proxy currently serves from.
///
/// Clones share the slot. Readers take their own `Arc` to the tape, so an
/// eject never pulls the tape out from under a request in flight.
#[derive(Debug, Clone, Default)]
pub struct ActiveTape {
    slot: Arc<RwLock<Option<Arc<Tape>>>>,
}

impl ActiveTape {
    pub fn current(&self) -> Option<Arc<Tape>> {
        self.slot.read().clone()
    }

    /// Insert `tape`. Fails if another tape is already inserted.
    pub fn insert(&self, tape: Arc<Tape>) -> Result<(), SessionError> {
        let mut slot = self.slot.write();
        if let Some(existing) = slot.as_ref() {
            return Err(SessionError::TapeAlreadyInserted(existing.name().to_string()));
        }
        info!("Inserted tape '{}' in {} mode", tape.name(), tape.mode());
        *slot = Some(tape);
        Ok(())
    }

    pub fn eject(&self) -> Option<Arc<Tape>> {
        let tape = self.slot.write().take();
        if let Some(ref tape) = tape {
            info!("Ejected tape '{}'", tape.name());
        }
        tape
    }
}

/// Per-session overrides of the tape's stored settings.
#[derive(Debug, Clone, Default)]
pub struct TapeOptions {
    pub mode: Option<TapeMode>,
    pub match_rule: Option<MatchRule>,
}

impl TapeOptions {
    pub fn with_mode(mut self, mode: TapeMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_match_rule(mut self, rule: MatchRule) -> Self {
        self.match_rule = Some(rule);
        self
    }
}

/// Coordinates the proxy, the tape store and the system overrides.
pub struct Recorder {
    config: Config,
    store: TapeStore,
    active: ActiveTape,
    ca: Option<Arc<CertificateAuthority>>,
    server: tokio::sync::Mutex<Option<ProxyHandle>>,
    addr: RwLock<Option<SocketAddr>>,
    overrides: Mutex<Vec<Box<dyn SystemOverride>>>,
}

impl Recorder {
    /// Build a recorder from an already validated configuration.
    ///
    /// With TLS interception enabled the CA is loaded from (or generated
    /// into) `tls.ca_dir`, or kept in memory when no directory is set.
    pub fn new(config: Config) -> Result<Self, SessionError> {
        let store = TapeStore::new(config.tape.root.clone())
            .with_default_mode(config.tape.default_mode)
            .with_default_match_rule(config.tape.match_rule.clone());

        let ca = if config.tls.enabled {
            let ca = match config.tls.ca_dir {
                Some(ref dir) => CertificateAuthority::load_or_generate(dir)?,
                None => CertificateAuthority::generate()?,
            };
            Some(Arc::new(ca))
        } else {
            None
        };

        let mut overrides: Vec<Box<dyn SystemOverride>> = Vec::new();
        if config.proxy.override_system_proxy {
            overrides.push(Box::new(ProxyEnvOverride::new()));
            if ca.is_some() {
                overrides.push(Box::new(TrustEnvOverride::new()));
            }
        }

        Ok(Self {
            config,
            store,
            active: ActiveTape::default(),
            ca,
            server: tokio::sync::Mutex::new(None),
            addr: RwLock::new(None),
            overrides: Mutex::new(overrides),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &TapeStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.addr.read().is_some()
    }

    /// Address the proxy listens on, once started.
    pub fn proxy_addr(&self) -> Option<SocketAddr> {
        *self.addr.read()
    }

    pub fn current_tape(&self) -> Option<Arc<Tape>> {
        self.active.current()
    }

    /// PEM of the CA clients must trust for intercepted HTTPS.
    pub fn ca_cert_pem(&self) -> Option<&str> {
        self.ca.as_deref().map(CertificateAuthority::cert_pem)
    }

    /// Start the proxy and apply the system overrides.
    pub async fn start_server(&self) -> Result<SocketAddr, SessionError> {
        let mut server = self.server.lock().await;
        if server.is_some() {
            return Err(SessionError::ProxyAlreadyRunning);
        }

        let proxy = ProxyServer::new(&self.config, self.active.clone(), self.ca.clone())?;
        let handle = proxy
            .start()
            .await
            .map_err(|e| SessionError::PortBindFailed(e.to_string()))?;
        let addr = handle.addr();

        if let Err(e) = self.activate_overrides(addr) {
            error!("Failed to apply system overrides: {}", e);
            self.deactivate_overrides();
            handle.shutdown().await;
            return Err(ProxyError::Io(e).into());
        }

        *server = Some(handle);
        *self.addr.write() = Some(addr);
        Ok(addr)
    }

    /// Revert the system overrides and stop the proxy.
    pub async fn stop_server(&self) -> Result<(), SessionError> {
        let handle = self
            .server
            .lock()
            .await
            .take()
            .ok_or(SessionError::ProxyNotRunning)?;

        self.deactivate_overrides();
        *self.addr.write() = None;
        handle.shutdown().await;
        Ok(())
    }

    /// Begin a session on tape `name`.
    ///
    /// A missing tape is created only when the session mode can record.
    /// Any failure after the proxy was started here stops it again.
    pub async fn start(&self, name: &str, options: TapeOptions) -> Result<Arc<Tape>, SessionError> {
        if let Some(current) = self.active.current() {
            return Err(SessionError::TapeAlreadyInserted(current.name().to_string()));
        }

        let started = if self.config.proxy.create_on_startup && !self.is_running() {
            self.start_server().await?;
            true
        } else {
            false
        };

        let inserted = self.open_tape(name, &options).and_then(|tape| {
            let tape = Arc::new(tape);
            self.active.insert(Arc::clone(&tape))?;
            Ok(tape)
        });

        if inserted.is_err() && started {
            if let Err(e) = self.stop_server().await {
                warn!("Failed to stop proxy after session start failed: {}", e);
            }
        }
        inserted
    }

    /// End the session: save the tape if it changed, then eject it.
    ///
    /// Returns whether the tape file was written. When the proxy is tied to
    /// the session it is stopped first, so requests still in flight finish
    /// against the tape before it is saved. Requests that complete after the
    /// save are answered but no longer recorded.
    ///
    /// If saving fails the tape stays inserted and [`Recorder::flush`] or
    /// another `stop` can retry.
    pub async fn stop(&self) -> Result<bool, SessionError> {
        if self.config.proxy.create_on_startup && self.is_running() {
            self.stop_server().await?;
        }

        let Some(tape) = self.active.current() else {
            return Ok(false);
        };
        let saved = self.store.close(&tape).map_err(|e| {
            error!("Failed to save tape '{}', keeping it inserted: {}", tape.name(), e);
            e
        })?;
        self.active.eject();
        Ok(saved)
    }

    /// Save the inserted tape if it has unsaved interactions.
    pub fn flush(&self) -> Result<bool, SessionError> {
        match self.active.current() {
            Some(tape) => Ok(self.store.save(&tape)?),
            None => Ok(false),
        }
    }

    fn open_tape(&self, name: &str, options: &TapeOptions) -> Result<Tape, SessionError> {
        let tape = match self.store.load(name) {
            Ok(tape) => tape,
            Err(TapeError::TapeNotFound(_)) => {
                let mode = options.mode.unwrap_or(self.config.tape.default_mode);
                if !mode.is_writable() {
                    return Err(TapeError::TapeNotFound(name.to_string()).into());
                }
                info!("Creating tape '{}'", name);
                Tape::new(name, mode, self.config.tape.match_rule.clone())
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(mode) = options.mode {
            tape.set_mode(mode);
        }
        if let Some(ref rule) = options.match_rule {
            tape.set_match_rule(rule.clone());
        }
        Ok(tape)
    }

    fn activate_overrides(&self, addr: SocketAddr) -> std::io::Result<()> {
        let mut overrides = self.overrides.lock();
        if overrides.is_empty() {
            return Ok(());
        }

        let host = if addr.ip().is_unspecified() {
            "127.0.0.1".to_string()
        } else {
            addr.ip().to_string()
        };
        let target = OverrideTarget {
            host,
            port: addr.port(),
            exclusions: self.config.proxy.effective_ignore_hosts(),
            ca_cert_pem: self.ca_cert_pem().map(str::to_string),
        };
        for system_override in overrides.iter_mut() {
            system_override.activate(&target)?;
        }
        Ok(())
    }

    fn deactivate_overrides(&self) {
        for system_override in self.overrides.lock().iter_mut().rev() {
            if let Err(e) = system_override.deactivate() {
                warn!("Failed to revert system override: {}", e);
            }
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.deactivate_overrides();
    }
}
