//! ProxyServer, its shared state, and the accept loop.

use super::client::UpstreamClient;
use super::handler::Target;
use super::network::bind_listener;
use super::pipeline::Pipeline;
use super::service::serve;
use super::tls::MitmAcceptor;
use crate::certificate::CertificateAuthority;
use crate::config::{AuthConfig, Config, UpstreamProxyConfig};
use crate::error::ProxyError;
use crate::session::ActiveTape;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Extra time connections get to finish after the upstream timeout
const DRAIN_MARGIN: Duration = Duration::from_secs(1);

/// State shared by every connection of one proxy instance.
pub struct ProxyState {
    pub(crate) active_tape: ActiveTape,
    pub(crate) client: UpstreamClient,
    pub(crate) mitm: Option<Arc<MitmAcceptor>>,
    pub(crate) auth: Option<AuthConfig>,
    pub(crate) upstream_proxy: Option<UpstreamProxyConfig>,
    pub(crate) timeout: Duration,
    pub(crate) request_buffer_size: usize,
    pub(crate) pipeline: Pipeline,
}

impl ProxyState {
    pub fn new(
        config: &Config,
        active_tape: ActiveTape,
        ca: Option<Arc<CertificateAuthority>>,
    ) -> Self {
        let mitm = match (config.tls.enabled, ca) {
            (true, Some(ca)) => Some(Arc::new(MitmAcceptor::new(
                ca,
                &config.proxy.effective_ignore_hosts(),
            ))),
            (true, None) => {
                warn!("TLS interception enabled without a certificate authority; tunneling instead");
                None
            }
            (false, _) => None,
        };

        Self {
            active_tape,
            client: UpstreamClient::from_config(config),
            mitm,
            auth: config.proxy.auth.clone(),
            upstream_proxy: config.proxy.upstream.clone(),
            timeout: config.proxy.timeout(),
            request_buffer_size: config.proxy.request_buffer_size,
            pipeline: Pipeline::standard(),
        }
    }
}

/// The main proxy server struct.
pub struct ProxyServer {
    host: String,
    port: u16,
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a proxy serving requests against `active_tape`.
    ///
    /// With TLS interception enabled and no `ca` given, a throwaway in-memory
    /// CA is generated.
    pub fn new(
        config: &Config,
        active_tape: ActiveTape,
        ca: Option<Arc<CertificateAuthority>>,
    ) -> Result<Self, ProxyError> {
        let ca = match ca {
            Some(ca) => Some(ca),
            None if config.tls.enabled => Some(Arc::new(CertificateAuthority::generate()?)),
            None => None,
        };

        Ok(Self {
            host: config.listen.host.clone(),
            port: config.listen.port,
            state: Arc::new(ProxyState::new(config, active_tape, ca)),
        })
    }

    /// Bind the listener and start accepting connections in the background.
    pub async fn start(self) -> std::io::Result<ProxyHandle> {
        let listener = bind_listener(&self.host, self.port).await?;
        let addr = listener.local_addr()?;

        // Subscribed before the spawn so a shutdown sent right away is not lost
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(accept_loop(
            listener,
            self.state,
            shutdown_tx.clone(),
            shutdown_rx,
        ));

        info!("Proxy listening on http://{}", addr);
        Ok(ProxyHandle {
            addr,
            shutdown_tx,
            task,
        })
    }
}

/// Accept until shutdown, then wait for open connections to finish their
/// in-flight requests.
async fn accept_loop(
    listener: TcpListener,
    state: Arc<ProxyState>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let state = Arc::clone(&state);
                        let shutdown_rx = shutdown_tx.subscribe();
                        connections.spawn(serve_client(state, stream, peer, shutdown_rx));
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.recv() => {
                debug!("Accept loop shutting down");
                break;
            }
        }
    }
    drop(listener);

    // An in-flight request is bounded by the upstream timeout
    let grace = state.timeout + DRAIN_MARGIN;
    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "{} connections still open after {:?}, closing them",
            connections.len(),
            grace
        );
        connections.abort_all();
    }
}

/// Serve one client connection until it closes, idles out, or the proxy stops.
async fn serve_client(
    state: Arc<ProxyState>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let _ = stream.set_nodelay(true);
    let io = TokioIo::new(stream);
    let timeout = state.timeout;
    let service = service_fn(move |req| serve(Arc::clone(&state), req, Target::Direct));

    let conn = http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(timeout)
        .keep_alive(true)
        .serve_connection(io, service)
        .with_upgrades();
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_rx.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(err) = result {
        debug!("Error serving connection from {}: {}", peer, err);
    }
}

/// Running proxy. Dropping it leaves the proxy running; call [`ProxyHandle::shutdown`].
pub struct ProxyHandle {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl ProxyHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting, close idle connections, and wait until requests in
    /// flight on plain connections have been answered.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Proxy on {} already stopped accepting", self.addr);
        }
        if let Err(e) = self.task.await {
            error!("Proxy accept loop failed: {}", e);
        }
        info!("Proxy on {} stopped", self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn started() -> ProxyHandle {
        ProxyServer::new(&Config::default(), ActiveTape::default(), None)
            .unwrap()
            .start()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_immediate_shutdown_completes() {
        let handle = started().await;
        assert_ne!(handle.addr().port(), 0);

        let stopped = tokio::time::timeout(Duration::from_secs(5), handle.shutdown()).await;
        assert!(stopped.is_ok(), "shutdown did not finish");
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_on_idle_connections() {
        let handle = started().await;
        let idle = TcpStream::connect(handle.addr()).await.unwrap();
        // Let the accept loop pick the connection up
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(5), handle.shutdown()).await;
        assert!(stopped.is_ok(), "shutdown waited on an idle connection");
        drop(idle);
    }
}
