//! CONNECT handling: TLS interception or opaque tunneling.

use super::forwarding::{empty, error_response};
use super::handler::Target;
use super::server::ProxyState;
use super::service::serve;
use super::ProxyBody;
use crate::config::UpstreamProxyConfig;
use crate::error::ProxyError;
use crate::metrics;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// Largest CONNECT response head accepted from the upstream proxy
const MAX_CONNECT_RESPONSE: usize = 16 * 1024;

/// Answer a CONNECT request and take over the upgraded connection.
///
/// Intercepted hosts get a TLS handshake with a certificate from the local CA
/// and their requests are served like any other. Everything else is tunneled
/// byte for byte, directly or through the upstream proxy. The tunnel target is
/// prepared before answering so failures still reach the client as errors.
pub async fn handle_connect(state: Arc<ProxyState>, req: Request<Incoming>) -> Response<ProxyBody> {
    let Some(authority) = req.uri().authority().cloned() else {
        return error_response(&ProxyError::MalformedRequest(format!(
            "CONNECT target '{}' must be host:port",
            req.uri()
        )));
    };
    let host = authority.host().to_string();
    let port = authority.port_u16().unwrap_or(443);

    let intercept = match state.mitm {
        Some(ref mitm) if mitm.should_intercept(&host) => match mitm.acceptor_for(&host) {
            Ok(acceptor) => Some(acceptor),
            Err(e) => {
                warn!("Cannot intercept {}: {}", host, e);
                return error_response(&e);
            }
        },
        _ => None,
    };

    let tunnel = match intercept {
        Some(acceptor) => Tunnel::Intercept(acceptor),
        None => {
            let opened = match state.upstream_proxy {
                Some(ref upstream) => open_via_upstream(upstream, &host, port, state.timeout).await,
                None => open_direct(&host, port, state.timeout).await,
            };
            match opened {
                Ok(stream) => Tunnel::Opaque(stream),
                Err(e) => {
                    warn!("Cannot open tunnel to {}:{}: {}", host, port, e);
                    return error_response(&ProxyError::UpstreamUnavailable(e.to_string()));
                }
            }
        }
    };

    let authority = if port == 443 {
        host.clone()
    } else {
        format!("{host}:{port}")
    };

    tokio::spawn(async move {
        let upgraded = match hyper::upgrade::on(req).await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                warn!("CONNECT upgrade to {} failed: {}", authority, e);
                return;
            }
        };

        let result = match tunnel {
            Tunnel::Intercept(acceptor) => {
                metrics::record_tunnel("intercepted");
                serve_intercepted(state, acceptor, TokioIo::new(upgraded), authority.clone()).await
            }
            Tunnel::Opaque(mut server) => {
                metrics::record_tunnel(if state.upstream_proxy.is_some() {
                    "chained"
                } else {
                    "direct"
                });
                let mut client = TokioIo::new(upgraded);
                tokio::io::copy_bidirectional(&mut client, &mut server)
                    .await
                    .map(|(up, down)| debug!("Tunnel to {} closed ({} bytes up, {} down)", authority, up, down))
                    .map_err(anyhow::Error::from)
            }
        };

        if let Err(e) = result {
            debug!("Tunnel to {} ended with error: {}", authority, e);
        }
    });

    Response::new(empty())
}

enum Tunnel {
    Intercept(TlsAcceptor),
    Opaque(TcpStream),
}

/// Terminate TLS as the origin and serve HTTP/1.1 inside the tunnel.
async fn serve_intercepted(
    state: Arc<ProxyState>,
    acceptor: TlsAcceptor,
    io: TokioIo<hyper::upgrade::Upgraded>,
    authority: String,
) -> Result<(), anyhow::Error> {
    let tls = acceptor.accept(io).await?;
    let timeout = state.timeout;
    let target = Target::Intercepted { authority };

    let service = service_fn(move |req| serve(Arc::clone(&state), req, target.clone()));
    http1::Builder::new()
        .timer(TokioTimer::new())
        .header_read_timeout(timeout)
        .serve_connection(TokioIo::new(tls), service)
        .await?;
    Ok(())
}

fn strip_brackets(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

async fn open_direct(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    tokio::time::timeout(timeout, TcpStream::connect((strip_brackets(host), port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
}

/// Open a tunnel through the upstream proxy with its own CONNECT.
async fn open_via_upstream(
    upstream: &UpstreamProxyConfig,
    host: &str,
    port: u16,
    timeout: Duration,
) -> io::Result<TcpStream> {
    let handshake = async {
        let mut stream = TcpStream::connect(upstream.authority()).await?;
        let target = format!("{host}:{port}");
        stream
            .write_all(format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n").as_bytes())
            .await?;

        // Read the response head byte by byte so no tunneled data is consumed
        let mut head = Vec::with_capacity(256);
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if head.len() >= MAX_CONNECT_RESPONSE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "upstream proxy CONNECT response too large",
                ));
            }
            if stream.read(&mut byte).await? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "upstream proxy closed during CONNECT",
                ));
            }
            head.push(byte[0]);
        }

        let status_line = String::from_utf8_lossy(&head);
        let status = status_line.split_whitespace().nth(1).unwrap_or_default();
        if status != "200" {
            return Err(io::Error::other(format!(
                "upstream proxy refused CONNECT to {target}: {}",
                status_line.lines().next().unwrap_or_default()
            )));
        }
        Ok(stream)
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "upstream proxy CONNECT timed out"))?
}
