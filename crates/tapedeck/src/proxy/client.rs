//! Upstream HTTP client creation and configuration.
//!
//! Forwarded requests either go straight to the origin or through a single
//! upstream proxy. Both variants share the pooled hyper-util client.

use super::tls::{ensure_crypto_provider, NoVerifier};
use super::ProxyBody;
use crate::config::Config;
use hyper::body::Incoming;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::connect::{Connected, Connection, HttpConnector};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Type alias for the direct HTTP client used by the proxy.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, ProxyBody>;

/// Client sending absolute-form requests to an upstream proxy.
pub type ChainedClient = Client<ChainConnector, ProxyBody>;

pub enum UpstreamClient {
    Direct(HttpClient),
    Chained(ChainedClient),
}

impl UpstreamClient {
    pub fn from_config(config: &Config) -> Self {
        let idle = Duration::from_secs(config.proxy.timeout_secs.max(1) * 6);

        match config.proxy.upstream {
            Some(ref upstream) => {
                info!("Chaining upstream requests through {}", upstream.authority());
                let connector = ChainConnector {
                    proxy_addr: upstream.authority(),
                    connect_timeout: config.proxy.timeout(),
                };
                UpstreamClient::Chained(
                    Client::builder(TokioExecutor::new())
                        .pool_idle_timeout(idle)
                        .build(connector),
                )
            }
            None => UpstreamClient::Direct(create_http_client(
                config.proxy.timeout(),
                idle,
                config.tls.upstream_skip_verify,
            )),
        }
    }

    pub async fn request(
        &self,
        req: Request<ProxyBody>,
    ) -> Result<Response<Incoming>, hyper_util::client::legacy::Error> {
        match self {
            UpstreamClient::Direct(client) => client.request(req).await,
            UpstreamClient::Chained(client) => client.request(req).await,
        }
    }
}

/// Create a pooled client that talks HTTP/1.1 to origins over plain TCP or TLS.
pub fn create_http_client(
    connect_timeout: Duration,
    idle_timeout: Duration,
    skip_tls_verify: bool,
) -> HttpClient {
    ensure_crypto_provider();

    let mut http_connector = HttpConnector::new();
    http_connector.set_connect_timeout(Some(connect_timeout));
    http_connector.set_nodelay(true);
    http_connector.enforce_http(false); // Allow both HTTP and HTTPS

    let builder = hyper_rustls::HttpsConnectorBuilder::new();
    let builder = if skip_tls_verify {
        warn!("TLS certificate verification DISABLED for upstream requests (development/testing only)");
        builder.with_tls_config(
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth(),
        )
    } else {
        match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots() {
            Ok(builder) => builder,
            Err(e) => {
                warn!("No native root certificates available ({}), upstream HTTPS will fail verification", e);
                builder.with_tls_config(
                    rustls::ClientConfig::builder()
                        .with_root_certificates(rustls::RootCertStore::empty())
                        .with_no_client_auth(),
                )
            }
        }
    };
    let https_connector = builder
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(idle_timeout)
        .build(https_connector)
}

/// Connects every destination to the configured upstream proxy.
#[derive(Clone)]
pub struct ChainConnector {
    proxy_addr: String,
    connect_timeout: Duration,
}

impl tower::Service<Uri> for ChainConnector {
    type Response = ChainedStream;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<ChainedStream, io::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        let addr = self.proxy_addr.clone();
        let timeout = self.connect_timeout;
        Box::pin(async move {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to upstream proxy {addr} timed out"),
                    )
                })??;
            stream.set_nodelay(true)?;
            Ok(ChainedStream {
                inner: TokioIo::new(stream),
            })
        })
    }
}

/// Connection to the upstream proxy. Marked as proxied so the client keeps
/// request targets in absolute form.
pub struct ChainedStream {
    inner: TokioIo<TcpStream>,
}

impl Connection for ChainedStream {
    fn connected(&self) -> Connected {
        Connected::new().proxy(true)
    }
}

impl Read for ChainedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl Write for ChainedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
