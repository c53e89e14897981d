//! Intercepting proxy.
//!
//! Clients send plain HTTP requests in absolute form or open CONNECT tunnels.
//! Tunnels to intercepted hosts are terminated with a certificate from the
//! local CA so their requests can be replayed and recorded too; other tunnels
//! pass bytes through untouched.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer, shared state and accept loop
//! - `pipeline` - Ordered request stages (authentication, size limit)
//! - `handler` - Tape-driven dispatch of each request
//! - `service` - Boxed handler future shared by plain and tunneled connections
//! - `connect` - CONNECT interception and tunneling
//! - `forwarding` - Upstream forwarding and proxy error responses
//! - `client` - Upstream HTTP client, direct or chained
//! - `tls` - Interception acceptors and the no-op verifier
//! - `network` - Listener creation
//! - `headers` - Static header names and hop-by-hop handling
//! - `auth` - Basic proxy authentication

mod auth;
mod client;
mod connect;
mod forwarding;
mod handler;
mod headers;
mod network;
mod pipeline;
mod server;
mod service;
mod tls;

use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;

/// Response body type used throughout the proxy.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub use client::UpstreamClient;
pub use forwarding::error_response;
pub use handler::Target;
pub use headers::{X_TAPEDECK, X_TAPEDECK_ERROR};
pub use network::{bind_listener, EPHEMERAL_BIND_ATTEMPTS};
pub use pipeline::{Pipeline, Stage, StageContext, StageOutcome};
pub use server::{ProxyHandle, ProxyServer, ProxyState};
pub use tls::{ensure_crypto_provider, MitmAcceptor, NoVerifier};
