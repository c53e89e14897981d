//! Boxed entry point into the request handler.
//!
//! CONNECT handling serves intercepted tunnels with the same handler that
//! accepted the CONNECT, so the handler's future is recursive. Boxing it here,
//! outside the modules that define it, gives the cycle a concrete `Send` type.

use super::handler::{handle_request, Target};
use super::server::ProxyState;
use super::ProxyBody;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub(crate) type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<Response<ProxyBody>, Infallible>> + Send>>;

/// Handle `req` as received from `target`.
pub(crate) fn serve(state: Arc<ProxyState>, req: Request<Incoming>, target: Target) -> HandlerFuture {
    Box::pin(handle_request(state, req, target))
}
