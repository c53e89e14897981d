//! Upstream forwarding and proxy-generated responses.

use super::client::UpstreamClient;
use super::headers::{strip_hop_by_hop, TapedeckHeadersExt, X_TAPEDECK_ERROR};
use super::ProxyBody;
use crate::error::ProxyError;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, HOST};
use hyper::http::response::Parts;
use hyper::{Method, Request, Response, Uri};
use std::convert::Infallible;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub fn full(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// JSON error response generated by the proxy itself, tagged with `x-tapedeck-error`.
pub fn error_response(err: &ProxyError) -> Response<ProxyBody> {
    let body = serde_json::json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    let mut response = Response::new(full(body.to_string()));
    *response.status_mut() = err.status();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response.set_header_value(&X_TAPEDECK_ERROR, err.kind());
    response
}

/// Fully buffered upstream response.
pub struct UpstreamResponse {
    pub parts: Parts,
    pub body: Bytes,
}

/// Forward a buffered request to its destination.
///
/// The whole exchange, including reading the response body, must finish
/// within `timeout`. Hop-by-hop headers are removed in both directions.
pub async fn forward(
    client: &UpstreamClient,
    method: Method,
    uri: Uri,
    headers: &HeaderMap,
    body: Bytes,
    timeout: Duration,
) -> Result<UpstreamResponse, ProxyError> {
    debug!("Forwarding to: {} {}", method, uri);

    let mut upstream_req = Request::builder().method(method).uri(uri);

    // Copy headers (skip host)
    if let Some(upstream_headers) = upstream_req.headers_mut() {
        for (key, value) in headers.iter() {
            if key != HOST {
                upstream_headers.append(key, value.clone());
            }
        }
        strip_hop_by_hop(upstream_headers);
    }

    let upstream_req = upstream_req
        .body(full(body))
        .map_err(|e| ProxyError::MalformedRequest(e.to_string()))?;

    let start = Instant::now();
    let exchange = async {
        let response = client.request(upstream_req).await.map_err(|e| {
            error!("Failed to forward request to upstream: {}", e);
            ProxyError::UpstreamUnavailable(e.to_string())
        })?;
        let (mut parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| {
                error!("Failed to collect upstream response body: {}", e);
                ProxyError::UpstreamUnavailable(format!("failed to read upstream response: {e}"))
            })?
            .to_bytes();
        strip_hop_by_hop(&mut parts.headers);
        Ok(UpstreamResponse { parts, body })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => {
            crate::metrics::record_upstream_duration(start.elapsed().as_secs_f64() * 1000.0);
            result
        }
        Err(_) => {
            warn!("Upstream did not answer within {:?}", timeout);
            Err(ProxyError::UpstreamTimeout(timeout.as_secs()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let response = error_response(&ProxyError::NoTape);
        assert_eq!(response.status(), 503);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(response.headers().get("x-tapedeck-error").unwrap(), "no_tape");
    }

    #[tokio::test]
    async fn test_error_response_body_is_json() {
        let response = error_response(&ProxyError::UpstreamTimeout(5));
        assert_eq!(response.status(), 504);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "upstream_timeout");
    }
}
