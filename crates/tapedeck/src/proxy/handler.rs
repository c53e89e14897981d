//! Per-request dispatch against the active tape.
//!
//! A request is replayed from the tape, refused, or forwarded upstream and
//! recorded, depending on the tape's decision. The handler holds its own
//! reference to the tape for the whole request, so swapping tapes never
//! affects a request already in flight.

use super::connect::handle_connect;
use super::forwarding::{error_response, forward, full};
use super::headers::{
    strip_hop_by_hop, TapedeckHeadersExt, HOP_BY_HOP, VALUE_PLAY, VALUE_REC, X_TAPEDECK,
};
use super::pipeline::{StageContext, StageOutcome};
use super::server::ProxyState;
use super::ProxyBody;
use crate::error::ProxyError;
use crate::metrics;
use crate::tape::{version_label, Decision, Headers, RecordedRequest, RecordedResponse};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode, Uri};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a request came from.
#[derive(Debug, Clone)]
pub enum Target {
    /// Sent to the proxy directly, with an absolute-form request target
    Direct,
    /// Sent inside an intercepted CONNECT tunnel to `authority`
    Intercepted { authority: String },
}

/// Handle one request on a client connection.
pub async fn handle_request(
    state: Arc<ProxyState>,
    req: Request<Incoming>,
    target: Target,
) -> Result<Response<ProxyBody>, Infallible> {
    debug!("Received request: {} {}", req.method(), req.uri());

    let outcome = {
        let ctx = StageContext {
            state: &state,
            method: req.method(),
            headers: req.headers(),
            in_tunnel: matches!(target, Target::Intercepted { .. }),
        };
        state.pipeline.run(&ctx)
    };
    if let StageOutcome::Respond(response) = outcome {
        metrics::record_request("rejected");
        return Ok(response);
    }

    if req.method() == Method::CONNECT {
        if let Target::Intercepted { .. } = target {
            return Ok(error_response(&ProxyError::MalformedRequest(
                "CONNECT inside an intercepted tunnel".to_string(),
            )));
        }
        return Ok(handle_connect(state, req).await);
    }

    if matches!(target, Target::Direct)
        && req.uri().authority().is_none()
        && req.method() == Method::GET
        && req.uri().path() == "/metrics"
    {
        return Ok(metrics_response());
    }

    let response = match dispatch(&state, req, &target).await {
        Ok(response) => response,
        Err(err) => {
            metrics::record_request(err.kind());
            error_response(&err)
        }
    };
    Ok(response)
}

async fn dispatch(
    state: &ProxyState,
    req: Request<Incoming>,
    target: &Target,
) -> Result<Response<ProxyBody>, ProxyError> {
    let tape = state.active_tape.current().ok_or(ProxyError::NoTape)?;
    let uri = absolute_uri(req.uri(), target)?;

    let (parts, body) = req.into_parts();
    let body = read_body(body, state.request_buffer_size).await?;

    let unrecorded: Vec<&str> = HOP_BY_HOP.iter().copied().chain(["host"]).collect();
    let request = RecordedRequest {
        method: parts.method.as_str().to_string(),
        uri: uri.to_string(),
        version: version_label(parts.version),
        headers: Headers::from_header_map(&parts.headers, &unrecorded),
        body: body.clone(),
    };

    match tape.decide(&request) {
        Decision::Replay(interaction) => {
            debug!(tape = tape.name(), "Replaying {} {}", request.method, request.uri);
            metrics::record_request("replay");
            Ok(replay_response(interaction.response))
        }
        Decision::Deny => {
            warn!(
                tape = tape.name(),
                "No recorded interaction for {} {} in {} mode",
                request.method,
                request.uri,
                tape.mode()
            );
            Err(ProxyError::NoRecordedInteraction {
                method: request.method,
                uri: request.uri,
            })
        }
        Decision::Forward => {
            let upstream = forward(
                &state.client,
                parts.method,
                uri,
                &parts.headers,
                body,
                state.timeout,
            )
            .await?;

            let recorded = RecordedResponse {
                status: upstream.parts.status.as_u16(),
                version: version_label(upstream.parts.version),
                headers: Headers::from_header_map(&upstream.parts.headers, &[]),
                body: upstream.body.clone(),
            };
            let mut response = Response::from_parts(upstream.parts, full(upstream.body));

            let (method, uri, status) = (request.method.clone(), request.uri.clone(), recorded.status);
            match tape.record(request, recorded) {
                Ok(()) => {
                    info!(tape = tape.name(), "Recorded {} {} -> {}", method, uri, status);
                    response.set_header(&X_TAPEDECK, &VALUE_REC);
                    metrics::record_request("record");
                }
                // Mode switched to read-only, or the tape was ejected, while upstream
                Err(e) => {
                    warn!("Forwarded {} {} without recording: {}", method, uri, e);
                    metrics::record_request("forward");
                }
            }
            Ok(response)
        }
    }
}

/// Absolute URI of the request as recorded on the tape.
fn absolute_uri(uri: &Uri, target: &Target) -> Result<Uri, ProxyError> {
    match target {
        Target::Direct => {
            if uri.scheme().is_some() && uri.authority().is_some() {
                Ok(uri.clone())
            } else {
                Err(ProxyError::MalformedRequest(format!(
                    "request target '{uri}' is not an absolute URI"
                )))
            }
        }
        Target::Intercepted { authority } => {
            let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
            format!("https://{authority}{path}")
                .parse()
                .map_err(|e| ProxyError::MalformedRequest(format!("invalid request target: {e}")))
        }
    }
}

async fn read_body(body: Incoming, limit: usize) -> Result<Bytes, ProxyError> {
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ProxyError::RequestTooLarge(limit))
        }
        Err(e) => Err(ProxyError::MalformedRequest(format!(
            "failed to read request body: {e}"
        ))),
    }
}

fn replay_response(recorded: RecordedResponse) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(recorded.status).unwrap_or_else(|_| {
        warn!("Recorded status {} is not valid, replaying 500", recorded.status);
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut headers = recorded.headers.to_header_map();
    strip_hop_by_hop(&mut headers);
    // Length is recomputed from the recorded body
    headers.remove(CONTENT_LENGTH);

    let mut response = Response::new(full(recorded.body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response.set_header(&X_TAPEDECK, &VALUE_PLAY);
    response
}

fn metrics_response() -> Response<ProxyBody> {
    let mut response = Response::new(full(metrics::collect_metrics()));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
