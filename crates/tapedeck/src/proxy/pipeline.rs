//! Ordered request stages run before a request reaches the tape.
//!
//! Each stage inspects the request head and either lets it continue or
//! answers it directly. Stages run in registration order and the first
//! response wins.

use super::auth::is_authorized;
use super::forwarding::error_response;
use super::headers::{TapedeckHeadersExt, VALUE_PROXY_AUTHENTICATE};
use super::server::ProxyState;
use super::ProxyBody;
use crate::error::ProxyError;
use hyper::header::{HeaderMap, CONTENT_LENGTH, PROXY_AUTHENTICATE};
use hyper::{Method, Response};
use tracing::debug;

/// What a stage sees of the request.
pub struct StageContext<'a> {
    pub state: &'a ProxyState,
    pub method: &'a Method,
    pub headers: &'a HeaderMap,
    /// Request arrived inside an intercepted TLS tunnel
    pub in_tunnel: bool,
}

pub enum StageOutcome {
    Continue,
    Respond(Response<ProxyBody>),
}

pub struct Stage {
    pub name: &'static str,
    run: fn(&StageContext<'_>) -> StageOutcome,
}

impl Stage {
    pub fn new(name: &'static str, run: fn(&StageContext<'_>) -> StageOutcome) -> Self {
        Self { name, run }
    }
}

pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl Pipeline {
    /// `authenticate`, then `reject_oversized`.
    pub fn standard() -> Self {
        Self {
            stages: vec![
                Stage::new("authenticate", authenticate),
                Stage::new("reject_oversized", reject_oversized),
            ],
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name).collect()
    }

    pub fn run(&self, ctx: &StageContext<'_>) -> StageOutcome {
        for stage in &self.stages {
            if let StageOutcome::Respond(response) = (stage.run)(ctx) {
                debug!(
                    "Stage '{}' answered {} with {}",
                    stage.name,
                    ctx.method,
                    response.status()
                );
                return StageOutcome::Respond(response);
            }
        }
        StageOutcome::Continue
    }
}

fn authenticate(ctx: &StageContext<'_>) -> StageOutcome {
    // The CONNECT that opened the tunnel was already checked
    if ctx.in_tunnel {
        return StageOutcome::Continue;
    }
    match ctx.state.auth {
        Some(ref expected) if !is_authorized(ctx.headers, expected) => {
            let mut response = error_response(&ProxyError::AuthenticationRequired);
            response.set_header(&PROXY_AUTHENTICATE, &VALUE_PROXY_AUTHENTICATE);
            StageOutcome::Respond(response)
        }
        _ => StageOutcome::Continue,
    }
}

fn reject_oversized(ctx: &StageContext<'_>) -> StageOutcome {
    let declared = ctx
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    match declared {
        Some(len) if len > ctx.state.request_buffer_size as u64 => StageOutcome::Respond(
            error_response(&ProxyError::RequestTooLarge(ctx.state.request_buffer_size)),
        ),
        _ => StageOutcome::Continue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, Config};
    use crate::session::ActiveTape;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use hyper::header::{HeaderValue, PROXY_AUTHORIZATION};

    fn state(auth: bool, buffer: usize) -> ProxyState {
        let mut config = Config::default();
        config.proxy.request_buffer_size = buffer;
        if auth {
            config.proxy.auth = Some(AuthConfig {
                username: "u".into(),
                password: "p".into(),
            });
        }
        ProxyState::new(&config, ActiveTape::default(), None)
    }

    fn run(state: &ProxyState, headers: &HeaderMap, in_tunnel: bool) -> Option<u16> {
        let ctx = StageContext {
            state,
            method: &Method::GET,
            headers,
            in_tunnel,
        };
        match Pipeline::standard().run(&ctx) {
            StageOutcome::Continue => None,
            StageOutcome::Respond(r) => Some(r.status().as_u16()),
        }
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(
            Pipeline::standard().names(),
            vec!["authenticate", "reject_oversized"]
        );
    }

    #[test]
    fn test_missing_credentials_get_407() {
        let state = state(true, 1024);
        assert_eq!(run(&state, &HeaderMap::new(), false), Some(407));
        // Tunnel requests are not re-checked
        assert_eq!(run(&state, &HeaderMap::new(), true), None);
    }

    #[test]
    fn test_valid_credentials_continue() {
        let state = state(true, 1024);
        let mut headers = HeaderMap::new();
        headers.insert(
            PROXY_AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", BASE64.encode("u:p"))).unwrap(),
        );
        assert_eq!(run(&state, &headers, false), None);
    }

    #[test]
    fn test_auth_runs_before_size_check() {
        let state = state(true, 10);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("100"));
        assert_eq!(run(&state, &headers, false), Some(407));
    }

    #[test]
    fn test_declared_oversized_body_gets_413() {
        let state = state(false, 10);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("11"));
        assert_eq!(run(&state, &headers, false), Some(413));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("10"));
        assert_eq!(run(&state, &headers, false), None);
    }
}
