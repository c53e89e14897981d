//! Error types for tapes, the proxy and the session lifecycle.

use hyper::StatusCode;
use std::path::PathBuf;

/// Errors raised by tapes and the tape store.
#[derive(Debug, thiserror::Error)]
pub enum TapeError {
    #[error("Tape '{0}' not found")]
    TapeNotFound(String),
    #[error("Tape '{0}' has been ejected and cannot record")]
    TapeClosed(String),
    #[error("Tape '{name}' is in {mode} mode and cannot record")]
    RecordingNotPermitted { name: String, mode: String },
    #[error("Tape name '{requested}' collides with existing tape '{existing}'")]
    NameCollision { requested: String, existing: String },
    #[error("Invalid tape name '{0}'")]
    InvalidName(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Tape format error: {0}")]
    Format(String),
}

/// Errors raised while serving a proxied request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("No recorded interaction matches {method} {uri}")]
    NoRecordedInteraction { method: String, uri: String },
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Upstream did not answer within {0} seconds")]
    UpstreamTimeout(u64),
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error("Request body exceeds {0} bytes")]
    RequestTooLarge(usize),
    #[error("No tape inserted")]
    NoTape,
    #[error("Proxy authentication required")]
    AuthenticationRequired,
    #[error("Certificate error: {0}")]
    Certificate(String),
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// HTTP status returned to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoRecordedInteraction { .. } | ProxyError::UpstreamUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::RequestTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::NoTape => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::AuthenticationRequired => StatusCode::PROXY_AUTHENTICATION_REQUIRED,
            ProxyError::Certificate(_) | ProxyError::Tls(_) | ProxyError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Value of the `x-tapedeck-error` header.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::NoRecordedInteraction { .. } => "no_recorded_interaction",
            ProxyError::UpstreamUnavailable(_) => "upstream_unavailable",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::MalformedRequest(_) => "malformed_request",
            ProxyError::RequestTooLarge(_) => "request_too_large",
            ProxyError::NoTape => "no_tape",
            ProxyError::AuthenticationRequired => "authentication_required",
            ProxyError::Certificate(_) => "certificate",
            ProxyError::Tls(_) => "tls",
            ProxyError::Io(_) => "io",
        }
    }
}

/// Errors returned by the lifecycle coordinator.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Proxy is already running")]
    ProxyAlreadyRunning,
    #[error("Proxy is not running")]
    ProxyNotRunning,
    #[error("Failed to bind proxy port: {0}")]
    PortBindFailed(String),
    #[error("Tape '{0}' is already inserted")]
    TapeAlreadyInserted(String),
    #[error(transparent)]
    Tape(#[from] TapeError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}
