//! Request matching rules used to decide whether a recorded interaction
//! answers a live request.

use super::types::RecordedRequest;
use hyper::Uri;
use serde::{Deserialize, Serialize};

/// Attributes compared between a candidate request and a recorded one.
///
/// A candidate matches iff every selected comparator agrees. The default
/// compares the method and the full URI (scheme, host, port, path and query).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MatchRule {
    /// Compare the request method
    #[serde(default)]
    pub method: bool,
    /// Compare scheme, host, port and path
    #[serde(default)]
    pub uri: bool,
    /// Compare the raw query string
    #[serde(default)]
    pub query: bool,
    /// Compare all values of these headers (names are case-insensitive)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
    /// Compare the request body byte for byte
    #[serde(default)]
    pub body: bool,
}

impl Default for MatchRule {
    fn default() -> Self {
        Self {
            method: true,
            uri: true,
            query: true,
            headers: Vec::new(),
            body: false,
        }
    }
}

impl MatchRule {
    /// A rule with every comparator disabled; every request matches.
    pub fn none() -> Self {
        Self {
            method: false,
            uri: false,
            query: false,
            headers: Vec::new(),
            body: false,
        }
    }

    pub fn with_method(mut self) -> Self {
        self.method = true;
        self
    }

    pub fn with_uri(mut self) -> Self {
        self.uri = true;
        self
    }

    pub fn with_query(mut self) -> Self {
        self.query = true;
        self
    }

    pub fn with_header(mut self, name: &str) -> Self {
        self.headers.push(name.to_ascii_lowercase());
        self
    }

    pub fn with_body(mut self) -> Self {
        self.body = true;
        self
    }

    /// Check whether `candidate` matches `recorded` under this rule.
    pub fn matches(&self, candidate: &RecordedRequest, recorded: &RecordedRequest) -> bool {
        if self.method && !candidate.method.eq_ignore_ascii_case(&recorded.method) {
            return false;
        }

        if self.uri || self.query {
            let a = UriParts::parse(&candidate.uri);
            let b = UriParts::parse(&recorded.uri);
            match (a, b) {
                (Some(a), Some(b)) => {
                    if self.uri && !a.same_location(&b) {
                        return false;
                    }
                    if self.query && a.query != b.query {
                        return false;
                    }
                }
                // Unparseable URIs only match when textually identical
                _ => {
                    if candidate.uri != recorded.uri {
                        return false;
                    }
                }
            }
        }

        for name in &self.headers {
            if !candidate.headers.get_all(name).eq(recorded.headers.get_all(name)) {
                return false;
            }
        }

        if self.body && candidate.body != recorded.body {
            return false;
        }

        true
    }
}

/// Normalized URI components used for comparison.
struct UriParts {
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: String,
    query: Option<String>,
}

impl UriParts {
    fn parse(raw: &str) -> Option<Self> {
        let uri: Uri = raw.parse().ok()?;
        let scheme = uri.scheme_str().map(|s| s.to_ascii_lowercase());
        let port = uri.port_u16().or(match scheme.as_deref() {
            Some("http") => Some(80),
            Some("https") => Some(443),
            _ => None,
        });
        let path = match uri.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        Some(Self {
            host: uri.host().map(|h| h.to_ascii_lowercase()),
            scheme,
            port,
            path,
            query: uri.query().map(|q| q.to_string()),
        })
    }

    fn same_location(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.host == other.host
            && self.port == other.port
            && self.path == other.path
    }
}
