//! Static tapedeck header names and values, plus the hop-by-hop list.
//!
//! Static names and values avoid runtime `.parse().unwrap()` calls at the
//! insertion sites.

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::Response;

/// Marks responses served from (`PLAY`) or written to (`REC`) the tape
pub static X_TAPEDECK: HeaderName = HeaderName::from_static("x-tapedeck");
/// Error kind on responses generated by the proxy itself
pub static X_TAPEDECK_ERROR: HeaderName = HeaderName::from_static("x-tapedeck-error");

pub static VALUE_PLAY: HeaderValue = HeaderValue::from_static("PLAY");
pub static VALUE_REC: HeaderValue = HeaderValue::from_static("REC");
pub static VALUE_PROXY_AUTHENTICATE: HeaderValue =
    HeaderValue::from_static("Basic realm=\"tapedeck\"");

/// Headers that describe a single connection and are never forwarded or recorded.
pub const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Extension trait for inserting tapedeck headers into responses.
pub trait TapedeckHeadersExt {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);

    /// Returns false if the value couldn't be converted to a valid header value.
    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool;
}

impl<B> TapedeckHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }

    fn set_header_value(&mut self, name: &HeaderName, value: &str) -> bool {
        match HeaderValue::from_str(value) {
            Ok(header_value) => {
                self.headers_mut().insert(name.clone(), header_value);
                true
            }
            Err(_) => false,
        }
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<String> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP.iter().copied().chain(listed.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use hyper::body::Bytes;

    #[test]
    fn test_static_header_names() {
        assert_eq!(X_TAPEDECK.as_str(), "x-tapedeck");
        assert_eq!(X_TAPEDECK_ERROR.as_str(), "x-tapedeck-error");
    }

    #[test]
    fn test_set_header_static() {
        let mut response = Response::new(Full::new(Bytes::new()));
        response.set_header(&X_TAPEDECK, &VALUE_PLAY);
        assert_eq!(response.headers().get(&X_TAPEDECK).unwrap(), "PLAY");
    }

    #[test]
    fn test_set_header_value_invalid() {
        let mut response = Response::new(Full::new(Bytes::new()));
        assert!(!response.set_header_value(&X_TAPEDECK_ERROR, "invalid\nvalue"));
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic eA=="));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }
}
