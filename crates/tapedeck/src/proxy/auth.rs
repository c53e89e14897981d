//! Basic proxy authentication.

use crate::config::AuthConfig;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hyper::header::{HeaderMap, PROXY_AUTHORIZATION};

/// Check `Proxy-Authorization: Basic <base64(user:pass)>` against the
/// configured credentials. Both parts are compared verbatim.
pub fn is_authorized(headers: &HeaderMap, expected: &AuthConfig) -> bool {
    headers
        .get_all(PROXY_AUTHORIZATION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(decode_basic)
        .any(|(user, pass)| user == expected.username && pass == expected.password)
}

fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}
