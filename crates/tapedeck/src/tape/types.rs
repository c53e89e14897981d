//! Types for recorded interactions - requests, responses and their headers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Ordered header list with case-insensitive names.
///
/// Repeated names are kept as separate entries. On disk the headers are a map
/// in first-appearance order, with repeated names collapsed into a list.
/// Values are kept as raw bytes; the few that are not UTF-8 are stored in
/// base64 the same way bodies are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, Bytes)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let value: String = value.into();
        self.push_bytes(name, value);
    }

    pub fn push_bytes(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        self.0.push((name.into(), value.into()));
    }

    /// All raw values recorded for `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_ref())
    }

    /// First value for `name`, if it is text.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| std::str::from_utf8(v).ok())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Capture headers from a hyper header map, skipping the names in `skip`.
    pub fn from_header_map(map: &HeaderMap, skip: &[&str]) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map.iter() {
            if skip.iter().any(|s| name.as_str().eq_ignore_ascii_case(s)) {
                continue;
            }
            headers.push_bytes(name.as_str(), Bytes::copy_from_slice(value.as_bytes()));
        }
        headers
    }

    /// Rebuild a hyper header map. Entries that are not valid HTTP headers are dropped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }

    fn grouped(&self) -> Vec<(&str, Vec<StoredValue>)> {
        let mut groups: Vec<(&str, Vec<StoredValue>)> = Vec::new();
        for (name, value) in &self.0 {
            let value = StoredValue::from_bytes(value);
            match groups
                .iter_mut()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
            {
                Some((_, values)) => values.push(value),
                None => groups.push((name, vec![value])),
            }
        }
        groups
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), Bytes::from(Into::<String>::into(v))))
                .collect(),
        )
    }
}

/// On-disk form of one header value or body: text, or base64 for anything else.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Text(String),
    Binary { base64: String },
}

impl StoredValue {
    fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => StoredValue::Text(text.to_string()),
            Err(_) => StoredValue::Binary {
                base64: BASE64.encode(bytes),
            },
        }
    }

    fn into_bytes<E: serde::de::Error>(self) -> Result<Bytes, E> {
        match self {
            StoredValue::Text(text) => Ok(Bytes::from(text)),
            StoredValue::Binary { base64 } => BASE64
                .decode(base64.as_bytes())
                .map(Bytes::from)
                .map_err(E::custom),
        }
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let groups = self.grouped();
        let mut map = serializer.serialize_map(Some(groups.len()))?;
        for (name, values) in groups {
            if let [single] = values.as_slice() {
                map.serialize_entry(name, single)?;
            } else {
                map.serialize_entry(name, &values)?;
            }
        }
        map.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HeaderValues {
    One(StoredValue),
    Many(Vec<StoredValue>),
}

struct HeadersVisitor;

impl<'de> Visitor<'de> for HeadersVisitor {
    type Value = Headers;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of header names to a value or a list of values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Headers, A::Error> {
        let mut headers = Headers::new();
        while let Some((name, values)) = access.next_entry::<String, HeaderValues>()? {
            match values {
                HeaderValues::One(value) => {
                    headers.push_bytes(name, value.into_bytes::<A::Error>()?)
                }
                HeaderValues::Many(values) => {
                    for value in values {
                        headers.push_bytes(name.clone(), value.into_bytes::<A::Error>()?);
                    }
                }
            }
        }
        Ok(headers)
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Body encoding: UTF-8 bodies are stored as plain text, anything else as base64.
mod body {
    use super::*;

    pub fn serialize<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        StoredValue::from_bytes(body).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        StoredValue::deserialize(deserializer)?.into_bytes()
    }
}

fn default_version() -> String {
    "HTTP/1.1".to_string()
}

fn is_default_version(version: &str) -> bool {
    version == "HTTP/1.1"
}

/// Textual form of a hyper protocol version, e.g. `HTTP/1.1`.
pub fn version_label(version: hyper::Version) -> String {
    format!("{version:?}")
}

/// Request half of a recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    /// Absolute URI, e.g. `https://api.example.com/v1/users?page=2`
    pub uri: String,
    #[serde(default = "default_version", skip_serializing_if = "is_default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(default, with = "body", skip_serializing_if = "Bytes::is_empty")]
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn new(method: &str, uri: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            uri: uri.to_string(),
            version: default_version(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// Response half of a recorded interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    pub status: u16,
    #[serde(default = "default_version", skip_serializing_if = "is_default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,
    #[serde(default, with = "body", skip_serializing_if = "Bytes::is_empty")]
    pub body: Bytes,
}

impl RecordedResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            version: default_version(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// One captured request/response pair. Immutable once appended to a tape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub recorded: DateTime<Utc>,
    pub request: RecordedRequest,
    pub response: RecordedResponse,
}

impl Interaction {
    pub fn new(request: RecordedRequest, response: RecordedResponse) -> Self {
        Self {
            recorded: Utc::now(),
            request,
            response,
        }
    }
}
