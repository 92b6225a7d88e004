//! Persisted log records — the durable shape of a proxied exchange.
//!
//! Unlike [`crate::http::HttpRequest`]/[`crate::http::HttpResponse`], which
//! live only for the duration of one exchange, `RequestLog`/`ResponseLog`
//! are what gets handed to the [`super::repository::Repository`] for
//! storage and later retrieval.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::http::{Headers, Method, ProxyUrl, Version};

use super::id::CorrelationId;

/// A project identifier. The zero value means "no active project" — every
/// exchange is bypassed for logging while it is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl ProjectId {
    pub const NONE: ProjectId = ProjectId(0);

    pub fn is_set(self) -> bool {
        self.0 != 0
    }
}

fn serialize_headers<S: serde::Serializer>(headers: &Headers, s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::SerializeSeq;
    let mut seq = s.serialize_seq(Some(headers.len()))?;
    for (name, value) in headers.iter() {
        seq.serialize_element(&(name, value))?;
    }
    seq.end()
}

fn deserialize_headers<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Headers, D::Error> {
    let pairs: Vec<(String, String)> = Vec::deserialize(d)?;
    let mut headers = Headers::with_capacity(pairs.len());
    for (name, value) in pairs {
        headers.insert(name, value);
    }
    Ok(headers)
}

fn serialize_url<S: serde::Serializer>(url: &ProxyUrl, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&url.to_string())
}

fn deserialize_url<'de, D: serde::Deserializer<'de>>(d: D) -> Result<ProxyUrl, D::Error> {
    let raw = String::deserialize(d)?;
    ProxyUrl::parse(&raw).map_err(serde::de::Error::custom)
}

/// A persisted record of one request, captured before any downstream
/// middleware could mutate it further.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: CorrelationId,
    pub project_id: ProjectId,
    pub method: Method,
    #[serde(serialize_with = "serialize_url", deserialize_with = "deserialize_url")]
    pub url: ProxyUrl,
    pub version: Version,
    #[serde(serialize_with = "serialize_headers", deserialize_with = "deserialize_headers")]
    pub headers: Headers,
    #[serde(with = "serde_bytes_body")]
    pub body: Bytes,
}

/// A persisted record of the response to a [`RequestLog`]. Keyed by the
/// request's id rather than carrying one of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseLog {
    pub version: Version,
    pub status_code: u16,
    pub status_reason: String,
    #[serde(serialize_with = "serialize_headers", deserialize_with = "deserialize_headers")]
    pub headers: Headers,
    #[serde(with = "serde_bytes_body")]
    pub body: Bytes,
}

mod serde_bytes_body {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let vec = Vec::<u8>::deserialize(d)?;
        Ok(Bytes::from(vec))
    }
}

// `Method` and `Version` need Serialize/Deserialize to appear in these
// records; implemented here (rather than in `http::mod`) since this is the
// only place that needs them serialized.
impl Serialize for Method {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Method {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap())
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
