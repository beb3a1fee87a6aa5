// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxied HTTP messages and the immutable transaction record.
//!
//! [`ProxyRequest`]/[`ProxyResponse`] are the in-flight messages handled by
//! the pipeline. A [`Transaction`] is the serializable record published once
//! per request on the event bus and pushed to the live feed.

use crate::validate::Violation;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, SET_COOKIE};
use http::{HeaderMap, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// In-flight messages
// ============================================================================

/// An inbound request as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Origin-form URI (path and query).
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyRequest {
    /// Create a request with no headers and an empty body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Append a header. Invalid names or values are skipped.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        HeaderValue: TryFrom<V>,
    {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Decoded query pairs, in order of appearance.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Cookies from every `Cookie` header.
    pub fn cookies(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for value in self.headers.get_all(COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            for pair in raw.split(';') {
                if let Some((name, value)) = pair.trim().split_once('=') {
                    out.insert(name.trim().to_string(), value.trim().to_string());
                }
            }
        }
        out
    }

    /// Media type essence of the body (`application/json`), lowercased.
    pub fn media_type(&self) -> Option<String> {
        media_type(&self.headers)
    }
}

/// A response returned to the caller, whether forwarded, mocked or synthesized.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// JSON response with `content-type: application/json`.
    pub fn json(status: StatusCode, value: &serde_json::Value, pretty: bool) -> Self {
        let body = if pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .unwrap_or_default();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status,
            headers,
            body: Bytes::from(body),
        }
    }

    pub fn media_type(&self) -> Option<String> {
        media_type(&self.headers)
    }
}

/// Extract the lowercased media type essence from a `content-type` header.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let essence = raw.split(';').next()?.trim().to_ascii_lowercase();
    if essence.is_empty() {
        None
    } else {
        Some(essence)
    }
}

/// Whether a media type denotes JSON (`application/json`, `application/problem+json`, ...).
pub fn is_json_media_type(media_type: &str) -> bool {
    media_type == "application/json" || media_type.ends_with("+json")
}

fn is_binary_media_type(media_type: &str) -> bool {
    media_type == "application/octet-stream"
        || media_type.starts_with("image/")
        || media_type.starts_with("audio/")
        || media_type.starts_with("video/")
        || media_type == "application/pdf"
        || media_type == "application/zip"
}

// ============================================================================
// Transaction record
// ============================================================================

/// The path a request took through the pipeline. Exactly one per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    Forwarded,
    Mocked,
    /// Short-circuited before dispatch; no upstream call, no mock.
    Rejected,
}

/// Non-contract failure attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionFault {
    Transport { reason: String, message: String },
    Internal { message: String },
}

/// Captured message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyRecord {
    /// UTF-8 text, or base64 when `binary` is set.
    pub content: String,
    pub binary: bool,
    pub size: usize,
}

impl BodyRecord {
    fn capture(body: &Bytes, media_type: Option<&str>) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        let binary_type = media_type.is_some_and(is_binary_media_type);
        match std::str::from_utf8(body) {
            Ok(text) if !binary_type => Some(Self {
                content: text.to_string(),
                binary: false,
                size: body.len(),
            }),
            _ => Some(Self {
                content: BASE64.encode(body),
                binary: true,
                size: body.len(),
            }),
        }
    }
}

/// Request half of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestRecord {
    pub method: String,
    pub url: String,
    pub path: String,
    pub query: BTreeMap<String, Vec<String>>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub cookies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyRecord>,
}

impl HttpRequestRecord {
    pub fn capture(request: &ProxyRequest) -> Self {
        let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in request.query_pairs() {
            query.entry(key).or_default().push(value);
        }
        let media = request.media_type();
        Self {
            method: request.method.to_string(),
            url: request.uri.to_string(),
            path: request.uri.path().to_string(),
            query,
            headers: header_map_record(&request.headers),
            cookies: request.cookies(),
            body: BodyRecord::capture(&request.body, media.as_deref()),
        }
    }
}

/// Response half of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponseRecord {
    pub status: u16,
    pub headers: BTreeMap<String, Vec<String>>,
    pub cookies: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyRecord>,
}

impl HttpResponseRecord {
    pub fn capture(response: &ProxyResponse) -> Self {
        let mut cookies = BTreeMap::new();
        for value in response.headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else { continue };
            let first = raw.split(';').next().unwrap_or_default();
            if let Some((name, value)) = first.split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
        let media = response.media_type();
        Self {
            status: response.status.as_u16(),
            headers: header_map_record(&response.headers),
            cookies,
            body: BodyRecord::capture(&response.body, media.as_deref()),
        }
    }
}

fn header_map_record(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string()).or_default().push(value);
    }
    out
}

/// Request-side and response-side violations, each in detection order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationSet {
    pub request: Vec<Violation>,
    pub response: Vec<Violation>,
}

impl ViolationSet {
    pub fn is_empty(&self) -> bool {
        self.request.is_empty() && self.response.is_empty()
    }

    pub fn len(&self) -> usize {
        self.request.len() + self.response.len()
    }

    /// All violations, request side first.
    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.request.iter().chain(self.response.iter())
    }
}

/// The complete record of one proxied exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub request: HttpRequestRecord,
    /// Response returned to the caller; absent when the caller went away.
    pub response: Option<HttpResponseRecord>,
    pub mode: TransactionMode,
    /// Matched contract operation (`GET /pets/{petId}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub violations: ViolationSet,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<TransactionFault>,
    #[serde(default)]
    pub cancelled: bool,
}

impl Transaction {
    pub fn is_compliant(&self) -> bool {
        self.violations.is_empty()
    }
}
