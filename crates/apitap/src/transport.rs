// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Upstream transport.
//!
//! [`UpstreamTransport`] is the seam between the pipeline and the real
//! backend; tests drive the pipeline with in-process fakes.
//! [`HttpTransport`] is the production client: a pooled keep-alive
//! `reqwest` client bound to one upstream base URL.

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::transaction::{ProxyRequest, ProxyResponse};
use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName};
use http::Uri;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Headers that describe one hop and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Sends a request to the upstream and returns its response.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse, TransportError>;
}

/// Pooled HTTP(S) client for one upstream.
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    /// Build a client for `base_url` (`http(s)://host[:port][/prefix]`).
    pub fn new(base_url: &str, config: &TransportConfig) -> Result<Self, TransportError> {
        let base = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") || base.host_str().is_none() {
            return Err(TransportError::InvalidUrl(format!(
                "upstream must be an absolute http(s) URL: {}",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(Duration::from_millis(config.idle_timeout_ms))
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(TransportError::from)?;

        info!(
            "Upstream transport ready: {} (idle pool {}/host, idle timeout {} ms)",
            base, config.max_idle_per_host, config.idle_timeout_ms
        );
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Upstream URL for an inbound origin-form URI: the base path is
    /// prefixed, the query is carried over verbatim.
    pub fn upstream_url(&self, uri: &Uri) -> Url {
        let mut url = self.base.clone();
        let prefix = self.base.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", prefix, uri.path()));
        url.set_query(uri.query());
        url
    }
}

#[async_trait]
impl UpstreamTransport for HttpTransport {
    async fn forward(&self, request: &ProxyRequest) -> Result<ProxyResponse, TransportError> {
        let url = self.upstream_url(&request.uri);
        let started = Instant::now();

        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(http::header::HOST);
        headers.remove(http::header::CONTENT_LENGTH);

        let result = self
            .client
            .request(request.method.clone(), url.clone())
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await;

        let upstream = match result {
            Ok(response) => response,
            Err(err) => {
                let err = TransportError::from(err);
                warn!("{} {} failed: {}", request.method, url, err);
                return Err(err);
            }
        };

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = upstream.bytes().await.map_err(TransportError::from)?;

        debug!(
            "{} {} -> {} ({} bytes, {:?})",
            request.method,
            url,
            status,
            body.len(),
            started.elapsed()
        );
        Ok(ProxyResponse {
            status,
            headers,
            body,
        })
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}
