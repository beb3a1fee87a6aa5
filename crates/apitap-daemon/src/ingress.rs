// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy ingress: any method, any path, into the transaction pipeline.

use crate::AppState;
use anyhow::Result;
use apitap::{ProxyRequest, ProxyResponse};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// Catch-all router handing every request to the pipeline.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(proxy)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Serve the proxy router, terminating TLS when an acceptor is given.
pub async fn serve(listener: TcpListener, app: Router, tls: Option<TlsAcceptor>) -> Result<()> {
    match tls {
        None => axum::serve(listener, app).await?,
        Some(acceptor) => serve_tls(listener, acceptor, app).await,
    }
    Ok(())
}

async fn serve_tls(listener: TcpListener, acceptor: TlsAcceptor, app: Router) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
            };

            let service = TowerToHyperService::new(app);
            if let Err(e) = auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!("Connection from {} ended: {}", peer, e);
            }
        });
    }
}

async fn proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let limit = state.config().max_body_bytes;
    let (parts, body) = request.into_parts();

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return body_error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large");
    }

    let body = match read_body(body, limit).await {
        Ok(body) => body,
        Err(BodyError::TooLarge) => {
            return body_error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
        }
        Err(BodyError::Read(reason)) => {
            warn!("Failed to read request body: {}", reason);
            return body_error(StatusCode::BAD_REQUEST, "request body could not be read");
        }
    };

    let request = ProxyRequest {
        method: parts.method,
        uri: origin_form(&parts.uri),
        headers: parts.headers,
        body,
    };

    into_response(state.pipeline().handle(request).await)
}

enum BodyError {
    TooLarge,
    Read(String),
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, BodyError> {
    let mut stream = body.into_data_stream();
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BodyError::Read(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(BodyError::TooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}

/// Absolute-form request targets are reduced to path and query.
fn origin_form(uri: &Uri) -> Uri {
    uri.path_and_query()
        .map(|pq| Uri::from(pq.clone()))
        .unwrap_or_else(|| Uri::from_static("/"))
}

fn body_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn into_response(response: ProxyResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}
