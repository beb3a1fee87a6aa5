// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route definitions for the control server.

use crate::handlers;
use crate::AppState;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// API v1 routes
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/info", get(handlers::info))
        .route("/api/v1/settings", get(handlers::list_settings))
        .route(
            "/api/v1/settings/*key",
            get(handlers::get_setting).put(handlers::set_setting),
        )
        .route("/api/v1/control", post(handlers::control))
        .route("/health", get(handlers::health))
}

/// Live transaction feed
pub fn feed_routes() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(handlers::ws_handler))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api_routes())
        .merge(feed_routes())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    axum::serve(listener, app).await?;
    Ok(())
}
