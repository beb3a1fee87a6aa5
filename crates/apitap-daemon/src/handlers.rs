// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP request handlers for the control API.

use crate::session::FeedSession;
use crate::AppState;
use apitap::control::ReplyCode;
use apitap::{Channel, ControlCommand, ControlReply};
use axum::{
    body::Bytes,
    extract::{ws::WebSocket, Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// API error response
#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Map a control reply to an HTTP response.
fn reply(reply: ControlReply) -> Response {
    let status = match &reply {
        ControlReply::Error {
            code: ReplyCode::InvalidKey,
            ..
        } => StatusCode::NOT_FOUND,
        ControlReply::Error { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };
    (status, Json(reply)).into_response()
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let pipeline = state.pipeline();
    Json(json!({
        "status": "ok",
        "version": apitap::VERSION,
        "contract": pipeline.model().is_some(),
        "control_version": pipeline.control().version(),
        "clients": state.client_count().await,
        "max_clients": state.max_clients(),
    }))
}

/// GET /api/v1/info
pub async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config();
    let bus = state.pipeline().bus();
    let contract = state.pipeline().model().map(|model| {
        json!({
            "title": model.title,
            "version": model.version,
            "base_path": model.base_path,
            "operations": model
                .operations()
                .iter()
                .map(|op| op.id.as_str())
                .collect::<Vec<_>>(),
        })
    });

    Json(json!({
        "name": "apitap",
        "version": apitap::VERSION,
        "upstream": config.upstream,
        "proxy_port": config.port,
        "control_port": config.control_port,
        "tls": config.tls_enabled(),
        "contract": contract,
        "placeholders": config.placeholders(),
        "feed": {
            "capacity": bus.capacity(),
            "subscribers": bus.subscriber_count(Channel::Transactions),
            "published": bus.published_total(),
        },
        "endpoints": [
            "/health",
            "/api/v1/info",
            "/api/v1/settings",
            "/api/v1/settings/{key}",
            "/api/v1/control",
            "/ws",
        ]
    }))
}

/// GET /api/v1/settings
pub async fn list_settings(State(state): State<Arc<AppState>>) -> Response {
    reply(state.control().handle(ControlCommand::ListSettings))
}

/// GET /api/v1/settings/{key}
pub async fn get_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Response {
    reply(state.control().handle(ControlCommand::GetSetting { key }))
}

/// PUT /api/v1/settings/{key} with a JSON value body
pub async fn set_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: Bytes,
) -> Response {
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return reply(ControlReply::error(
                ReplyCode::InvalidValue,
                format!("Body is not a JSON value: {}", e),
            ))
        }
    };
    reply(state.control().handle(ControlCommand::SetSetting { key, value }))
}

/// POST /api/v1/control with a tagged command
pub async fn control(State(state): State<Arc<AppState>>, body: String) -> Response {
    let outcome = match ControlCommand::parse(&body) {
        Ok(ControlCommand::SubscribeTransactions | ControlCommand::UnsubscribeTransactions) => {
            ControlReply::error(
                ReplyCode::NotSupported,
                "Transaction subscriptions are only available on /ws",
            )
        }
        Ok(command) => state.control().handle(command),
        Err(e) => {
            warn!("Rejected control command: {}", e);
            e.into()
        }
    };
    reply(outcome)
}

/// GET /ws - live feed upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    if !state.can_accept_client().await {
        warn!("Feed connection rejected: max clients reached");
        return ApiError {
            error: "Too many feed connections".into(),
            code: 503,
        }
        .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    state.add_client().await;

    let session = FeedSession::new(
        state.control().clone(),
        state.pipeline().bus().clone(),
        state.config().placeholders(),
    );
    if let Err(e) = session.run(socket).await {
        error!("Feed session error: {}", e);
    }

    state.remove_client().await;
}

#[cfg(test)]
mod tests {
    use crate::{routes, test_support};
    use serde_json::{json, Value};

    async fn control_server(mock: bool) -> String {
        let state = test_support::state(mock);
        let addr = test_support::spawn(routes::build_router(state)).await;
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn health_reports_contract() {
        let base = control_server(false).await;
        let body: Value = reqwest::get(format!("{}/health", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["contract"], true);
        assert_eq!(body["max_clients"], 2);
    }

    #[tokio::test]
    async fn info_lists_operations() {
        let base = control_server(false).await;
        let body: Value = reqwest::get(format!("{}/api/v1/info", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["contract"]["title"], "Petstore");
        let operations = body["contract"]["operations"].as_array().unwrap();
        assert!(operations.contains(&json!("GET /pets/{petId}")));
        assert_eq!(body["tls"], false);
        assert_eq!(body["placeholders"]["port"], 9092);
    }

    #[tokio::test]
    async fn scoped_setting_round_trip() {
        let base = control_server(false).await;
        let client = reqwest::Client::new();
        let url = format!("{}/api/v1/settings/mock_mode%40GET%20%2Fpets", base);

        let response = client.put(&url).json(&json!(true)).send().await.unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["type"], "setting_updated");
        assert_eq!(body["key"], "mock_mode@GET /pets");

        let body: Value = client.get(&url).send().await.unwrap().json().await.unwrap();
        assert_eq!(body["found"], true);
        assert_eq!(body["value"], true);

        let body: Value = client
            .get(format!("{}/api/v1/settings", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let keys: Vec<&str> = body["settings"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|s| s["key"].as_str())
            .collect();
        assert!(keys.contains(&"mock_mode@GET /pets"));
        assert!(keys.contains(&"validation"));
    }

    #[tokio::test]
    async fn bad_keys_and_values_are_rejected() {
        let base = control_server(false).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{}/api/v1/settings/bogus", base))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_KEY");

        let response = client
            .put(format!("{}/api/v1/settings/mock_mode", base))
            .json(&json!("yes"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_VALUE");
    }

    #[tokio::test]
    async fn control_endpoint_dispatches_commands() {
        let base = control_server(false).await;
        let client = reqwest::Client::new();
        let post = |command: Value| {
            client
                .post(format!("{}/api/v1/control", base))
                .body(command.to_string())
                .send()
        };

        let response = post(json!({"type": "set_setting", "key": "validation", "value": "enforce"}))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = post(json!({"type": "reboot"})).await.unwrap();
        assert_eq!(response.status(), 400);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "UNRECOGNIZED_COMMAND");

        let response = post(json!({"type": "subscribe_transactions"})).await.unwrap();
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["code"], "NOT_SUPPORTED");

        let body: Value = post(json!({"type": "get_setting", "key": "validation"}))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["value"], "enforce");
    }
}
