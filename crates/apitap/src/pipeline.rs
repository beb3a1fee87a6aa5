// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transaction pipeline.
//!
//! One [`TransactionPipeline::handle`] call per inbound request:
//!
//! ```text
//! Received   id + timestamp, control snapshot, operation lookup
//!    |
//! Decided    mock? validate? (scoped setting, else global, else default)
//!    |
//!    +--> Rejected    enforce + request violations (never when mocking)
//!    +--> Mocking     MockEngine, no upstream call
//!    +--> Forwarding  UpstreamTransport
//!    |
//! Completed  Transaction published exactly once, response returned once
//! ```
//!
//! The snapshot taken on entry is used for the whole request, so a control
//! change never affects a request already in flight. Panics inside the
//! pipeline become a 500 response plus an `internal` fault. If the caller
//! goes away and the future is dropped, a `cancelled` transaction is
//! published in place of the normal one.

use crate::bus::{BusEvent, Channel, EventBus};
use crate::control::{ControlStore, ValidationMode};
use crate::error::TransportError;
use crate::mock::MockEngine;
use crate::schema::{Operation, SchemaModel};
use crate::transaction::{
    HttpRequestRecord, HttpResponseRecord, ProxyRequest, ProxyResponse, Transaction,
    TransactionFault, TransactionMode, ViolationSet,
};
use crate::transport::UpstreamTransport;
use crate::validate::Validator;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use http::StatusCode;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Pipeline tuning that is fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Status of responses rejected under `enforce` (4xx).
    pub reject_status: u16,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { reject_status: 400 }
    }
}

/// Coordinates control, validation, mocking and forwarding per request.
pub struct TransactionPipeline {
    control: Arc<ControlStore>,
    bus: EventBus,
    model: Option<Arc<SchemaModel>>,
    validator: Option<Validator>,
    mock: MockEngine,
    transport: Arc<dyn UpstreamTransport>,
    options: PipelineOptions,
}

impl TransactionPipeline {
    /// Without a `model` the pipeline forwards everything, unvalidated.
    pub fn new(
        control: Arc<ControlStore>,
        bus: EventBus,
        model: Option<Arc<SchemaModel>>,
        transport: Arc<dyn UpstreamTransport>,
        options: PipelineOptions,
    ) -> Self {
        if model.is_none() {
            info!("No contract loaded: forward-only, validation and mocking disabled");
        }
        Self {
            validator: model.clone().map(Validator::new),
            mock: MockEngine::new(model.clone()),
            control,
            bus,
            model,
            transport,
            options,
        }
    }

    pub fn control(&self) -> &Arc<ControlStore> {
        &self.control
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn model(&self) -> Option<&Arc<SchemaModel>> {
        self.model.as_ref()
    }

    /// Process one request to completion and return the caller's response.
    pub async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
        let mut flight = InFlight::start(self.bus.clone(), &request);

        let outcome = AssertUnwindSafe(self.process(&request, &mut flight.progress))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(response) => response,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    "Pipeline fault on {} {}: {}",
                    request.method,
                    request.path(),
                    message
                );
                flight.progress.fault = Some(TransactionFault::Internal {
                    message: message.clone(),
                });
                ProxyResponse::json(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({"error": "internal proxy error", "message": message}),
                    false,
                )
            }
        };

        flight.complete(&response);
        response
    }

    async fn process(&self, request: &ProxyRequest, progress: &mut Progress) -> ProxyResponse {
        let snapshot = self.control.snapshot();

        let (Some(model), Some(validator)) = (&self.model, &self.validator) else {
            progress.mode = TransactionMode::Forwarded;
            let delay = snapshot.delay(None);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            return self.forward(request, progress, None, None).await;
        };

        let route = model.find_operation(&request.method, request.path());
        let scope = route.as_ref().map(|r| r.operation.id.as_str());
        progress.operation = scope.map(str::to_string);

        let mock = snapshot.mock_mode(scope);
        progress.mode = if mock {
            TransactionMode::Mocked
        } else {
            TransactionMode::Forwarded
        };
        let validation = snapshot.validation(scope);
        let delay = snapshot.delay(scope);
        debug!(
            "{} {} -> operation={} mock={} validation={} delay={:?} (control v{})",
            request.method,
            request.path(),
            scope.unwrap_or("-"),
            mock,
            validation.as_str(),
            delay,
            snapshot.version()
        );

        if validation.is_enabled() {
            progress.violations.request = validator.validate(request, None, route.as_ref()).request;
        }

        if !mock
            && validation == ValidationMode::Enforce
            && !progress.violations.request.is_empty()
        {
            progress.mode = TransactionMode::Rejected;
            return self.reject(progress);
        }

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let operation = route.as_ref().map(|r| r.operation);
        let checker = validation.is_enabled().then_some(validator);
        if mock {
            let response = self
                .mock
                .generate_response(request, route.as_ref(), snapshot.mock_pretty(scope));
            if let (Some(validator), Some(op)) = (checker, operation) {
                progress.violations.response = validator.validate_response(&response, op);
            }
            response
        } else {
            self.forward(request, progress, operation, checker).await
        }
    }

    async fn forward(
        &self,
        request: &ProxyRequest,
        progress: &mut Progress,
        operation: Option<&Operation>,
        validator: Option<&Validator>,
    ) -> ProxyResponse {
        match self.transport.forward(request).await {
            Ok(response) => {
                if let (Some(validator), Some(op)) = (validator, operation) {
                    progress.violations.response = validator.validate_response(&response, op);
                }
                response
            }
            Err(err) => {
                progress.fault = Some(TransactionFault::Transport {
                    reason: err.kind().to_string(),
                    message: err.to_string(),
                });
                bad_gateway(&err)
            }
        }
    }

    fn reject(&self, progress: &Progress) -> ProxyResponse {
        let status =
            StatusCode::from_u16(self.options.reject_status).unwrap_or(StatusCode::BAD_REQUEST);
        ProxyResponse::json(
            status,
            &json!({
                "error": "request does not conform to the contract",
                "operation": progress.operation,
                "violations": progress.violations.request,
            }),
            false,
        )
    }
}

fn bad_gateway(err: &TransportError) -> ProxyResponse {
    ProxyResponse::json(
        StatusCode::BAD_GATEWAY,
        &json!({
            "error": "upstream request failed",
            "reason": err.kind(),
            "message": err.to_string(),
        }),
        false,
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

// ============================================================================
// In-flight record
// ============================================================================

/// What the pipeline decided so far.
struct Progress {
    mode: TransactionMode,
    operation: Option<String>,
    violations: ViolationSet,
    fault: Option<TransactionFault>,
}

/// Owns the pending transaction; publishes it exactly once, on completion
/// or, if the request future is dropped first, as cancelled.
struct InFlight {
    bus: EventBus,
    id: Uuid,
    timestamp: DateTime<Utc>,
    started: Instant,
    request: Option<HttpRequestRecord>,
    progress: Progress,
}

impl InFlight {
    fn start(bus: EventBus, request: &ProxyRequest) -> Self {
        Self {
            bus,
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            started: Instant::now(),
            request: Some(HttpRequestRecord::capture(request)),
            // Until decided.
            progress: Progress {
                mode: TransactionMode::Forwarded,
                operation: None,
                violations: ViolationSet::default(),
                fault: None,
            },
        }
    }

    fn complete(&mut self, response: &ProxyResponse) {
        self.publish(Some(HttpResponseRecord::capture(response)), false);
    }

    fn publish(&mut self, response: Option<HttpResponseRecord>, cancelled: bool) {
        let Some(request) = self.request.take() else {
            return;
        };
        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let progress = &mut self.progress;

        let transaction = Transaction {
            id: self.id,
            timestamp: self.timestamp,
            request,
            response,
            mode: progress.mode,
            operation: progress.operation.take(),
            violations: std::mem::take(&mut progress.violations),
            latency_ms,
            fault: progress.fault.take(),
            cancelled,
        };

        if cancelled {
            warn!(
                "{} {} cancelled by caller after {:.1} ms",
                transaction.request.method, transaction.request.path, latency_ms
            );
        } else {
            debug!(
                "{} {} -> {} [{:?}] {} violation(s) in {:.1} ms",
                transaction.request.method,
                transaction.request.path,
                transaction.response.as_ref().map_or(0, |r| r.status),
                transaction.mode,
                transaction.violations.len(),
                latency_ms
            );
        }
        self.bus
            .publish(Channel::Transactions, BusEvent::Transaction(Arc::new(transaction)));
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.publish(None, true);
    }
}
