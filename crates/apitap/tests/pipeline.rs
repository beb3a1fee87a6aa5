// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end pipeline behavior under concurrency and live control changes.

use apitap::{
    BusEvent, Channel, ControlStore, EventBus, PipelineOptions, ProxyRequest, ProxyResponse,
    SchemaModel, Subscription, Transaction, TransactionMode, TransactionPipeline, TransportError,
    UpstreamTransport,
};
use async_trait::async_trait;
use futures::StreamExt;
use http::{Method, StatusCode, Uri};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const PETSTORE: &str = include_str!("fixtures/petstore.yaml");

/// Upstream stand-in that counts calls and answers with a fixed item.
#[derive(Default)]
struct CountingUpstream {
    calls: AtomicUsize,
}

#[async_trait]
impl UpstreamTransport for CountingUpstream {
    async fn forward(&self, _request: &ProxyRequest) -> Result<ProxyResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(ProxyResponse::json(StatusCode::OK, &json!({"id": 7}), false))
    }
}

/// Upstream stand-in that holds each request until released.
struct GatedUpstream {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl UpstreamTransport for GatedUpstream {
    async fn forward(&self, _request: &ProxyRequest) -> Result<ProxyResponse, TransportError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ProxyResponse::json(StatusCode::OK, &json!({"id": 1}), false))
    }
}

fn build(
    capacity: usize,
    transport: Arc<dyn UpstreamTransport>,
) -> (Arc<TransactionPipeline>, EventBus) {
    let bus = EventBus::with_capacity(capacity);
    let control = Arc::new(ControlStore::new(bus.clone()));
    let model = Arc::new(SchemaModel::from_yaml_str(PETSTORE).unwrap());
    let pipeline = TransactionPipeline::new(
        control,
        bus.clone(),
        Some(model),
        transport,
        PipelineOptions::default(),
    );
    (Arc::new(pipeline), bus)
}

async fn next_transaction(sub: &mut Subscription) -> Arc<Transaction> {
    let event = tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .expect("timed out waiting for a transaction")
        .expect("bus closed");
    match event {
        BusEvent::Transaction(tx) => tx,
        BusEvent::SettingChanged(_) => panic!("expected a transaction"),
    }
}

fn mixed_request(i: usize) -> (ProxyRequest, TransactionMode) {
    match i % 3 {
        // Mocked by scoped setting.
        0 => (
            ProxyRequest::new(Method::GET, Uri::from_static("/v1/pets?limit=5")),
            TransactionMode::Mocked,
        ),
        // Forwarded, conformant.
        1 => (
            ProxyRequest::new(Method::GET, Uri::from_static("/v1/items")),
            TransactionMode::Forwarded,
        ),
        // Rejected: enforce on createPet, body missing.
        _ => (
            ProxyRequest::new(Method::POST, Uri::from_static("/v1/pets")),
            TransactionMode::Rejected,
        ),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_transaction_per_request_under_concurrency() {
    let upstream = Arc::new(CountingUpstream::default());
    let (pipeline, bus) = build(4096, upstream.clone());
    let control = pipeline.control();
    control.set_json("mock_mode@GET /pets", &json!(true)).unwrap();
    control.set_json("validation@POST /pets", &json!("enforce")).unwrap();

    let mut sub = bus.subscribe(Channel::Transactions);

    let tasks: Vec<_> = (0..1000)
        .map(|i| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                let (request, expected) = mixed_request(i);
                (pipeline.handle(request).await, expected)
            })
        })
        .collect();

    let mut responses = 0;
    for task in tasks {
        let (response, expected) = task.await.unwrap();
        let want = match expected {
            TransactionMode::Rejected => StatusCode::BAD_REQUEST,
            _ => StatusCode::OK,
        };
        assert_eq!(response.status, want);
        responses += 1;
    }
    assert_eq!(responses, 1000);

    let mut ids = HashSet::new();
    let mut modes = [0usize; 3];
    for _ in 0..1000 {
        let tx = next_transaction(&mut sub).await;
        assert!(ids.insert(tx.id), "duplicate transaction {}", tx.id);
        assert!(!tx.cancelled);
        match tx.mode {
            TransactionMode::Mocked => modes[0] += 1,
            TransactionMode::Forwarded => modes[1] += 1,
            TransactionMode::Rejected => modes[2] += 1,
        }
    }
    assert_eq!(modes, [334, 333, 333]);
    assert_eq!(sub.dropped(), 0);

    // Mocked and rejected requests never reach the upstream.
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 333);

    // Nothing more was published.
    let extra = tokio::time::timeout(Duration::from_millis(100), sub.next()).await;
    assert!(extra.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn control_change_does_not_affect_in_flight_request() {
    let upstream = Arc::new(GatedUpstream {
        entered: Notify::new(),
        release: Notify::new(),
    });
    let (pipeline, bus) = build(64, upstream.clone());
    let mut sub = bus.subscribe(Channel::Transactions);

    let in_flight = tokio::spawn({
        let pipeline = pipeline.clone();
        async move {
            pipeline
                .handle(ProxyRequest::new(Method::GET, Uri::from_static("/v1/items")))
                .await
        }
    });

    upstream.entered.notified().await;
    pipeline
        .control()
        .set_json("mock_mode", &json!(true))
        .unwrap();
    upstream.release.notify_one();

    let response = in_flight.await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(next_transaction(&mut sub).await.mode, TransactionMode::Forwarded);

    pipeline
        .handle(ProxyRequest::new(Method::GET, Uri::from_static("/v1/items")))
        .await;
    assert_eq!(next_transaction(&mut sub).await.mode, TransactionMode::Mocked);
}

#[tokio::test]
async fn mocked_bodies_are_byte_identical() {
    let (pipeline, _bus) = build(16, Arc::new(CountingUpstream::default()));
    pipeline.control().set_json("mock_mode", &json!(true)).unwrap();

    let request = || {
        ProxyRequest::new(Method::GET, Uri::from_static("/v1/pets/3"))
            .with_header("x-request-id", "abc")
    };
    let first = pipeline.handle(request()).await;
    let second = pipeline.handle(request()).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body, second.body);

    pipeline.control().set_json("mock_pretty", &json!(true)).unwrap();
    let pretty = pipeline.handle(request()).await;
    assert_ne!(first.body, pretty.body);
    let a: serde_json::Value = serde_json::from_slice(&first.body).unwrap();
    let b: serde_json::Value = serde_json::from_slice(&pretty.body).unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn enforcement_short_circuits_invalid_requests() {
    let upstream = Arc::new(CountingUpstream::default());
    let (pipeline, bus) = build(16, upstream.clone());
    pipeline.control().set_json("validation", &json!("enforce")).unwrap();
    let mut sub = bus.subscribe(Channel::Transactions);

    let request = ProxyRequest::new(Method::POST, Uri::from_static("/v1/pets"))
        .with_header("content-type", "application/json")
        .with_body(r#"{"name": "", "owner": "me"}"#);
    let response = pipeline.handle(request).await;

    assert!(response.status.is_client_error());
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);

    let tx = next_transaction(&mut sub).await;
    assert_eq!(tx.mode, TransactionMode::Rejected);
    assert_eq!(tx.violations.request.len(), 2);
    assert_eq!(tx.operation.as_deref(), Some("POST /pets"));

    // A conformant request passes through.
    let request = ProxyRequest::new(Method::POST, Uri::from_static("/v1/pets"))
        .with_header("content-type", "application/json")
        .with_body(r#"{"name": "Rex"}"#);
    pipeline.handle(request).await;
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    let tx = next_transaction(&mut sub).await;
    assert_eq!(tx.mode, TransactionMode::Forwarded);
    assert!(tx.violations.request.is_empty());
    // The fixed upstream answer is not a declared status for createPet.
    assert_eq!(tx.violations.response.len(), 1);
}
