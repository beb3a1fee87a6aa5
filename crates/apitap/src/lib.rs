// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! apitap - OpenAPI contract proxy core
//!
//! Receives proxied HTTP requests, decides per request (from live control
//! settings) whether to validate, mock or forward them, and publishes every
//! completed exchange as a [`Transaction`] on an in-process [`EventBus`].
//!
//! # Architecture
//!
//! ```text
//! TransactionPipeline
//! +-- ControlStore       (versioned settings, one snapshot per request)
//! +-- Validator          (request/response conformance against the contract)
//! +-- MockEngine         (deterministic responses synthesized from schemas)
//! +-- UpstreamTransport  (pooled keep-alive HTTP client)
//! +-- EventBus           (transactions + control channels, drop-oldest)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use apitap::{ControlStore, EventBus, HttpTransport, ProxyConfig, TransactionPipeline};
//!
//! let config = ProxyConfig::from_file("apitap.toml")?;
//! let bus = EventBus::with_capacity(config.feed_capacity);
//! let control = Arc::new(ControlStore::new(bus.clone()));
//! control.seed(config.initial_settings());
//!
//! let transport = Arc::new(HttpTransport::new(&config.upstream, &config.transport)?);
//! let pipeline = TransactionPipeline::new(control, bus, None, transport, config.pipeline_options());
//! let response = pipeline.handle(request).await;
//! ```

pub mod bus;
pub mod config;
pub mod control;
pub mod error;
pub mod mock;
pub mod pipeline;
pub mod schema;
pub mod transaction;
pub mod transport;
pub mod validate;

pub use bus::{BusEvent, Channel, EventBus, Subscription, DEFAULT_CHANNEL_CAPACITY};
pub use config::{MonitorPlaceholders, ProxyConfig, TransportConfig};
pub use control::{
    ControlCommand, ControlReply, ControlService, ControlSnapshot, ControlStore, Scope,
    SettingChange, SettingKey, SettingName, SettingValue, ValidationMode,
};
pub use error::{CommandError, ConfigError, ControlError, SchemaError, TransportError};
pub use mock::{MockEngine, MOCK_STATUS_HEADER};
pub use pipeline::{PipelineOptions, TransactionPipeline};
pub use schema::{Operation, RouteMatch, Schema, SchemaKind, SchemaModel};
pub use transaction::{
    ProxyRequest, ProxyResponse, Transaction, TransactionFault, TransactionMode, ViolationSet,
};
pub use transport::{HttpTransport, UpstreamTransport};
pub use validate::{Validator, Violation, ViolationLocation};

/// Crate version, exposed for the monitor placeholders and the live feed.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
