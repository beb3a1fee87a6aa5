// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types shared across the proxy core.

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while loading or resolving the OpenAPI contract.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported OpenAPI version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid contract: {0}")]
    Invalid(String),

    #[error("Unresolvable reference: {0}")]
    UnresolvedRef(String),

    #[error("Reference chain too deep at {0}")]
    RefDepth(String),
}

/// Upstream transport failures, surfaced to the caller as a 502-class response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("upstream connection failed: {0}")]
    Connect(String),

    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream TLS handshake failed: {0}")]
    Tls(String),

    #[error("upstream body could not be read: {0}")]
    Body(String),

    #[error("invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error("upstream transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Short machine-readable kind, used in diagnostic bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Timeout => "timeout",
            Self::Tls(_) => "tls",
            Self::Body(_) => "body",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        if err.is_connect() {
            let chain = error_chain(&err);
            let lower = chain.to_ascii_lowercase();
            if lower.contains("tls") || lower.contains("certificate") || lower.contains("handshake")
            {
                return Self::Tls(chain);
            }
            return Self::Connect(chain);
        }
        if err.is_body() || err.is_decode() {
            return Self::Body(error_chain(&err));
        }
        if err.is_builder() {
            return Self::InvalidUrl(error_chain(&err));
        }
        Self::Other(error_chain(&err))
    }
}

/// Flatten an error and its sources into one line.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        source = inner.source();
    }
    out
}

/// Control store mutation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("Unknown setting key: {0}")]
    UnknownKey(String),

    #[error("Invalid value for '{key}': expected {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Value out of range for '{key}': {reason}")]
    OutOfRange { key: String, reason: String },
}

/// Control command parse errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unrecognized command: {0}")]
    Unrecognized(String),

    #[error("Malformed command: {0}")]
    Malformed(String),
}
