// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Proxy configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration. Every
//! field has a default, so a file only needs `upstream`:
//!
//! ```toml
//! upstream = "https://api.example.com/v1"
//! contract = "petstore.yaml"
//! port = 9090
//! control_port = 9092
//! validation = "enforce"
//!
//! [transport]
//! max_idle_per_host = 20
//! idle_timeout_ms = 30000
//! ```

use crate::control::{SettingKey, SettingName, SettingValue, ValidationMode, MAX_DELAY_MS};
use crate::error::ConfigError;
use crate::pipeline::PipelineOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Upstream base URL. Its path is prefixed to every forwarded path.
    #[serde(default)]
    pub upstream: String,

    /// Listen address for the proxy and control servers.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Proxy ingress port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Control API and live feed port.
    #[serde(default = "default_control_port")]
    pub control_port: u16,

    /// OpenAPI contract (`.json`, `.yaml`, `.yml`). Absent = forward only.
    #[serde(default)]
    pub contract: Option<PathBuf>,

    /// PEM certificate chain for TLS on the proxy ingress.
    #[serde(default)]
    pub certificate: Option<PathBuf>,

    /// PEM private key matching `certificate`.
    #[serde(default)]
    pub certificate_key: Option<PathBuf>,

    /// Initial global mock mode.
    #[serde(default)]
    pub mock_mode: bool,

    /// Initial global pretty-printing of mocked JSON.
    #[serde(default)]
    pub mock_pretty: bool,

    /// Initial global validation mode.
    #[serde(default)]
    pub validation: ValidationMode,

    /// Initial global injected delay (ms).
    #[serde(default)]
    pub delay_ms: u64,

    /// Status returned for requests rejected under `enforce`.
    #[serde(default = "default_reject_status")]
    pub reject_status: u16,

    /// Inbound request body limit.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Per-channel event bus capacity.
    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,

    /// Upstream connection pool settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Log level (overridden by `RUST_LOG`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_control_port() -> u16 {
    9092
}

fn default_reject_status() -> u16 {
    400
}

fn default_max_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_feed_capacity() -> usize {
    crate::bus::DEFAULT_CHANNEL_CAPACITY
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream: String::new(),
            bind: default_bind(),
            port: default_port(),
            control_port: default_control_port(),
            contract: None,
            certificate: None,
            certificate_key: None,
            mock_mode: false,
            mock_pretty: false,
            validation: ValidationMode::default(),
            delay_ms: 0,
            reject_status: default_reject_status(),
            max_body_bytes: default_max_body_bytes(),
            feed_capacity: default_feed_capacity(),
            transport: TransportConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl ProxyConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file without validating it.
    ///
    /// For callers that apply overrides (CLI flags) before calling
    /// [`validate`](Self::validate).
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Proxy `upstream` with everything else defaulted.
    pub fn for_upstream(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            ..Default::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.is_empty() {
            return Err(ConfigError::Invalid("No upstream configured".into()));
        }
        let upstream = url::Url::parse(&self.upstream).map_err(|e| {
            ConfigError::Invalid(format!("Upstream '{}' is not a URL: {}", self.upstream, e))
        })?;
        if !matches!(upstream.scheme(), "http" | "https") || upstream.host_str().is_none() {
            return Err(ConfigError::Invalid(format!(
                "Upstream '{}' must be an absolute http(s) URL",
                self.upstream
            )));
        }

        if self.port == self.control_port {
            return Err(ConfigError::Invalid(format!(
                "Proxy and control ports must differ (both {})",
                self.port
            )));
        }

        if !(400..500).contains(&self.reject_status) {
            return Err(ConfigError::Invalid(format!(
                "reject_status must be a 4xx code, got {}",
                self.reject_status
            )));
        }

        if self.delay_ms > MAX_DELAY_MS {
            return Err(ConfigError::Invalid(format!(
                "delay_ms {} exceeds the {} ms maximum",
                self.delay_ms, MAX_DELAY_MS
            )));
        }

        if self.max_body_bytes == 0 || self.feed_capacity == 0 {
            return Err(ConfigError::Invalid(
                "max_body_bytes and feed_capacity must be positive".into(),
            ));
        }

        self.transport.validate()
    }

    /// TLS is served only when both certificate and key are configured.
    pub fn tls_enabled(&self) -> bool {
        self.certificate.is_some() && self.certificate_key.is_some()
    }

    /// One half of the certificate pair is set without the other.
    pub fn tls_incomplete(&self) -> bool {
        self.certificate.is_some() != self.certificate_key.is_some()
    }

    /// Global settings to seed into the control store at startup.
    pub fn initial_settings(&self) -> Vec<(SettingKey, SettingValue)> {
        vec![
            (
                SettingKey::global(SettingName::MockMode),
                SettingValue::Bool(self.mock_mode),
            ),
            (
                SettingKey::global(SettingName::Validation),
                SettingValue::Validation(self.validation),
            ),
            (
                SettingKey::global(SettingName::DelayMs),
                SettingValue::DelayMs(self.delay_ms),
            ),
            (
                SettingKey::global(SettingName::MockPretty),
                SettingValue::Bool(self.mock_pretty),
            ),
        ]
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            reject_status: self.reject_status,
        }
    }

    /// Values substituted into the monitor UI document.
    pub fn placeholders(&self) -> MonitorPlaceholders {
        MonitorPlaceholders {
            port: self.control_port,
            version: crate::VERSION.to_string(),
            tls: self.tls_enabled(),
        }
    }
}

/// Upstream pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Idle keep-alive connections kept per upstream host.
    #[serde(default = "default_max_idle")]
    pub max_idle_per_host: usize,

    /// Idle connections are closed after this long.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Whole-exchange timeout (headers and body).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_max_idle() -> usize {
    20
}

fn default_idle_timeout() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    5_000
}

fn default_request_timeout() -> u64 {
    60_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_max_idle(),
            idle_timeout_ms: default_idle_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_ms == 0
            || self.connect_timeout_ms == 0
            || self.request_timeout_ms == 0
        {
            return Err(ConfigError::Invalid("transport timeouts must be positive".into()));
        }
        Ok(())
    }
}

/// Values injected into the monitor UI document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorPlaceholders {
    /// Port serving the control API and live feed.
    pub port: u16,
    pub version: String,
    pub tls: bool,
}

impl MonitorPlaceholders {
    pub const PORT: &'static str = "%APITAP_PORT%";
    pub const VERSION: &'static str = "%APITAP_VERSION%";
    pub const TLS: &'static str = "%APITAP_TLS%";

    /// Replace every placeholder occurrence in `document`.
    pub fn substitute(&self, document: &str) -> String {
        document
            .replace(Self::PORT, &self.port.to_string())
            .replace(Self::VERSION, &self.version)
            .replace(Self::TLS, if self.tls { "true" } else { "false" })
    }
}
