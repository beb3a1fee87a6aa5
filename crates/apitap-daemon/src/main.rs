// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! apitap daemon - intercepting OpenAPI contract proxy.
//!
//! Runs two listeners:
//! - **Proxy ingress** (`--port`, default 9090): every request goes through
//!   the transaction pipeline (validate, mock or forward). TLS is terminated
//!   here when a certificate and key are configured.
//! - **Control server** (`--control-port`, default 9092): REST settings API
//!   and the `/ws` live transaction feed.
//!
//! # Usage
//!
//! ```bash
//! # Forward to an upstream, validating against a contract
//! apitap --upstream https://api.example.com/v1 --contract petstore.yaml
//!
//! # Mock everything, reject non-conformant requests
//! apitap -u http://localhost:8080 -s petstore.yaml --mock --validation enforce
//!
//! # Load a TOML file, override the port
//! apitap --config apitap.toml --port 8443
//! ```

mod handlers;
mod ingress;
mod protocol;
mod routes;
mod session;
mod tls;

use anyhow::{Context, Result};
use apitap::{
    ControlService, ControlStore, EventBus, HttpTransport, ProxyConfig, SchemaModel,
    TransactionPipeline, ValidationMode,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// apitap proxy daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "apitap")]
#[command(about = "Intercepting proxy that validates and mocks traffic against an OpenAPI contract")]
#[command(version)]
struct Args {
    /// TOML configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream base URL (its path is prefixed to every forwarded path)
    #[arg(short, long)]
    upstream: Option<String>,

    /// OpenAPI 3.x contract (.json, .yaml, .yml)
    #[arg(short = 's', long)]
    contract: Option<PathBuf>,

    /// Proxy ingress port
    #[arg(short, long)]
    port: Option<u16>,

    /// Control API and live feed port
    #[arg(long)]
    control_port: Option<u16>,

    /// Bind address for both listeners
    #[arg(short, long)]
    bind: Option<String>,

    /// PEM certificate chain; with --certificate-key enables TLS on the proxy ingress
    #[arg(long)]
    certificate: Option<PathBuf>,

    /// PEM private key matching --certificate
    #[arg(long)]
    certificate_key: Option<PathBuf>,

    /// Start with global mock mode on
    #[arg(long)]
    mock: bool,

    /// Pretty-print mocked JSON bodies
    #[arg(long)]
    pretty: bool,

    /// Initial validation mode (off, report, enforce)
    #[arg(long)]
    validation: Option<ValidationMode>,

    /// Initial global delay in milliseconds
    #[arg(long)]
    delay: Option<u64>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Maximum concurrent live feed connections
    #[arg(long, default_value = "100")]
    max_clients: usize,
}

impl Args {
    /// Resolve the effective configuration: file first, then flags.
    fn to_config(&self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => ProxyConfig::parse_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ProxyConfig::default(),
        };

        if let Some(upstream) = &self.upstream {
            config.upstream = upstream.clone();
        }
        if let Some(contract) = &self.contract {
            config.contract = Some(contract.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(port) = self.control_port {
            config.control_port = port;
        }
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(certificate) = &self.certificate {
            config.certificate = Some(certificate.clone());
        }
        if let Some(key) = &self.certificate_key {
            config.certificate_key = Some(key.clone());
        }
        if self.mock {
            config.mock_mode = true;
        }
        if self.pretty {
            config.mock_pretty = true;
        }
        if let Some(mode) = self.validation {
            config.validation = mode;
        }
        if let Some(delay) = self.delay {
            config.delay_ms = delay;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

/// Shared application state
pub struct AppState {
    pipeline: Arc<TransactionPipeline>,
    control: ControlService,
    config: ProxyConfig,
    max_clients: usize,
    client_count: RwLock<usize>,
}

impl AppState {
    /// Wire the proxy core from a validated configuration.
    fn new(config: ProxyConfig, max_clients: usize) -> Result<Self> {
        let model = match &config.contract {
            Some(path) => {
                let model = SchemaModel::from_file(path)
                    .with_context(|| format!("Failed to load contract {}", path.display()))?;
                Some(Arc::new(model))
            }
            None => {
                info!("No contract configured, forwarding without validation");
                None
            }
        };

        let transport = HttpTransport::new(&config.upstream, &config.transport)
            .context("Failed to build upstream transport")?;

        let bus = EventBus::with_capacity(config.feed_capacity);
        let store = Arc::new(ControlStore::new(bus.clone()));
        store
            .seed(config.initial_settings())
            .context("Failed to seed control settings")?;

        let pipeline = TransactionPipeline::new(
            store.clone(),
            bus,
            model,
            Arc::new(transport),
            config.pipeline_options(),
        );

        Ok(Self {
            pipeline: Arc::new(pipeline),
            control: ControlService::new(store),
            config,
            max_clients,
            client_count: RwLock::new(0),
        })
    }

    pub fn pipeline(&self) -> &Arc<TransactionPipeline> {
        &self.pipeline
    }

    pub fn control(&self) -> &ControlService {
        &self.control
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    async fn can_accept_client(&self) -> bool {
        let count = *self.client_count.read().await;
        count < self.max_clients
    }

    async fn add_client(&self) {
        let mut count = self.client_count.write().await;
        *count += 1;
        info!("Feed client connected. Total: {}", *count);
    }

    async fn remove_client(&self) {
        let mut count = self.client_count.write().await;
        *count = count.saturating_sub(1);
        info!("Feed client disconnected. Total: {}", *count);
    }

    async fn client_count(&self) -> usize {
        *self.client_count.read().await
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.to_config()?;
    init_logging(&config.log_level);

    info!("apitap v{}", apitap::VERSION);
    info!("Upstream: {}", config.upstream);

    if config.tls_incomplete() {
        warn!("TLS disabled: certificate and certificate_key must both be set, serving plaintext");
    }
    let acceptor = match (&config.certificate, &config.certificate_key) {
        (Some(cert), Some(key)) => Some(tls::load_acceptor(cert, key)?),
        _ => None,
    };

    let proxy_addr = format!("{}:{}", config.bind, config.port);
    let control_addr = format!("{}:{}", config.bind, config.control_port);

    let state = Arc::new(AppState::new(config, args.max_clients)?);

    let proxy_listener = tokio::net::TcpListener::bind(&proxy_addr)
        .await
        .with_context(|| format!("Failed to bind proxy listener on {}", proxy_addr))?;
    let control_listener = tokio::net::TcpListener::bind(&control_addr)
        .await
        .with_context(|| format!("Failed to bind control listener on {}", control_addr))?;

    let scheme = if acceptor.is_some() { "https" } else { "http" };
    info!("Proxy endpoint: {}://{}", scheme, proxy_addr);
    info!("Control API: http://{}/api/v1", control_addr);
    info!("Live feed: ws://{}/ws", control_addr);

    let proxy = ingress::serve(proxy_listener, ingress::router(state.clone()), acceptor);
    let control = routes::serve(control_listener, routes::build_router(state));

    tokio::select! {
        result = proxy => result.context("Proxy server failed")?,
        result = control => result.context("Control server failed")?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::AppState;
    use apitap::ProxyConfig;
    use std::path::PathBuf;
    use std::sync::Arc;

    pub fn petstore_path() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../apitap/tests/fixtures/petstore.yaml")
    }

    /// State over the petstore contract with a closed upstream port.
    pub fn state(mock: bool) -> Arc<AppState> {
        let mut config = ProxyConfig::for_upstream("http://127.0.0.1:9");
        config.contract = Some(petstore_path());
        config.mock_mode = mock;
        config.transport.connect_timeout_ms = 500;
        Arc::new(AppState::new(config, 2).unwrap())
    }

    pub async fn spawn(app: axum::Router) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"upstream = \"http://file.local\"\nport = 7000\nvalidation = \"off\"\n",
        )
        .unwrap();

        let args = Args::parse_from([
            "apitap",
            "--config",
            file.path().to_str().unwrap(),
            "--port",
            "7100",
            "--validation",
            "enforce",
            "--mock",
        ]);
        let config = args.to_config().unwrap();
        assert_eq!(config.upstream, "http://file.local");
        assert_eq!(config.port, 7100);
        assert_eq!(config.validation, ValidationMode::Enforce);
        assert!(config.mock_mode);
    }

    #[test]
    fn upstream_may_come_from_flags_only() {
        let args = Args::parse_from(["apitap", "-u", "http://localhost:8080"]);
        assert!(args.to_config().is_ok());

        let args = Args::parse_from(["apitap"]);
        assert!(args.to_config().is_err());
    }

    #[test]
    fn certificate_without_key_serves_plaintext() {
        let args = Args::parse_from([
            "apitap",
            "-u",
            "http://localhost:8080",
            "--certificate",
            "a.pem",
        ]);
        let config = args.to_config().unwrap();
        assert!(!config.tls_enabled());
        assert!(config.tls_incomplete());

        let args = Args::parse_from([
            "apitap",
            "-u",
            "http://localhost:8080",
            "--certificate",
            "a.pem",
            "--certificate-key",
            "a.key",
        ]);
        assert!(args.to_config().unwrap().tls_enabled());
    }

    #[test]
    fn unreadable_contract_is_fatal() {
        let mut config = ProxyConfig::for_upstream("http://localhost:8080");
        config.contract = Some(PathBuf::from("/nonexistent/contract.yaml"));
        let err = AppState::new(config, 1).err().unwrap();
        assert!(err.to_string().contains("contract"));
    }

    #[test]
    fn initial_settings_are_seeded() {
        let state = test_support::state(true);
        let snapshot = state.pipeline().control().snapshot();
        assert!(snapshot.mock_mode(None));
        assert_eq!(snapshot.validation(None), ValidationMode::Report);
    }
}
