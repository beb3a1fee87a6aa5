// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TLS termination for the proxy ingress.
//!
//! Certificate chain and private key are read from PEM files. The acceptor
//! advertises `h2` and `http/1.1` over ALPN.

use anyhow::{bail, Context, Result};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// Build a TLS acceptor from PEM certificate and key files.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_pem = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read certificate {}", cert_path.display()))?;
    let key_pem = std::fs::read(key_path)
        .with_context(|| format!("Failed to read private key {}", key_path.display()))?;

    let acceptor = acceptor_from_pem(&cert_pem, &key_pem).with_context(|| {
        format!(
            "Invalid TLS material ({}, {})",
            cert_path.display(),
            key_path.display()
        )
    })?;
    info!("TLS enabled with certificate {}", cert_path.display());
    Ok(acceptor)
}

pub fn acceptor_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<TlsAcceptor> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_slice_iter(cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .context("Malformed certificate PEM")?;
    if certs.is_empty() {
        bail!("No certificates found in PEM data");
    }

    let key = PrivateKeyDer::from_pem_slice(key_pem).context("Malformed private key PEM")?;

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .context("No usable TLS protocol versions")?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .context("Certificate and private key do not match")?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
