//! TLS setup for PostgreSQL connections
//!
//! The `sslmode` of the connection string decides whether TLS is used at
//! all. Certificate verification is off unless the connector is given a CA
//! certificate or asked to verify, matching what `sslmode=require` means
//! to libpq.

use std::fs;
use std::path::{Path, PathBuf};

use native_tls::{Certificate, TlsConnector};
use postgres_native_tls::MakeTlsConnector;
use slspg_core::{Result, SlsError};
use tokio_postgres::config::SslMode;

/// Server certificate handling for TLS connections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the server certificate and hostname
    pub verify_server: bool,
    /// PEM-encoded CA certificate to trust in addition to the system roots
    pub ca_cert: Option<PathBuf>,
}

impl TlsOptions {
    pub fn verify_full() -> Self {
        Self {
            verify_server: true,
            ca_cert: None,
        }
    }

    pub fn ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    fn verifies(&self) -> bool {
        self.verify_server || self.ca_cert.is_some()
    }
}

/// Build the TLS connector for `mode`, or `None` when TLS is disabled.
pub fn make_tls_connector(mode: SslMode, options: &TlsOptions) -> Result<Option<MakeTlsConnector>> {
    if mode == SslMode::Disable {
        return Ok(None);
    }

    let mut builder = TlsConnector::builder();
    if !options.verifies() {
        builder.danger_accept_invalid_certs(true);
        builder.danger_accept_invalid_hostnames(true);
    }
    if let Some(path) = &options.ca_cert {
        builder.add_root_certificate(load_ca_cert(path)?);
    }

    let connector = builder
        .build()
        .map_err(|e| SlsError::Connection(format!("Failed to build TLS connector: {}", e)))?;

    tracing::debug!(?mode, verify = options.verifies(), "TLS connector built");
    Ok(Some(MakeTlsConnector::new(connector)))
}

fn load_ca_cert(path: &Path) -> Result<Certificate> {
    let pem = fs::read(path).map_err(|e| {
        SlsError::Connection(format!(
            "Failed to read CA certificate {}: {}",
            path.display(),
            e
        ))
    })?;
    Certificate::from_pem(&pem)
        .map_err(|e| SlsError::Connection(format!("Failed to parse CA certificate: {}", e)))
}
