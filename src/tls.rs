//! TLS material for the coordinator channel.
//!
//! Loads the CA certificate used to verify the coordinator and, optionally,
//! a client identity for mutual TLS.

use std::path::PathBuf;

use tokio::fs;
use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use crate::config::TlsConfig;

/// Error type for TLS configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("CA certificate path not configured")]
    MissingCaCert,

    #[error("Client certificate and key must be configured together")]
    IncompleteIdentity,

    #[error("CA certificate not found: {0}")]
    CaCertNotFound(PathBuf),

    #[error("Client certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),
}

/// Loaded TLS materials ready for use with tonic.
#[derive(Clone)]
pub struct TlsIdentity {
    ca_cert: Certificate,
    /// Present only when mTLS is configured
    identity: Option<Identity>,
    domain_name: Option<String>,
}

impl TlsIdentity {
    /// Load TLS materials from the paths in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA path is not configured, if only one half of
    /// the client identity is configured, or if any file cannot be read.
    pub async fn load(config: &TlsConfig) -> Result<Self, TlsError> {
        let ca_cert_path = config
            .ca_cert_path
            .as_ref()
            .ok_or(TlsError::MissingCaCert)?;
        if !ca_cert_path.exists() {
            return Err(TlsError::CaCertNotFound(ca_cert_path.clone()));
        }
        let ca_cert = Certificate::from_pem(fs::read(ca_cert_path).await?);

        let identity = match (&config.cert_path, &config.key_path) {
            (Some(cert_path), Some(key_path)) => {
                if !cert_path.exists() {
                    return Err(TlsError::CertNotFound(cert_path.clone()));
                }
                if !key_path.exists() {
                    return Err(TlsError::KeyNotFound(key_path.clone()));
                }
                let cert_pem = fs::read(cert_path).await?;
                let key_pem = fs::read(key_path).await?;
                Some(Identity::from_pem(cert_pem, key_pem))
            }
            (None, None) => None,
            _ => return Err(TlsError::IncompleteIdentity),
        };

        Ok(Self {
            ca_cert,
            identity,
            domain_name: config.domain_name.clone(),
        })
    }

    pub fn is_mutual(&self) -> bool {
        self.identity.is_some()
    }

    /// Client TLS config that verifies the coordinator against the CA.
    ///
    /// The coordinator certificate is checked against the configured domain
    /// name, falling back to `host`.
    pub fn client_tls_config(&self, host: &str) -> ClientTlsConfig {
        let domain = self.domain_name.as_deref().unwrap_or(host);
        let config = ClientTlsConfig::new()
            .domain_name(domain)
            .ca_certificate(self.ca_cert.clone());
        match &self.identity {
            Some(identity) => config.identity(identity.clone()),
            None => config,
        }
    }
}
