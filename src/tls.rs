//! TLS material loading for the HTTPS listener.
//!
//! The key and certificate are read once at startup. Any problem with
//! them (missing file, unreadable PEM, key/cert mismatch) is logged as a
//! warning and leaves the HTTPS listener off; plaintext service is never
//! affected.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("no certificates found in PEM input")]
    NoCertificates,

    #[error("no private key found in PEM input")]
    NoPrivateKey,

    #[error("malformed PEM: {0}")]
    Pem(#[from] std::io::Error),

    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build an acceptor from PEM-encoded key and certificate chain.
pub fn build_acceptor(key_pem: &[u8], cert_pem: &[u8]) -> Result<TlsAcceptor, TlsError> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut &cert_pem[..]).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates);
    }

    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut &key_pem[..])?.ok_or(TlsError::NoPrivateKey)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Load the acceptor from disk, or `None` (with a warning) when TLS
/// cannot be enabled.
pub async fn load_acceptor(key_path: &Path, cert_path: &Path) -> Option<TlsAcceptor> {
    if !tokio::fs::try_exists(key_path).await.unwrap_or(false) {
        tracing::warn!(
            path = %key_path.display(),
            "TLS disabled. TLS private key file does not exist"
        );
        return None;
    }
    if !tokio::fs::try_exists(cert_path).await.unwrap_or(false) {
        tracing::warn!(
            path = %cert_path.display(),
            "TLS disabled. TLS certificate does not exist"
        );
        return None;
    }

    let read = async {
        let key = tokio::fs::read(key_path).await?;
        let cert = tokio::fs::read(cert_path).await?;
        build_acceptor(&key, &cert)
    };

    match read.await {
        Ok(acceptor) => {
            tracing::info!(
                key = %key_path.display(),
                cert = %cert_path.display(),
                "TLS material loaded"
            );
            Some(acceptor)
        }
        Err(e) => {
            tracing::warn!(error = %e, "TLS disabled. Could not load TLS material");
            None
        }
    }
}
